//! Linode Billing Library
//!
//! Reconciles Linode instance lifecycle events into daily costs, month-to-date
//! totals and a month-end projection. Usage is reconstructed from the account
//! event log rather than read from an invoice, so results are estimates.
//!
//! ## Core Features
//!
//! - **Incremental event cache**: persisted, deduplicated event log refreshed
//!   with a safety margin and degraded gracefully when the provider is down
//! - **Session reconstruction**: boot/shutdown/resize/delete events replayed
//!   into non-overlapping billable intervals
//! - **Capped cost allocation**: hourly pricing spread over UTC days, limited by
//!   the plan's monthly cap under a configurable [`allocator::CapPolicy`]
//! - **Object storage**: flat monthly fee spread evenly across the month
//! - **Forecasting**: linear month-end projection from the daily average
//!
//! ## Architecture Overview
//!
//! - [`models`] - Core data structures for events, sessions and cost reports
//! - [`source`] - Async collaborator traits and wire-shape event validation
//! - [`event_cache`] - Persisted event store with single-flight refresh
//! - [`dedup`] - Event merge and deduplication by event id
//! - [`sessions`] - Session builder state machine
//! - [`pricing`] - Pricing catalog with TTL snapshot and built-in fallback
//! - [`allocator`] - Per-day cost allocation with monthly caps
//! - [`summary`] - Month-to-date totals and projection
//! - [`analyzer`] - Orchestrates the pipeline per request
//! - [`display`] - Terminal and JSON report output
//! - [`config`] - Configuration management with environment variable support
//! - [`logging`] - Structured logging with JSON and pretty-print formats
//!
//! ## Main Entry Point
//!
//! ```rust,no_run
//! use linode_billing::{BillingAnalyzer, Config, SystemClock};
//! use linode_billing::api::LinodeApi;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let api = Arc::new(LinodeApi::new(&config.api, config.pricing.storage_base_fee)?);
//! let analyzer = BillingAnalyzer::new(
//!     api.clone(),
//!     api.clone(),
//!     api,
//!     Arc::new(SystemClock),
//!     &config,
//!     Some(config.paths.cache_file.clone()),
//! );
//!
//! let summary = analyzer.get_monthly_summary(2025, 9, false).await?;
//! println!("projected: ${:.2}", summary.projected_monthly_cost);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod analyzer;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod display;
pub mod error;
pub mod event_cache;
pub mod logging;
pub mod models;
pub mod period;
pub mod pricing;
pub mod sessions;
pub mod source;
pub mod summary;
pub mod timestamp_parser;

#[cfg(feature = "api")]
pub mod api;

pub use allocator::{CapPolicy, CostAllocator};
pub use analyzer::BillingAnalyzer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{BillingError, BillingResult};
pub use models::*;
pub use period::BillingPeriod;
