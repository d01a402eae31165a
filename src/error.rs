//! Error taxonomy for the billing core
//!
//! Collaborators (event source, pricing source, resource metadata) report
//! failures as [`anyhow::Error`]; the core wraps them into [`BillingError`] so
//! callers can tell data problems (unknown rate class, invalid period) apart
//! from transport problems that may have been degraded to cached data.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    /// A session references a rate class that neither the pricing snapshot
    /// nor a direct catalog lookup could resolve.
    #[error("Unknown rate class: {0}")]
    UnknownRateClass(String),

    #[error("Source fetch failed: {0}")]
    SourceFetch(#[source] anyhow::Error),

    #[error("Source fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed cache record: {0}")]
    MalformedCacheRecord(String),

    #[error("Invalid billing period: {year}-{month:02}")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("Cache persistence error: {0}")]
    Persist(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BillingError {
    /// Transport-level failures are the only ones the event store may degrade
    /// to cached data for.
    pub fn is_transport(&self) -> bool {
        matches!(self, BillingError::SourceFetch(_) | BillingError::Timeout(_))
    }
}

pub type BillingResult<T> = std::result::Result<T, BillingError>;
