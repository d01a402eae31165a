//! Billing Analysis Engine
//!
//! [`BillingAnalyzer`] coordinates the full reconciliation pipeline for one
//! request:
//!
//! 1. **Validation**: the billing period is checked before any I/O
//! 2. **Events**: the [`EventStore`] returns the (possibly refreshed) log
//! 3. **Rate classes**: current plans are looked up concurrently, falling back
//!    to the configured default for deleted or unreachable instances. Answers
//!    are kept for the pricing TTL; failed lookups are retried next time
//! 4. **Sessions**: rebuilt from scratch per resource
//! 5. **Pricing**: a catalog snapshot, with direct lookups for absent classes
//! 6. **Allocation**: per-day costs under the configured [`CapPolicy`]
//! 7. **Summary**: month-to-date totals and the linear projection
//!
//! Each computation runs inside a span carrying a fresh `request_id`.
//!
//! [`CapPolicy`]: crate::allocator::CapPolicy

use crate::allocator::CostAllocator;
use crate::clock::Clock;
use crate::config::{BillingConfig, Config};
use crate::dedup::EventsByResource;
use crate::error::BillingResult;
use crate::event_cache::{EventStore, EventStoreOptions};
use crate::models::{CacheStats, DailyCost, MonthlySummary, Session};
use crate::period::BillingPeriod;
use crate::pricing::PricingCatalog;
use crate::sessions::build_all_sessions;
use crate::source::{EventSource, PricingSource, ResourceMetadata};
use crate::span_with_context;
use crate::summary::summarize;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument, Level};

/// Metadata lookups allowed in flight at once.
const MAX_CONCURRENT_LOOKUPS: usize = 8;

pub struct BillingAnalyzer {
    store: EventStore,
    catalog: PricingCatalog,
    metadata: Arc<dyn ResourceMetadata>,
    clock: Arc<dyn Clock>,
    billing: BillingConfig,
    timeout: std::time::Duration,
    rate_classes: DashMap<u64, (String, DateTime<Utc>)>,
    rate_class_ttl: Duration,
}

impl BillingAnalyzer {
    /// Wire an analyzer from its collaborators. The event cache persists at
    /// `cache_path`, or stays in memory when `None`.
    pub fn new(
        events: Arc<dyn EventSource>,
        pricing: Arc<dyn PricingSource>,
        metadata: Arc<dyn ResourceMetadata>,
        clock: Arc<dyn Clock>,
        config: &Config,
        cache_path: Option<PathBuf>,
    ) -> Self {
        let store = EventStore::open(
            events,
            clock.clone(),
            EventStoreOptions::from_config(config),
            cache_path,
        );
        let ttl = Duration::minutes(config.pricing.ttl_minutes);
        let catalog = PricingCatalog::new(pricing, clock.clone(), ttl, config.api_timeout());

        Self {
            store,
            catalog,
            metadata,
            clock,
            billing: config.billing.clone(),
            timeout: config.api_timeout(),
            rate_classes: DashMap::new(),
            rate_class_ttl: ttl,
        }
    }

    /// One cost entry per day of the month, ascending.
    pub async fn get_daily_costs(
        &self,
        year: i32,
        month: u32,
        force_refresh: bool,
    ) -> BillingResult<Vec<DailyCost>> {
        let period = BillingPeriod::new(year, month)?;
        let span = span_with_context!(Level::INFO, "daily_costs", period = %period, force_refresh);
        async {
            let now = self.clock.now();
            self.daily_costs_at(period, now, force_refresh).await
        }
        .instrument(span)
        .await
    }

    pub async fn get_monthly_summary(
        &self,
        year: i32,
        month: u32,
        force_refresh: bool,
    ) -> BillingResult<MonthlySummary> {
        let period = BillingPeriod::new(year, month)?;
        let span =
            span_with_context!(Level::INFO, "monthly_summary", period = %period, force_refresh);
        async {
            let now = self.clock.now();
            let days = self.daily_costs_at(period, now, force_refresh).await?;
            let summary = summarize(&days, period, now);
            info!(
                month_to_date = summary.month_to_date_cost,
                projected = summary.projected_monthly_cost,
                "Monthly summary computed"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Sessions of every resource, keyed by resource id.
    pub async fn get_sessions(
        &self,
        force_refresh: bool,
    ) -> BillingResult<BTreeMap<u64, Vec<Session>>> {
        let span = span_with_context!(Level::INFO, "sessions", force_refresh);
        async {
            let events = self.store.get_events(force_refresh).await?;
            Ok(self.sessions_for(&events, force_refresh).await)
        }
        .instrument(span)
        .await
    }

    pub async fn clear_cache(&self) -> BillingResult<()> {
        self.rate_classes.clear();
        self.store.clear().await
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        self.store.stats().await
    }

    /// Times a pricing refresh fell back to stale or built-in rates.
    pub fn pricing_fallback_uses(&self) -> u64 {
        self.catalog.fallback_uses()
    }

    async fn daily_costs_at(
        &self,
        period: BillingPeriod,
        now: DateTime<Utc>,
        force_refresh: bool,
    ) -> BillingResult<Vec<DailyCost>> {
        let events = self.store.get_events(force_refresh).await?;
        let sessions = self.sessions_for(&events, force_refresh).await;

        // Sessions entirely outside the month never need a price.
        let in_period: Vec<&Session> = sessions
            .values()
            .flatten()
            .filter(|s| s.start_time < period.end() && s.effective_end(now) > period.start())
            .collect();

        let mut snapshot = self.catalog.snapshot().await;
        let needed: BTreeSet<&str> =
            in_period.iter().map(|s| s.rate_class_at_start.as_str()).collect();
        self.catalog.resolve_missing(&mut snapshot, needed).await?;

        let days = CostAllocator::new(&snapshot, self.billing.cap_policy)
            .with_storage(self.billing.object_storage_enabled)
            .allocate(in_period, period, now)?;

        debug!(
            sessions = sessions.values().map(Vec::len).sum::<usize>(),
            days = days.len(),
            "Allocated daily costs"
        );
        Ok(days.into_values().collect())
    }

    async fn sessions_for(
        &self,
        events: &EventsByResource,
        force_refresh: bool,
    ) -> BTreeMap<u64, Vec<Session>> {
        let rate_classes = self
            .current_rate_classes(events.keys().copied(), force_refresh)
            .await;
        build_all_sessions(events, &rate_classes)
    }

    async fn current_rate_classes(
        &self,
        resource_ids: impl Iterator<Item = u64>,
        force_refresh: bool,
    ) -> BTreeMap<u64, String> {
        let now = self.clock.now();
        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();
        for resource_id in resource_ids {
            match self.rate_classes.get(&resource_id) {
                Some(entry) if !force_refresh && now - entry.1 < self.rate_class_ttl => {
                    resolved.insert(resource_id, entry.0.clone());
                }
                _ => missing.push(resource_id),
            }
        }

        if !missing.is_empty() {
            debug!(cached = resolved.len(), missing = missing.len(), "Looking up rate classes");
        }
        let looked_up: Vec<(u64, String)> = stream::iter(missing)
            .map(|resource_id| self.lookup_rate_class(resource_id, now))
            .buffer_unordered(MAX_CONCURRENT_LOOKUPS)
            .collect()
            .await;
        resolved.extend(looked_up);
        resolved
    }

    /// Only answers from the metadata source are remembered; a failed or
    /// timed-out lookup falls back to the default for this request alone.
    async fn lookup_rate_class(&self, resource_id: u64, now: DateTime<Utc>) -> (u64, String) {
        let default = self.billing.default_rate_class.as_str();
        let lookup = self.metadata.current_rate_class(resource_id);
        let rate_class = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Some(rate_class))) => rate_class,
            Ok(Ok(None)) => {
                warn!(resource_id, default, "Resource no longer exists, using default rate class");
                default.to_string()
            }
            Ok(Err(e)) => {
                warn!(resource_id, default, error = %e, "Rate class lookup failed, using default");
                return (resource_id, default.to_string());
            }
            Err(_) => {
                warn!(resource_id, default, "Rate class lookup timed out, using default");
                return (resource_id, default.to_string());
            }
        };
        self.rate_classes.insert(resource_id, (rate_class.clone(), now));
        (resource_id, rate_class)
    }
}
