//! Pricing catalog
//!
//! Resolves rate-class ids to hourly rates and monthly caps. The live table
//! comes from a [`PricingSource`] and is cached for a TTL; when the source is
//! unreachable a built-in table of the standard Linode plans is used instead.
//!
//! A computation works on an immutable [`PricingSnapshot`]. Rate classes
//! missing from the snapshot get one direct lookup against the source
//! (memoised per catalog) before the computation gives up with
//! [`BillingError::UnknownRateClass`]. A lookup that fails in transport is
//! reported as such and tried again on the next computation.

use crate::clock::Clock;
use crate::error::{BillingError, BillingResult};
use crate::models::PricingEntry;
use crate::source::PricingSource;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Standard plans as `(id, hourly, monthly)`.
const FALLBACK_RATES: &[(&str, f64, f64)] = &[
    ("g6-nanode-1", 0.0075, 5.0),
    ("g6-standard-1", 0.015, 10.0),
    ("g6-standard-2", 0.03, 20.0),
    ("g6-standard-4", 0.06, 40.0),
    ("g6-standard-6", 0.12, 80.0),
    ("g6-standard-8", 0.24, 160.0),
    ("g6-dedicated-2", 0.045, 30.0),
    ("g6-dedicated-4", 0.09, 60.0),
    ("g6-dedicated-8", 0.18, 120.0),
    ("g6-dedicated-16", 0.36, 240.0),
    ("g6-highmem-1", 0.09, 60.0),
    ("g6-highmem-2", 0.18, 120.0),
    ("g6-highmem-4", 0.36, 240.0),
    ("g6-highmem-8", 0.72, 480.0),
];

pub const FALLBACK_STORAGE_BASE_FEE: f64 = 5.0;

pub fn fallback_rates() -> Vec<PricingEntry> {
    FALLBACK_RATES
        .iter()
        .map(|(id, hourly, monthly)| PricingEntry::new(*id, *hourly, *monthly))
        .collect()
}

/// Where a snapshot's rates came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotOrigin {
    Live,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingSnapshot {
    entries: BTreeMap<String, PricingEntry>,
    pub storage_base_fee: f64,
    pub fetched_at: DateTime<Utc>,
    pub origin: SnapshotOrigin,
}

impl PricingSnapshot {
    pub fn new(
        entries: impl IntoIterator<Item = PricingEntry>,
        storage_base_fee: f64,
        fetched_at: DateTime<Utc>,
        origin: SnapshotOrigin,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (normalize_rate_class(&entry.rate_class_id), entry))
            .collect();
        Self { entries, storage_base_fee, fetched_at, origin }
    }

    /// The built-in table, for offline use.
    pub fn fallback(fetched_at: DateTime<Utc>) -> Self {
        Self::new(fallback_rates(), FALLBACK_STORAGE_BASE_FEE, fetched_at, SnapshotOrigin::Fallback)
    }

    pub fn get(&self, rate_class_id: &str) -> Option<&PricingEntry> {
        self.entries.get(&normalize_rate_class(rate_class_id))
    }

    pub fn rate(&self, rate_class_id: &str) -> BillingResult<&PricingEntry> {
        self.get(rate_class_id)
            .ok_or_else(|| BillingError::UnknownRateClass(rate_class_id.to_string()))
    }

    pub fn contains(&self, rate_class_id: &str) -> bool {
        self.get(rate_class_id).is_some()
    }

    pub fn insert(&mut self, entry: PricingEntry) {
        self.entries.insert(normalize_rate_class(&entry.rate_class_id), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rate-class ids are case-insensitive and may carry stray whitespace.
pub fn normalize_rate_class(rate_class_id: &str) -> String {
    rate_class_id.trim().to_ascii_lowercase()
}

/// Pricing source backed only by the built-in table.
#[derive(Debug, Clone)]
pub struct StaticPricing {
    rates: Vec<PricingEntry>,
    storage_base_fee: f64,
}

impl StaticPricing {
    pub fn new(rates: Vec<PricingEntry>, storage_base_fee: f64) -> Self {
        Self { rates, storage_base_fee }
    }
}

impl Default for StaticPricing {
    fn default() -> Self {
        Self::new(fallback_rates(), FALLBACK_STORAGE_BASE_FEE)
    }
}

#[async_trait]
impl PricingSource for StaticPricing {
    async fn fetch_rates(&self) -> Result<Vec<PricingEntry>> {
        Ok(self.rates.clone())
    }

    async fn get_rate(&self, rate_class_id: &str) -> Result<Option<PricingEntry>> {
        let wanted = normalize_rate_class(rate_class_id);
        Ok(self
            .rates
            .iter()
            .find(|entry| normalize_rate_class(&entry.rate_class_id) == wanted)
            .cloned())
    }

    async fn storage_base_fee(&self) -> Result<f64> {
        Ok(self.storage_base_fee)
    }
}

pub struct PricingCatalog {
    source: Arc<dyn PricingSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    timeout: std::time::Duration,
    snapshot: RwLock<Option<PricingSnapshot>>,
    direct_lookups: DashMap<String, Option<PricingEntry>>,
    fallback_uses: AtomicU64,
}

impl PricingCatalog {
    pub fn new(
        source: Arc<dyn PricingSource>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            source,
            clock,
            ttl,
            timeout,
            snapshot: RwLock::new(None),
            direct_lookups: DashMap::new(),
            fallback_uses: AtomicU64::new(0),
        }
    }

    /// Current snapshot, refreshed from the source once the TTL lapses.
    pub async fn snapshot(&self) -> PricingSnapshot {
        let now = self.clock.now();
        {
            let guard = self.snapshot.read().await;
            if let Some(snapshot) = guard.as_ref() {
                if now - snapshot.fetched_at < self.ttl {
                    return snapshot.clone();
                }
            }
        }

        let mut guard = self.snapshot.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(snapshot) = guard.as_ref() {
            if now - snapshot.fetched_at < self.ttl {
                return snapshot.clone();
            }
        }

        let snapshot = match self.fetch_live(now).await {
            Ok(snapshot) => {
                info!(rate_classes = snapshot.len(), "Loaded pricing catalog");
                self.direct_lookups.clear();
                snapshot
            }
            Err(e) => {
                self.fallback_uses.fetch_add(1, Ordering::Relaxed);
                match guard.as_ref() {
                    Some(stale) => {
                        warn!(error = %e, "Pricing refresh failed, keeping stale catalog");
                        stale.clone()
                    }
                    None => {
                        warn!(error = %e, "Pricing source unreachable, using built-in rate table");
                        PricingSnapshot::fallback(now)
                    }
                }
            }
        };

        *guard = Some(snapshot.clone());
        snapshot
    }

    async fn fetch_live(&self, now: DateTime<Utc>) -> BillingResult<PricingSnapshot> {
        let fetch = async {
            let rates = self.source.fetch_rates().await?;
            let fee = self.source.storage_base_fee().await?;
            Ok::<_, anyhow::Error>((rates, fee))
        };
        let (rates, fee) = tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| BillingError::Timeout(self.timeout))?
            .map_err(BillingError::SourceFetch)?;

        if rates.is_empty() {
            return Err(BillingError::SourceFetch(anyhow::anyhow!(
                "pricing source returned no rates"
            )));
        }
        Ok(PricingSnapshot::new(rates, fee, now, SnapshotOrigin::Live))
    }

    /// Make sure every id in `rate_classes` resolves in `snapshot`, looking
    /// up absent ones directly.
    pub async fn resolve_missing<'a>(
        &self,
        snapshot: &mut PricingSnapshot,
        rate_classes: impl IntoIterator<Item = &'a str>,
    ) -> BillingResult<()> {
        for rate_class in rate_classes {
            if snapshot.contains(rate_class) {
                continue;
            }
            let key = normalize_rate_class(rate_class);
            let cached = self.direct_lookups.get(&key).map(|entry| entry.value().clone());
            let found = match cached {
                Some(found) => found,
                None => {
                    debug!(rate_class, "Rate class not in catalog, trying direct lookup");
                    let lookup = self.source.get_rate(rate_class);
                    let found = match tokio::time::timeout(self.timeout, lookup).await {
                        Ok(Ok(found)) => found,
                        Ok(Err(e)) => {
                            warn!(rate_class, error = %e, "Direct rate lookup failed");
                            return Err(BillingError::SourceFetch(e));
                        }
                        Err(_) => {
                            warn!(rate_class, "Direct rate lookup timed out");
                            return Err(BillingError::Timeout(self.timeout));
                        }
                    };
                    // Only a definitive answer from the source is remembered.
                    self.direct_lookups.insert(key, found.clone());
                    found
                }
            };

            match found {
                Some(entry) => snapshot.insert(entry),
                None => return Err(BillingError::UnknownRateClass(rate_class.to_string())),
            }
        }
        Ok(())
    }

    /// Number of times a refresh fell back to stale or built-in rates.
    pub fn fallback_uses(&self) -> u64 {
        self.fallback_uses.load(Ordering::Relaxed)
    }
}
