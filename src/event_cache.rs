//! Event Store
//!
//! Holds the lifecycle event log of every instance, refreshes it from the
//! [`EventSource`] and persists it between runs.
//!
//! ## Refresh Policy
//!
//! - **Fresh cache**: returned as-is with no I/O. The cache is stale once the
//!   refresh interval has passed *or* the UTC date has changed since the last
//!   refresh, so there is at least one refresh per day.
//! - **Stale cache**: incremental fetch of events created after
//!   `last_refresh_time - safety_margin`, merged by event id.
//! - **Empty cache or forced refresh**: full history fetch, replacing the log.
//! - **Fetch failure**: a non-empty cache is returned stale (warn + counter);
//!   an empty cache propagates the error.
//!
//! The whole check-fetch-merge-persist sequence runs under one async mutex,
//! so concurrent callers never issue overlapping fetches for the same store.
//!
//! ## Persistence
//!
//! The log is stored as a versioned JSON [`CacheRecord`]. A record that fails
//! to parse, carries another version, or is older than the maximum age is
//! discarded and rebuilt from scratch; no schema migration is attempted.

use crate::clock::Clock;
use crate::config::Config;
use crate::dedup::{dedupe, merge_events, total_events, EventsByResource};
use crate::error::{BillingError, BillingResult};
use crate::models::CacheStats;
use crate::source::{drain_events, EventSource};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const CACHE_VERSION: &str = "v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub version: String,
    pub last_refresh_time: DateTime<Utc>,
    pub events_by_resource: EventsByResource,
}

#[derive(Debug, Clone)]
pub struct EventStoreOptions {
    pub refresh_interval: Duration,
    pub safety_margin: Duration,
    pub max_age: Duration,
    pub timeout: std::time::Duration,
    pub page_size: u32,
}

impl EventStoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            refresh_interval: Duration::minutes(config.cache.refresh_interval_minutes),
            safety_margin: Duration::minutes(config.cache.safety_margin_minutes),
            max_age: Duration::hours(config.cache.max_age_hours),
            timeout: config.api_timeout(),
            page_size: config.api.page_size,
        }
    }
}

impl Default for EventStoreOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct CacheState {
    last_refresh_time: DateTime<Utc>,
    events: EventsByResource,
}

impl CacheState {
    fn empty() -> Self {
        Self {
            last_refresh_time: DateTime::<Utc>::UNIX_EPOCH,
            events: EventsByResource::new(),
        }
    }
}

pub struct EventStore {
    source: Arc<dyn EventSource>,
    clock: Arc<dyn Clock>,
    options: EventStoreOptions,
    path: Option<PathBuf>,
    state: Mutex<CacheState>,
    degraded_refreshes: AtomicU64,
}

impl EventStore {
    /// Open a store persisted at `path`, or purely in memory when `None`.
    pub fn open(
        source: Arc<dyn EventSource>,
        clock: Arc<dyn Clock>,
        options: EventStoreOptions,
        path: Option<PathBuf>,
    ) -> Self {
        let state = match path.as_deref() {
            Some(path) => load_state(path, clock.now(), options.max_age),
            None => CacheState::empty(),
        };

        Self {
            source,
            clock,
            options,
            path,
            state: Mutex::new(state),
            degraded_refreshes: AtomicU64::new(0),
        }
    }

    /// Events grouped by resource, each list newest first.
    pub async fn get_events(&self, force_refresh: bool) -> BillingResult<EventsByResource> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let fresh = !state.events.is_empty() && !self.is_stale(state.last_refresh_time, now);
        if !force_refresh && fresh {
            debug!(resources = state.events.len(), "Using cached event data");
            return Ok(state.events.clone());
        }

        let since = if force_refresh || state.events.is_empty() {
            info!(force_refresh, "Fetching full event history");
            None
        } else {
            let since = state.last_refresh_time - self.options.safety_margin;
            info!(since = %since, "Fetching events incrementally");
            Some(since)
        };

        match self.fetch(since).await {
            Ok(fetched) => {
                if since.is_some() {
                    let stats = merge_events(&mut state.events, fetched);
                    debug!(
                        added = stats.added,
                        upgraded = stats.upgraded,
                        duplicates = stats.duplicates,
                        "Merged incremental events"
                    );
                } else {
                    state.events = dedupe(fetched);
                }
                state.last_refresh_time = now;

                if let Err(e) = self.persist(&state).await {
                    warn!(error = %e, "Failed to persist event cache");
                }

                info!(
                    resources = state.events.len(),
                    total_events = total_events(&state.events),
                    "Event cache refreshed"
                );
                Ok(state.events.clone())
            }
            Err(e) if e.is_transport() && !state.events.is_empty() => {
                let count = self.degraded_refreshes.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    error = %e,
                    degraded_refreshes = count,
                    last_refresh = %state.last_refresh_time,
                    "Event refresh failed, serving stale cache"
                );
                Ok(state.events.clone())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, since: Option<DateTime<Utc>>) -> BillingResult<EventsByResource> {
        let drain = drain_events(self.source.as_ref(), since, self.options.page_size);
        match tokio::time::timeout(self.options.timeout, drain).await {
            Ok(Ok(events)) => Ok(events),
            Ok(Err(e)) => Err(BillingError::SourceFetch(e)),
            Err(_) => Err(BillingError::Timeout(self.options.timeout)),
        }
    }

    fn is_stale(&self, last_refresh: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_refresh > self.options.refresh_interval
            || last_refresh.date_naive() != now.date_naive()
    }

    async fn persist(&self, state: &CacheState) -> BillingResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let record = CacheRecord {
            version: CACHE_VERSION.to_string(),
            last_refresh_time: state.last_refresh_time,
            events_by_resource: state.events.clone(),
        };
        let bytes = serde_json::to_vec(&record)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Persisted event cache");
        Ok(())
    }

    /// Drop all cached events and the persisted record; the next access does
    /// a full refresh.
    pub async fn clear(&self) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        *state = CacheState::empty();

        if let Some(path) = self.path.as_deref() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("Event cache cleared");
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let now = self.clock.now();
        CacheStats {
            last_refresh_time: state.last_refresh_time,
            resource_count: state.events.len(),
            total_events: total_events(&state.events),
            cache_age_seconds: (now - state.last_refresh_time).num_seconds().max(0),
            degraded_refreshes: self.degraded_refreshes.load(Ordering::Relaxed),
        }
    }

    pub fn degraded_refreshes(&self) -> u64 {
        self.degraded_refreshes.load(Ordering::Relaxed)
    }
}

fn load_state(path: &Path, now: DateTime<Utc>, max_age: Duration) -> CacheState {
    if !path.exists() {
        debug!(path = %path.display(), "No persisted event cache");
        return CacheState::empty();
    }

    match read_record(path) {
        Ok(record) if now - record.last_refresh_time > max_age => {
            info!(
                last_refresh = %record.last_refresh_time,
                "Persisted event cache is too old, rebuilding"
            );
            CacheState::empty()
        }
        Ok(record) => {
            info!(
                last_refresh = %record.last_refresh_time,
                resources = record.events_by_resource.len(),
                "Loaded persisted event cache"
            );
            CacheState {
                last_refresh_time: record.last_refresh_time,
                events: record.events_by_resource,
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Discarding event cache");
            CacheState::empty()
        }
    }
}

/// Read and validate a persisted record.
pub fn read_record(path: &Path) -> BillingResult<CacheRecord> {
    let bytes = std::fs::read(path)?;
    let record: CacheRecord = serde_json::from_slice(&bytes)
        .map_err(|e| BillingError::MalformedCacheRecord(e.to_string()))?;
    if record.version != CACHE_VERSION {
        return Err(BillingError::MalformedCacheRecord(format!(
            "unsupported version {}",
            record.version
        )));
    }
    Ok(record)
}
