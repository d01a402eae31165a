#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use linode_billing::pricing::StaticPricing;
use linode_billing::source::{EventEntity, EventPage, EventSource, RawEvent, ResourceMetadata};
use linode_billing::{BillingAnalyzer, Config, ManualClock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn raw_event(id: u64, resource_id: u64, created: DateTime<Utc>, action: &str) -> RawEvent {
    RawEvent {
        id,
        created: created.format("%Y-%m-%dT%H:%M:%S").to_string(),
        action: action.to_string(),
        status: "finished".to_string(),
        entity: Some(EventEntity::Linode {
            id: resource_id,
            label: Some(format!("node-{}", resource_id)),
        }),
    }
}

/// In-memory event feed that records every request it serves.
#[derive(Default)]
pub struct ScriptedEvents {
    events: Mutex<Vec<RawEvent>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    requested_since: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl ScriptedEvents {
    pub fn new(events: Vec<RawEvent>) -> Arc<Self> {
        let source = Self::default();
        *source.events.lock().unwrap() = events;
        Arc::new(source)
    }

    pub fn push(&self, event: RawEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Number of pages served, i.e. fetch calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested_since(&self) -> Vec<Option<DateTime<Utc>>> {
        self.requested_since.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedEvents {
    async fn fetch_events(
        &self,
        since: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Result<EventPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if page == 1 {
            self.requested_since.lock().unwrap().push(since);
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }

        let matching: Vec<RawEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| match since {
                Some(since) => linode_billing::timestamp_parser::TimestampParser::parse(&e.created)
                    .map(|created| created >= since)
                    .unwrap_or(false),
                None => true,
            })
            .cloned()
            .collect();

        let size = page_size.max(1) as usize;
        let total_pages = matching.len().div_ceil(size).max(1) as u32;
        let events = matching
            .into_iter()
            .skip((page as usize - 1) * size)
            .take(size)
            .collect();
        Ok(EventPage { events, page, total_pages })
    }
}

/// Current plans by instance id; unknown ids behave like deleted instances.
#[derive(Default)]
pub struct StaticMetadata {
    rate_classes: Mutex<HashMap<u64, String>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StaticMetadata {
    pub fn with(entries: &[(u64, &str)]) -> Arc<Self> {
        let metadata = Self::default();
        *metadata.rate_classes.lock().unwrap() =
            entries.iter().map(|(id, class)| (*id, class.to_string())).collect();
        Arc::new(metadata)
    }

    pub fn set_rate_class(&self, resource_id: u64, rate_class: &str) {
        self.rate_classes
            .lock()
            .unwrap()
            .insert(resource_id, rate_class.to_string());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of lookups that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceMetadata for StaticMetadata {
    async fn current_rate_class(&self, resource_id: u64) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset by peer");
        }
        Ok(self.rate_classes.lock().unwrap().get(&resource_id).cloned())
    }
}

/// Config with storage disabled, the usual baseline for instance-only checks.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.billing.object_storage_enabled = false;
    config.api.page_size = 25;
    config
}

pub fn build_analyzer(
    events: Arc<ScriptedEvents>,
    metadata: Arc<StaticMetadata>,
    clock: Arc<ManualClock>,
    config: &Config,
    cache_path: Option<PathBuf>,
) -> BillingAnalyzer {
    BillingAnalyzer::new(
        events,
        Arc::new(StaticPricing::default()),
        metadata,
        clock,
        config,
        cache_path,
    )
}
