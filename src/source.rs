//! Collaborator contracts
//!
//! The billing core never talks HTTP itself. It consumes three async traits:
//!
//! - [`EventSource`] - paginated account events, filterable by creation time
//! - [`PricingSource`] - rate classes and the object-storage base fee
//! - [`ResourceMetadata`] - the current rate class of an instance
//!
//! Events arrive in the provider's wire shape ([`RawEvent`]) and are validated
//! into [`LifecycleEvent`]s here, at the boundary. Entities other than
//! instances and actions that do not affect billing are dropped.

use crate::models::{EventAction, EventStatus, LifecycleEvent, PricingEntry};
use crate::timestamp_parser::TimestampParser;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Entity an event refers to, closed over the resource kinds we bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireEntity", into = "WireEntity")]
pub enum EventEntity {
    Linode { id: u64, label: Option<String> },
    Other { kind: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEntity {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    label: Option<String>,
}

impl From<WireEntity> for EventEntity {
    fn from(wire: WireEntity) -> Self {
        match (wire.kind.as_str(), wire.id) {
            ("linode", Some(id)) => EventEntity::Linode { id, label: wire.label },
            _ => EventEntity::Other { kind: wire.kind },
        }
    }
}

impl From<EventEntity> for WireEntity {
    fn from(entity: EventEntity) -> Self {
        match entity {
            EventEntity::Linode { id, label } => WireEntity {
                kind: "linode".to_string(),
                id: Some(id),
                label,
            },
            EventEntity::Other { kind } => WireEntity { kind, id: None, label: None },
        }
    }
}

/// An account event as returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: u64,
    pub created: String,
    pub action: String,
    pub status: String,
    pub entity: Option<EventEntity>,
}

impl RawEvent {
    /// Validate into a lifecycle event; `None` for anything we do not bill.
    pub fn into_lifecycle(self) -> Option<LifecycleEvent> {
        let (resource_id, resource_label) = match self.entity {
            Some(EventEntity::Linode { id, label }) => (id, label),
            _ => return None,
        };
        let action = EventAction::from_provider(&self.action)?;
        let Some(status) = EventStatus::from_provider(&self.status) else {
            debug!(event_id = self.id, status = %self.status, "Skipping event with unknown status");
            return None;
        };
        let created_at = match TimestampParser::parse(&self.created) {
            Ok(ts) => ts,
            Err(e) => {
                debug!(event_id = self.id, error = %e, "Skipping event with unparseable timestamp");
                return None;
            }
        };

        Some(LifecycleEvent {
            id: self.id,
            resource_id,
            created_at,
            action,
            status,
            resource_label: resource_label.filter(|l| !l.is_empty()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<RawEvent>,
    pub page: u32,
    pub total_pages: u32,
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch one page (1-based) of events created at or after `since`.
    async fn fetch_events(
        &self,
        since: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Result<EventPage>;
}

#[async_trait]
pub trait PricingSource: Send + Sync {
    /// The full rate table.
    async fn fetch_rates(&self) -> Result<Vec<PricingEntry>>;

    /// Direct lookup of a single rate class.
    async fn get_rate(&self, rate_class_id: &str) -> Result<Option<PricingEntry>>;

    async fn storage_base_fee(&self) -> Result<f64>;
}

#[async_trait]
pub trait ResourceMetadata: Send + Sync {
    /// `None` when the resource no longer exists.
    async fn current_rate_class(&self, resource_id: u64) -> Result<Option<String>>;
}

/// Read every page of events and group instance lifecycle events by
/// resource id.
pub async fn drain_events(
    source: &dyn EventSource,
    since: Option<DateTime<Utc>>,
    page_size: u32,
) -> Result<BTreeMap<u64, Vec<LifecycleEvent>>> {
    let mut by_resource: BTreeMap<u64, Vec<LifecycleEvent>> = BTreeMap::new();
    let mut page = 1;
    let mut fetched = 0usize;

    loop {
        let response = source.fetch_events(since, page, page_size).await?;
        fetched += response.events.len();
        trace!(
            page,
            total_pages = response.total_pages,
            count = response.events.len(),
            "Fetched event page"
        );

        let exhausted = response.events_exhausted(page);
        for event in response.events.into_iter().filter_map(RawEvent::into_lifecycle) {
            by_resource.entry(event.resource_id).or_default().push(event);
        }

        if exhausted {
            break;
        }
        page += 1;
    }

    debug!(
        pages = page,
        fetched,
        resources = by_resource.len(),
        since = ?since,
        "Drained event source"
    );
    Ok(by_resource)
}

impl EventPage {
    fn events_exhausted(&self, requested_page: u32) -> bool {
        requested_page >= self.total_pages || self.page >= self.total_pages
    }
}
