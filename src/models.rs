//! Core Data Models
//!
//! This module defines the data structures that flow through the billing
//! pipeline, from lifecycle events fetched from the provider to the daily cost
//! breakdown and monthly summary handed back to callers.
//!
//! ## Data Flow
//!
//! 1. **Raw Data**: [`LifecycleEvent`] - validated instance lifecycle events
//! 2. **Sessions**: [`Session`] - contiguous billable intervals per resource
//! 3. **Allocation**: [`DailyCost`] / [`LineItem`] - per-day cost contributions
//! 4. **Reports**: [`MonthlySummary`] - month-to-date totals and projection
//!
//! ### Pricing Data
//! - [`PricingEntry`] - hourly rate and monthly cap of one rate class
//!
//! All public types support serde so the CLI can emit them as JSON and the
//! event cache can persist them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle actions that affect whether an instance is billable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Create,
    Boot,
    Shutdown,
    Reboot,
    Resize,
    Delete,
}

impl EventAction {
    /// Map a provider action string such as `linode_boot`.
    pub fn from_provider(action: &str) -> Option<Self> {
        match action {
            "linode_create" => Some(Self::Create),
            "linode_boot" => Some(Self::Boot),
            "linode_shutdown" => Some(Self::Shutdown),
            "linode_reboot" => Some(Self::Reboot),
            "linode_resize" => Some(Self::Resize),
            "linode_delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Started,
    Finished,
    Failed,
    Notification,
}

impl EventStatus {
    pub fn from_provider(status: &str) -> Option<Self> {
        match status {
            "started" => Some(Self::Started),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            "notification" => Some(Self::Notification),
            _ => None,
        }
    }

    /// How settled the provider operation is. A replayed event with the same
    /// id but a higher rank supersedes the cached copy.
    pub fn rank(self) -> u8 {
        match self {
            Self::Started => 0,
            Self::Notification => 1,
            Self::Finished | Self::Failed => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub id: u64,
    pub resource_id: u64,
    pub created_at: DateTime<Utc>,
    pub action: EventAction,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_label: Option<String>,
}

impl LifecycleEvent {
    pub fn is_finished(&self) -> bool {
        self.status == EventStatus::Finished
    }
}

/// A contiguous interval during which a resource was billable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub resource_id: u64,
    pub resource_label: String,
    pub rate_class_at_start: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_open: bool,
}

impl Session {
    /// End of the session, or `now` while it is still running.
    pub fn effective_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end_time.unwrap_or(now)
    }

    pub fn duration_hours(&self, now: DateTime<Utc>) -> f64 {
        hours_between(self.start_time, self.effective_end(now))
    }
}

/// Fractional hours between two instants, never negative.
pub fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}

/// What a line item is billing for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BillableResource {
    Instance { id: u64 },
    ObjectStorage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub resource: BillableResource,
    pub label: String,
    pub cost: f64,
    pub hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCost {
    pub date: NaiveDate,
    pub resource_cost: f64,
    pub storage_cost: f64,
    pub total_cost: f64,
    pub line_items: Vec<LineItem>,
}

impl DailyCost {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            resource_cost: 0.0,
            storage_cost: 0.0,
            total_cost: 0.0,
            line_items: Vec::new(),
        }
    }

    /// Hours contributed by instance line items on this day.
    pub fn instance_hours(&self) -> f64 {
        self.line_items
            .iter()
            .filter(|item| matches!(item.resource, BillableResource::Instance { .. }))
            .map(|item| item.hours)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    pub month_to_date_cost: f64,
    pub projected_monthly_cost: f64,
    pub days_in_month: u32,
    pub days_elapsed: u32,
    pub days_remaining: u32,
    pub daily_average: f64,
    pub resource_cost: f64,
    pub storage_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingEntry {
    pub rate_class_id: String,
    pub hourly_rate: f64,
    pub monthly_cap: f64,
}

impl PricingEntry {
    pub fn new(rate_class_id: impl Into<String>, hourly_rate: f64, monthly_cap: f64) -> Self {
        Self {
            rate_class_id: rate_class_id.into(),
            hourly_rate,
            monthly_cap,
        }
    }
}

/// Diagnostic view of the event cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub last_refresh_time: DateTime<Utc>,
    pub resource_count: usize,
    pub total_events: usize,
    pub cache_age_seconds: i64,
    pub degraded_refreshes: u64,
}

impl CacheStats {
    /// Human readable age such as `3h 12m ago`.
    pub fn cache_age_display(&self) -> String {
        if self.last_refresh_time.timestamp() == 0 {
            return "never refreshed".to_string();
        }
        let hours = self.cache_age_seconds / 3600;
        let minutes = (self.cache_age_seconds % 3600) / 60;
        format!("{}h {}m ago", hours, minutes)
    }
}
