//! Cost Allocator
//!
//! Spreads session cost over the calendar days of one billing period.
//!
//! ## Algorithm
//!
//! For every session, in resource-id then start-time order:
//!
//! 1. Open sessions end at `as_of`; the interval is clipped to the period
//! 2. The clipped interval is walked one UTC day at a time
//! 3. Each day-segment is priced at `hours × hourly_rate`, then limited by
//!    the [`CapPolicy`]
//! 4. The segment is added to the day's totals as a [`LineItem`]
//!
//! Object storage is a flat monthly presence fee, split evenly across every
//! day of the period regardless of sessions.
//!
//! Allocation is a pure function of `(sessions, pricing, period, as_of)`:
//! ordered maps and ordered iteration make repeated runs produce identical
//! output.

use crate::error::{BillingError, BillingResult};
use crate::models::{hours_between, BillableResource, DailyCost, LineItem, Session};
use crate::period::{day_start, BillingPeriod};
use crate::pricing::PricingSnapshot;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::trace;

/// Scope of the monthly price cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapPolicy {
    /// Each session's portion inside the month is capped at `monthly_cap`.
    PerSession,
    /// All sessions of one resource inside the month share one cap.
    PerResourceMonth,
    /// Each day-segment is capped at `monthly_cap / 30`.
    DailyProrated,
}

impl FromStr for CapPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-session" => Ok(Self::PerSession),
            "per-resource-month" => Ok(Self::PerResourceMonth),
            "daily-prorated" => Ok(Self::DailyProrated),
            other => anyhow::bail!("unknown cap policy: {}", other),
        }
    }
}

pub struct CostAllocator<'a> {
    pricing: &'a PricingSnapshot,
    policy: CapPolicy,
    storage_enabled: bool,
}

impl<'a> CostAllocator<'a> {
    pub fn new(pricing: &'a PricingSnapshot, policy: CapPolicy) -> Self {
        Self {
            pricing,
            policy,
            storage_enabled: true,
        }
    }

    pub fn with_storage(mut self, enabled: bool) -> Self {
        self.storage_enabled = enabled;
        self
    }

    /// One zero-filled entry per day of `period`, with session and storage
    /// costs folded in.
    pub fn allocate<'s>(
        &self,
        sessions: impl IntoIterator<Item = &'s Session>,
        period: BillingPeriod,
        as_of: DateTime<Utc>,
    ) -> BillingResult<BTreeMap<NaiveDate, DailyCost>> {
        let mut sessions: Vec<&Session> = sessions.into_iter().collect();
        sessions.sort_by(|a, b| {
            a.resource_id
                .cmp(&b.resource_id)
                .then(a.start_time.cmp(&b.start_time))
        });

        // Price lookups fail before anything is accumulated.
        for session in &sessions {
            self.pricing.rate(&session.rate_class_at_start)?;
        }

        let mut days: BTreeMap<NaiveDate, DailyCost> =
            period.days().map(|d| (d, DailyCost::empty(d))).collect();
        let mut resource_spend: HashMap<u64, f64> = HashMap::new();

        for session in sessions {
            self.allocate_session(session, period, as_of, &mut days, &mut resource_spend)?;
        }

        if self.storage_enabled {
            self.add_storage(&mut days, period);
        }

        Ok(days)
    }

    fn allocate_session(
        &self,
        session: &Session,
        period: BillingPeriod,
        as_of: DateTime<Utc>,
        days: &mut BTreeMap<NaiveDate, DailyCost>,
        resource_spend: &mut HashMap<u64, f64>,
    ) -> BillingResult<()> {
        let rate = self.pricing.rate(&session.rate_class_at_start)?;

        let start = session.start_time.max(period.start());
        let end = session.effective_end(as_of).min(period.end());
        if start >= end {
            return Ok(());
        }

        let mut session_spend = 0.0;
        let mut day = start.date_naive();

        loop {
            let day_begin = day_start(day);
            if day_begin >= end {
                break;
            }
            let day_end = day_begin + Duration::days(1);
            let seg_start = start.max(day_begin);
            let seg_end = end.min(day_end);

            if seg_start < seg_end {
                let hours = hours_between(seg_start, seg_end);
                let raw = hours * rate.hourly_rate;
                let cost = match self.policy {
                    CapPolicy::PerSession => {
                        let cost = raw.min((rate.monthly_cap - session_spend).max(0.0));
                        session_spend += cost;
                        cost
                    }
                    CapPolicy::PerResourceMonth => {
                        let spent = resource_spend.entry(session.resource_id).or_insert(0.0);
                        let cost = raw.min((rate.monthly_cap - *spent).max(0.0));
                        *spent += cost;
                        cost
                    }
                    CapPolicy::DailyProrated => raw.min(rate.monthly_cap / 30.0),
                };

                let entry = days
                    .get_mut(&day)
                    .ok_or(BillingError::InvalidPeriod {
                        year: period.year(),
                        month: period.month(),
                    })?;
                entry.resource_cost += cost;
                entry.total_cost += cost;
                entry.line_items.push(LineItem {
                    resource: BillableResource::Instance { id: session.resource_id },
                    label: session.resource_label.clone(),
                    cost,
                    hours,
                });
                trace!(
                    resource_id = session.resource_id,
                    %day,
                    hours,
                    cost,
                    "Allocated day-segment"
                );
            }

            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        Ok(())
    }

    fn add_storage(&self, days: &mut BTreeMap<NaiveDate, DailyCost>, period: BillingPeriod) {
        let daily_fee = self.pricing.storage_base_fee / period.days_in_month() as f64;
        if daily_fee <= 0.0 {
            return;
        }
        for day in days.values_mut() {
            day.storage_cost += daily_fee;
            day.total_cost += daily_fee;
            day.line_items.push(LineItem {
                resource: BillableResource::ObjectStorage,
                label: "Object Storage".to_string(),
                cost: daily_fee,
                hours: 24.0,
            });
        }
    }
}
