//! Month-to-date totals and a naive linear month-end projection.

use crate::models::{DailyCost, MonthlySummary};
use crate::period::{day_start, BillingPeriod};
use chrono::{DateTime, Datelike, Utc};

/// Days of `period` that have elapsed as of `now`, counting today.
pub fn days_elapsed(period: BillingPeriod, now: DateTime<Utc>) -> u32 {
    if now >= period.end() {
        period.days_in_month()
    } else if now < period.start() {
        0
    } else {
        now.day()
    }
}

pub fn summarize(
    daily_costs: &[DailyCost],
    period: BillingPeriod,
    now: DateTime<Utc>,
) -> MonthlySummary {
    let days_in_month = period.days_in_month();
    let elapsed = days_elapsed(period, now);

    let to_date = daily_costs
        .iter()
        .filter(|d| period.contains(day_start(d.date)) && d.date.day() <= elapsed);

    let (mut total, mut resource, mut storage) = (0.0, 0.0, 0.0);
    for day in to_date {
        total += day.total_cost;
        resource += day.resource_cost;
        storage += day.storage_cost;
    }

    let daily_average = total / elapsed.max(1) as f64;
    let days_remaining = days_in_month.saturating_sub(elapsed);

    MonthlySummary {
        year: period.year(),
        month: period.month(),
        month_to_date_cost: total,
        projected_monthly_cost: total + daily_average * days_remaining as f64,
        days_in_month,
        days_elapsed: elapsed,
        days_remaining,
        daily_average,
        resource_cost: resource,
        storage_cost: storage,
    }
}
