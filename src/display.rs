//! Output Formatting and Display Management
//!
//! Renders billing results either as colored terminal reports or as JSON for
//! programmatic consumption.
//!
//! ## Report Types
//! - **Daily**: one row per day of the month, optionally with line items
//! - **Summary**: month-to-date cost, daily average and month-end projection
//! - **Sessions**: billable intervals per instance
//! - **Cache**: event cache freshness and degrade counters
//!
//! ### JSON Output
//! When JSON output is requested every report is wrapped in a single key:
//! ```json
//! {
//!   "daily": [
//!     {
//!       "date": "2025-09-01",
//!       "resourceCost": 0.18,
//!       "storageCost": 0.1667,
//!       "totalCost": 0.3467,
//!       "lineItems": []
//!     }
//!   ]
//! }
//! ```

use crate::models::{BillableResource, CacheStats, DailyCost, MonthlySummary, Session};
use crate::period::BillingPeriod;
use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;

pub struct ReportDisplayManager {
    json_pretty: bool,
    show_line_items: bool,
}

impl Default for ReportDisplayManager {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ReportDisplayManager {
    pub fn new(json_pretty: bool, show_line_items: bool) -> Self {
        Self {
            json_pretty,
            show_line_items,
        }
    }

    fn to_json<T: Serialize>(&self, key: &str, value: &T) -> Result<String> {
        let output = serde_json::json!({ key: value });
        let rendered = if self.json_pretty {
            serde_json::to_string_pretty(&output)?
        } else {
            serde_json::to_string(&output)?
        };
        Ok(rendered)
    }

    fn header(title: &str) {
        println!("\n{}", "=".repeat(80).bright_cyan());
        println!("{}", title.bright_white().bold());
        println!("{}", "=".repeat(80).bright_cyan());
    }

    pub fn display_daily(
        &self,
        days: &[DailyCost],
        period: BillingPeriod,
        json_output: bool,
    ) -> Result<()> {
        if json_output {
            println!("{}", self.to_json("daily", &days)?);
            return Ok(());
        }

        Self::header(&format!("Linode Billing - Daily Costs ({})", period));

        let total: f64 = days.iter().map(|d| d.total_cost).sum();
        let active = days.iter().filter(|d| d.total_cost > 0.0).count();
        println!(
            "\n{} {} days • {} with charges • {} total\n",
            "📊".bright_yellow(),
            days.len().to_string().bright_white().bold(),
            active.to_string().bright_white().bold(),
            format!("${:.2}", total).bright_green().bold()
        );

        for day in days {
            let cost = format!("${:.4}", day.total_cost);
            let cost = if day.total_cost > 0.0 {
                cost.bright_green().bold()
            } else {
                cost.dimmed()
            };
            println!(
                "{} {}  {}  (instances {}, storage {}, {:.1}h)",
                "📅".bright_blue(),
                day.date.to_string().bright_white().bold(),
                cost,
                format!("${:.4}", day.resource_cost).bright_white(),
                format!("${:.4}", day.storage_cost).bright_white(),
                day.instance_hours()
            );

            if self.show_line_items {
                for item in &day.line_items {
                    let resource = match &item.resource {
                        BillableResource::Instance { id } => format!("linode/{}", id),
                        BillableResource::ObjectStorage => "object-storage".to_string(),
                    };
                    println!(
                        "   {} {}: {} ({:.2}h)",
                        resource.bright_cyan(),
                        item.label,
                        format!("${:.4}", item.cost).bright_green(),
                        item.hours
                    );
                }
            }
        }
        println!();
        Ok(())
    }

    pub fn display_summary(&self, summary: &MonthlySummary, json_output: bool) -> Result<()> {
        if json_output {
            println!("{}", self.to_json("summary", summary)?);
            return Ok(());
        }

        Self::header(&format!(
            "Linode Billing - Monthly Summary ({}-{:02})",
            summary.year, summary.month
        ));
        println!(
            "\n   Month to date: {}",
            format!("${:.2}", summary.month_to_date_cost).bright_green().bold()
        );
        println!(
            "   Projected:     {}",
            format!("${:.2}", summary.projected_monthly_cost).bright_yellow().bold()
        );
        println!("   Daily average: {}", format!("${:.4}", summary.daily_average).bright_white());
        println!(
            "   Instances {} • Object storage {}",
            format!("${:.2}", summary.resource_cost).bright_white(),
            format!("${:.2}", summary.storage_cost).bright_white()
        );
        println!(
            "   Days: {} elapsed, {} remaining of {}\n",
            summary.days_elapsed.to_string().bright_white().bold(),
            summary.days_remaining.to_string().bright_white().bold(),
            summary.days_in_month
        );
        Ok(())
    }

    pub fn display_sessions(
        &self,
        sessions: &BTreeMap<u64, Vec<Session>>,
        now: DateTime<Utc>,
        json_output: bool,
    ) -> Result<()> {
        if json_output {
            println!("{}", self.to_json("sessions", sessions)?);
            return Ok(());
        }

        Self::header("Linode Billing - Sessions");
        if sessions.is_empty() {
            println!("\nNo billable sessions found.\n");
            return Ok(());
        }

        for (resource_id, list) in sessions {
            let label = list.first().map(|s| s.resource_label.as_str()).unwrap_or_default();
            let hours: f64 = list.iter().map(|s| s.duration_hours(now)).sum();
            println!(
                "\n{} {} ({}) • {} sessions • {:.1}h",
                "🖥".bright_blue(),
                label.bright_white().bold(),
                resource_id,
                list.len(),
                hours
            );
            for session in list {
                let end = match session.end_time {
                    Some(end) => end.format("%Y-%m-%d %H:%M").to_string(),
                    None => "running".bright_green().to_string(),
                };
                println!(
                    "   {} → {}  {:.2}h  [{}]",
                    session.start_time.format("%Y-%m-%d %H:%M"),
                    end,
                    session.duration_hours(now),
                    session.rate_class_at_start.bright_cyan()
                );
            }
        }
        println!();
        Ok(())
    }

    pub fn display_cache_stats(&self, stats: &CacheStats, json_output: bool) -> Result<()> {
        if json_output {
            println!("{}", self.to_json("cache", stats)?);
            return Ok(());
        }

        Self::header("Linode Billing - Event Cache");
        println!("\n   Last refresh: {}", stats.cache_age_display().bright_white().bold());
        println!("   Resources:    {}", stats.resource_count);
        println!("   Events:       {}", stats.total_events);
        if stats.degraded_refreshes > 0 {
            println!(
                "   {} {} refreshes served stale data",
                "⚠".bright_yellow(),
                stats.degraded_refreshes
            );
        }
        println!();
        Ok(())
    }
}
