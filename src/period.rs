//! Calendar-month billing periods in UTC.

use crate::error::{BillingError, BillingResult};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    pub fn new(year: i32, month: u32) -> BillingResult<Self> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(BillingError::InvalidPeriod { year, month });
        }
        // The following month must also be representable.
        let period = Self { year, month };
        if period.next_first_day().is_none() {
            return Err(BillingError::InvalidPeriod { year, month });
        }
        Ok(period)
    }

    /// The period containing `instant`.
    pub fn containing(instant: DateTime<Utc>) -> Self {
        Self {
            year: instant.year(),
            month: instant.month(),
        }
    }

    /// Parse `YYYY-MM`.
    pub fn parse(value: &str) -> BillingResult<Self> {
        let invalid = || BillingError::InvalidPeriod { year: 0, month: 0 };
        let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| BillingError::InvalidPeriod { year, month: 0 })?;
        Self::new(year, month)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    fn next_first_day(&self) -> Option<NaiveDate> {
        if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)
        }
    }

    /// Inclusive start of the month.
    pub fn start(&self) -> DateTime<Utc> {
        day_start(self.first_day())
    }

    /// Exclusive end of the month (midnight of the following month).
    pub fn end(&self) -> DateTime<Utc> {
        day_start(self.next_first_day().unwrap_or(NaiveDate::MAX))
    }

    pub fn days_in_month(&self) -> u32 {
        (self.end() - self.start()).num_days() as u32
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.first_day().iter_days().take(self.days_in_month() as usize)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start() && instant < self.end()
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Midnight UTC of `date`.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
