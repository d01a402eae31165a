use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Handles parsing timestamps from the formats the Linode API emits
pub struct TimestampParser;

impl TimestampParser {
    /// Parse a timestamp string into a DateTime<Utc>
    /// The API sends zone-less `2025-08-30T20:00:00`, which is UTC
    pub fn parse(timestamp_str: &str) -> Result<DateTime<Utc>> {
        let timestamp = timestamp_str.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
            return Ok(dt.with_timezone(&Utc));
        }

        // Try parsing as naive datetime and assume UTC
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(timestamp, format) {
                return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
        }

        anyhow::bail!("Failed to parse timestamp: {}", timestamp_str)
    }

    /// Format for the API's `X-Filter` comparisons, which expect the
    /// zone-less form.
    pub fn format_filter(instant: DateTime<Utc>) -> String {
        instant.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}
