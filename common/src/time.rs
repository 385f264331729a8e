//! Time utilities for RateCache.

use chrono::{DateTime, TimeZone, Utc};

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Convert Unix seconds (as reported by upstream providers) to a timestamp.
pub fn from_unix_seconds(seconds: i64) -> Option<Timestamp> {
    Utc.timestamp_opt(seconds, 0).single()
}

/// The Unix epoch, used as the open lower bound of date ranges.
pub fn epoch() -> Timestamp {
    DateTime::<Utc>::default()
}

/// Parse an RFC 3339 timestamp that explicitly names UTC with a trailing `Z`.
pub fn parse_utc_rfc3339(value: &str) -> Option<Timestamp> {
    if !value.ends_with('Z') {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
