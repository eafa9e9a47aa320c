//! Timestamp utilities

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert epoch milliseconds to a UTC timestamp (None if out of range)
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// True if `at` is strictly older than `retention` relative to `now`
pub fn is_expired(at: DateTime<Utc>, retention: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(at) > retention
}
