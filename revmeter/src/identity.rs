//! Transaction ids and timing helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Fresh transaction id (uuid v4).
pub fn generate_transaction_id() -> String {
    Uuid::new_v4().to_string()
}

/// ISO-8601 with millisecond precision and a `Z` suffix, e.g. `2025-06-01T12:00:00.123Z`.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Milliseconds from `start` to `end`, clamped at zero if the wall clock stepped back.
pub fn calculate_duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}
