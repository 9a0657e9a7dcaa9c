//! Timestamp encoding shared by both stores.
//!
//! Both stores keep timestamps as ISO-8601 `TEXT`. The encoding is fixed
//! (UTC, millisecond precision, `Z` suffix) so that string comparison in
//! SQL (`expires_at > $now`) agrees with chronological order.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};

/// Encode a timestamp for storage.
pub fn to_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whether `at` encodes with a plain four-digit year.
///
/// Years past 9999 (or before 0) are written with a sign (`+10000-...`),
/// which sorts before every ordinary timestamp and does not decode.
pub fn is_storable(at: DateTime<Utc>) -> bool {
    (0..=9999).contains(&at.year())
}

/// Decode a stored timestamp.
///
/// Accepts any RFC 3339 offset, not just `Z`, so rows written by older
/// tooling still load.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|at| at.with_timezone(&Utc))
}
