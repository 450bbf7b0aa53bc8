//! Timestamp parsing and formatting shared by the parser, the store and the
//! response shapes.
//!
//! The store keeps unix seconds; everything user-facing uses the fixed
//! `YYYY-MM-DD HH:MM:SS` (UTC) form found in directory documents.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serializer;

/// The textual timestamp format used in documents and responses.
pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a `YYYY-MM-DD HH:MM:SS` timestamp as found in directory documents.
pub fn parse_document_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse a user-supplied date bound.
///
/// Accepts the document format, ISO 8601 with a `T` separator (with or
/// without a trailing `Z`) and a bare date (midnight). Anything else is
/// `None`; callers treat that as "bound absent".
pub fn parse_bound(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(ts) = parse_document_time(value) {
        return Some(ts);
    }
    let iso = value.strip_suffix('Z').unwrap_or(value);
    if let Ok(naive) = NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S")
    {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(FORMAT).to_string()
}

pub fn to_unix(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp()
}

/// Convert stored unix seconds back into a timestamp.
///
/// Out-of-range values collapse to the epoch; the store only ever holds
/// values produced by [`to_unix`].
pub fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

pub fn serialize<S: Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(ts))
}

pub fn serialize_opt<S: Serializer>(
    ts: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => serializer.serialize_str(&format(ts)),
        None => serializer.serialize_none(),
    }
}
