//! Timestamp parsing and formatting.
//!
//! Events are timestamped in UTC. Inputs may be RFC 3339 (`...Z`, `...+02:00`),
//! naive ISO 8601 (`2024-05-01T03:15:00.250`, read as UTC) or the ClickHouse
//! text form (`2024-05-01 03:15:00.250`).

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

use crate::EventError;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EventError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(EventError::InvalidTimestamp(raw.to_string()))
}

/// RFC 3339 with only as many fractional digits as needed.
pub fn format_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// `YYYY-MM-DD hh:mm:ss.fff`, the text form a `DateTime64(3)` column accepts.
pub fn format_clickhouse(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub(crate) fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_rfc3339(ts))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}
