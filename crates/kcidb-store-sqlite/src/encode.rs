//! Encoding and decoding helpers between report values and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as UTC text with microsecond precision, so that
//! text order is time order. JSON fields are stored as compact JSON text.
//! Booleans are stored as integers.

use chrono::{DateTime, Utc};
use kcidb_core::io::IdValue;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::{Error, Result};

/// SQL expression producing the current time in the stored timestamp form.
pub const NOW_EXPR: &str = "strftime('%Y-%m-%dT%H:%M:%f000+00:00', 'now')";

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

/// Re-render any RFC 3339 timestamp in the stored form.
pub fn normalize_dt(s: &str) -> Result<String> { Ok(encode_dt(decode_dt(s)?)) }

// ─── JSON ────────────────────────────────────────────────────────────────────

pub fn encode_json(value: &Value) -> Result<String> { Ok(serde_json::to_string(value)?) }

pub fn decode_json(s: &str) -> Result<Value> { Ok(serde_json::from_str(s)?) }

// ─── Identities ──────────────────────────────────────────────────────────────

pub fn encode_id_value(value: &IdValue) -> SqlValue {
  match value {
    IdValue::Integer(n) => SqlValue::Integer(*n),
    IdValue::Text(s) => SqlValue::Text(s.clone()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_normalize_to_utc_micros() {
    assert_eq!(
      normalize_dt("2024-03-01T12:00:00+02:00").unwrap(),
      "2024-03-01T10:00:00.000000+00:00"
    );
    assert_eq!(
      normalize_dt("2024-03-01T10:00:00.123456Z").unwrap(),
      "2024-03-01T10:00:00.123456+00:00"
    );
  }

  #[test]
  fn bad_timestamp() {
    assert!(matches!(decode_dt("yesterday"), Err(Error::DateParse(_))));
  }
}
