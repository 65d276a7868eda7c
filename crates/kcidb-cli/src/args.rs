//! Parsers for structured command-line values.

use chrono::{DateTime, Utc};
use kcidb_core::io::{Id, IdKind, IdValue};

/// Parse `LIST=TIME`, with an RFC 3339 time.
pub fn parse_bound(s: &str) -> Result<(String, DateTime<Utc>), String> {
  let (list, time) = split_list(s)?;
  let time = DateTime::parse_from_rfc3339(time)
    .map_err(|e| format!("invalid time {time:?}: {e}"))?
    .with_timezone(&Utc);
  Ok((list.to_owned(), time))
}

/// Parse `LIST=ID`.
pub fn parse_list_id(s: &str) -> Result<(String, Id), String> {
  let (list, id) = split_list(s)?;
  Ok((list.to_owned(), parse_id(id)?))
}

/// Parse a comma-separated identity tuple. A component in double quotes is
/// text; otherwise a component written exactly as an `i64` prints is an
/// integer and anything else is text.
pub fn parse_id(s: &str) -> Result<Id, String> {
  if s.is_empty() {
    return Err("empty identity".to_owned());
  }
  Ok(s.split(',').map(parse_component).collect())
}

fn parse_component(part: &str) -> IdValue {
  if let Some(text) = part.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
    return IdValue::from(text);
  }
  match part.parse::<i64>() {
    Ok(n) if n.to_string() == part => IdValue::from(n),
    _ => IdValue::from(part),
  }
}

/// Convert integer components where the list declares a text field. Other
/// mismatches are left for the store to reject.
pub fn coerce_id(id: Id, kinds: &[IdKind]) -> Id {
  id.into_iter()
    .enumerate()
    .map(|(i, value)| match (value, kinds.get(i)) {
      (IdValue::Integer(n), Some(IdKind::Text)) => IdValue::Text(n.to_string()),
      (value, _) => value,
    })
    .collect()
}

fn split_list(s: &str) -> Result<(&str, &str), String> {
  match s.split_once('=') {
    Some((list, rest)) if !list.is_empty() => Ok((list, rest)),
    _ => Err(format!("expected LIST=VALUE, got {s:?}")),
  }
}
