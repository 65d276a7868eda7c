//! The column/table model: typed columns mapped onto SQLite storage, and the
//! statements and row conversions derived from them.
//!
//! Column names may be dotted (`environment.comment`) to denote a field of a
//! nested report object. Metadata columns (e.g. `_timestamp`) are not part
//! of report documents unless explicitly requested, and are generated by an
//! SQL expression when not supplied.

use chrono::{DateTime, Utc};
use kcidb_core::io::Object;
use rusqlite::{
  Row,
  types::{Value as SqlValue, ValueRef},
};
use serde_json::{Map, Number, Value};

use crate::{
  Error, Result,
  encode::{decode_json, encode_dt, encode_json, normalize_dt},
  sql::{quote, quote_list},
};

/// Name of the arrival-time metadata column.
pub const TIMESTAMP_COLUMN: &str = "_timestamp";

// ─── Columns ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
  Text,
  Integer,
  Real,
  Bool,
  Json,
  Timestamp,
}

impl ColumnType {
  fn sql_type(self) -> &'static str {
    match self {
      Self::Text | Self::Json | Self::Timestamp => "TEXT",
      Self::Integer | Self::Bool => "INTEGER",
      Self::Real => "REAL",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
  PrimaryKey,
  NotNull,
}

#[derive(Debug, Clone)]
pub struct Column {
  pub ty:            ColumnType,
  pub constraint:    Option<Constraint>,
  /// For metadata columns: the SQL expression generating the value.
  pub metadata_expr: Option<&'static str>,
}

impl Column {
  const fn of(ty: ColumnType) -> Self {
    Self { ty, constraint: None, metadata_expr: None }
  }

  pub const fn text() -> Self { Self::of(ColumnType::Text) }

  pub const fn integer() -> Self { Self::of(ColumnType::Integer) }

  pub const fn real() -> Self { Self::of(ColumnType::Real) }

  pub const fn bool() -> Self { Self::of(ColumnType::Bool) }

  pub const fn json() -> Self { Self::of(ColumnType::Json) }

  pub const fn timestamp() -> Self { Self::of(ColumnType::Timestamp) }

  pub const fn primary_key(mut self) -> Self {
    self.constraint = Some(Constraint::PrimaryKey);
    self
  }

  pub const fn not_null(mut self) -> Self {
    self.constraint = Some(Constraint::NotNull);
    self
  }

  pub const fn metadata(mut self, expr: &'static str) -> Self {
    self.metadata_expr = Some(expr);
    self
  }

  pub fn is_metadata(&self) -> bool { self.metadata_expr.is_some() }

  /// Column definition for `CREATE TABLE` / `ALTER TABLE .. ADD COLUMN`.
  /// Composite-key members get no inline constraint.
  pub fn format_def(&self, name: &str, in_composite_key: bool) -> String {
    let constraint = match (self.constraint, in_composite_key) {
      (_, true) => " NOT NULL",
      (Some(Constraint::PrimaryKey), false) => " PRIMARY KEY",
      (Some(Constraint::NotNull), false) => " NOT NULL",
      (None, false) => "",
    };
    format!("{} {}{constraint}", quote(name), self.ty.sql_type())
  }

  /// Convert a report value into its stored form.
  pub fn pack(&self, name: &str, value: Option<&Value>) -> Result<SqlValue> {
    let invalid = |reason: &str| Error::InvalidValue {
      column: name.to_owned(),
      reason: reason.to_owned(),
    };
    let value = match value {
      None | Some(Value::Null) => return Ok(SqlValue::Null),
      Some(value) => value,
    };
    Ok(match self.ty {
      ColumnType::Text => SqlValue::Text(
        value.as_str().ok_or_else(|| invalid("expected a string"))?.to_owned(),
      ),
      ColumnType::Integer => {
        SqlValue::Integer(value.as_i64().ok_or_else(|| invalid("expected an integer"))?)
      }
      ColumnType::Real => {
        SqlValue::Real(value.as_f64().ok_or_else(|| invalid("expected a number"))?)
      }
      ColumnType::Bool => SqlValue::Integer(i64::from(
        value.as_bool().ok_or_else(|| invalid("expected a boolean"))?,
      )),
      ColumnType::Json => SqlValue::Text(encode_json(value)?),
      ColumnType::Timestamp => SqlValue::Text(normalize_dt(
        value.as_str().ok_or_else(|| invalid("expected a timestamp string"))?,
      )?),
    })
  }

  /// Convert a stored value back into its report form.
  pub fn unpack(&self, name: &str, value: ValueRef<'_>) -> Result<Value> {
    let invalid = |found: &str| Error::InvalidValue {
      column: name.to_owned(),
      reason: format!("unexpected stored {found} for {:?} column", self.ty),
    };
    let text = |bytes: &[u8]| {
      std::str::from_utf8(bytes).map(str::to_owned).map_err(|_| invalid("non-UTF-8 text"))
    };
    Ok(match (self.ty, value) {
      (_, ValueRef::Null) => Value::Null,
      (ColumnType::Text, ValueRef::Text(t)) => Value::String(text(t)?),
      (ColumnType::Integer, ValueRef::Integer(n)) => Value::from(n),
      (ColumnType::Real, ValueRef::Real(x)) => {
        real_to_json(x).ok_or_else(|| invalid("non-finite real"))?
      }
      (ColumnType::Real, ValueRef::Integer(n)) => Value::from(n),
      (ColumnType::Bool, ValueRef::Integer(n)) => Value::Bool(n != 0),
      (ColumnType::Json, ValueRef::Text(t)) => decode_json(&text(t)?)?,
      (ColumnType::Timestamp, ValueRef::Text(t)) => Value::String(normalize_dt(&text(t)?)?),
      (_, ValueRef::Integer(_)) => return Err(invalid("integer")),
      (_, ValueRef::Real(_)) => return Err(invalid("real")),
      (_, ValueRef::Text(_)) => return Err(invalid("text")),
      (_, ValueRef::Blob(_)) => return Err(invalid("blob")),
    })
  }
}

/// REAL affinity stores every number as a float. Integral values within the
/// exactly representable range come back as JSON integers.
fn real_to_json(x: f64) -> Option<Value> {
  const EXACT: f64 = 9_007_199_254_740_992.0;
  if x.fract() == 0.0 && x.abs() <= EXACT {
    return Some(Value::from(x as i64));
  }
  Number::from_f64(x).map(Value::Number)
}

// ─── Tables ──────────────────────────────────────────────────────────────────

/// An ordered set of named columns plus an optional composite primary key.
#[derive(Debug, Clone)]
pub struct Table {
  columns:     Vec<(&'static str, Column)>,
  primary_key: Vec<&'static str>,
}

impl Table {
  pub fn new(columns: Vec<(&'static str, Column)>) -> Self {
    Self { columns, primary_key: Vec::new() }
  }

  /// Declare a composite primary key, overriding per-column markers.
  pub fn with_primary_key(mut self, key: &[&'static str]) -> Self {
    self.primary_key = key.to_vec();
    self
  }

  pub fn with_column(mut self, name: &'static str, column: Column) -> Self {
    self.columns.push((name, column));
    self
  }

  pub fn columns(&self) -> impl Iterator<Item = (&'static str, &Column)> {
    self.columns.iter().map(|(n, c)| (*n, c))
  }

  pub fn column(&self, name: &str) -> Option<&Column> {
    self.columns.iter().find(|(n, _)| *n == name).map(|(_, c)| c)
  }

  /// Columns present in report objects, plus metadata ones if requested.
  pub fn selected(&self, with_metadata: bool) -> impl Iterator<Item = (&'static str, &Column)> {
    self.columns().filter(move |(_, c)| with_metadata || !c.is_metadata())
  }

  /// The arrival-time column, if this table tracks arrival times.
  pub fn timestamp_column(&self) -> Option<&'static str> {
    self
      .columns()
      .find(|(n, c)| *n == TIMESTAMP_COLUMN && c.ty == ColumnType::Timestamp)
      .map(|(n, _)| n)
  }

  pub fn format_create(&self, name: &str) -> String {
    let composite = !self.primary_key.is_empty();
    let mut defs: Vec<String> = self
      .columns()
      .map(|(n, c)| c.format_def(n, composite && self.primary_key.contains(&n)))
      .collect();
    if composite {
      defs.push(format!(
        "PRIMARY KEY({})",
        quote_list(self.primary_key.iter().copied())
      ));
    }
    format!("CREATE TABLE {} (\n    {}\n)", quote(name), defs.join(",\n    "))
  }

  /// Insert template for [`pack`](Self::pack)ed rows. With `prio_db`, rows
  /// already in the database win key conflicts; otherwise new rows do.
  pub fn format_insert(&self, name: &str, prio_db: bool, with_metadata: bool) -> String {
    let verb = if prio_db { "INSERT OR IGNORE" } else { "INSERT OR REPLACE" };
    let values: Vec<String> = self
      .columns()
      .map(|(_, c)| match (c.metadata_expr, with_metadata) {
        (Some(expr), true) => format!("COALESCE(?, {expr})"),
        (Some(expr), false) => expr.to_owned(),
        (None, _) => "?".to_owned(),
      })
      .collect();
    format!(
      "{verb} INTO {} ({}) VALUES ({})",
      quote(name),
      quote_list(self.columns().map(|(n, _)| n)),
      values.join(", ")
    )
  }

  pub fn format_delete(&self, name: &str) -> String { format!("DELETE FROM {}", quote(name)) }

  /// Select every row, optionally limited to an arrival-time window
  /// (`after` exclusive, `until` inclusive).
  pub fn format_dump(
    &self,
    name: &str,
    with_metadata: bool,
    after: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
  ) -> Result<(String, Vec<SqlValue>)> {
    let mut sql = format!(
      "SELECT {} FROM {}",
      quote_list(self.selected(with_metadata).map(|(n, _)| n)),
      quote(name)
    );
    let mut params = Vec::new();
    if after.is_none() && until.is_none() {
      return Ok((sql, params));
    }

    let ts = quote(self.require_timestamps(name)?);
    let mut conds = Vec::new();
    for (op, bound) in [(">", after), ("<=", until)] {
      if let Some(bound) = bound {
        conds.push(format!("{ts} {op} ?"));
        params.push(SqlValue::Text(encode_dt(bound)));
      }
    }
    sql.push_str(&format!(" WHERE {} ORDER BY {ts}", conds.join(" AND ")));
    Ok((sql, params))
  }

  pub fn format_get_first_modified(&self, name: &str) -> Result<(String, Vec<SqlValue>)> {
    self.format_modified(name, "MIN", "first_modified")
  }

  pub fn format_get_last_modified(&self, name: &str) -> Result<(String, Vec<SqlValue>)> {
    self.format_modified(name, "MAX", "last_modified")
  }

  fn format_modified(
    &self,
    name: &str,
    aggregate: &str,
    alias: &str,
  ) -> Result<(String, Vec<SqlValue>)> {
    let ts = self.require_timestamps(name)?;
    Ok((
      format!(
        "SELECT ? AS table_name, {aggregate}({}) AS {alias} FROM {}",
        quote(ts),
        quote(name)
      ),
      vec![SqlValue::Text(name.to_owned())],
    ))
  }

  fn require_timestamps(&self, name: &str) -> Result<&'static str> {
    self.timestamp_column().ok_or_else(|| {
      Error::NoTimestamps(format!("table {name:?} has no {TIMESTAMP_COLUMN:?} column"))
    })
  }

  /// Flatten a report object into insert parameters, in the order
  /// [`format_insert`](Self::format_insert) expects.
  pub fn pack(&self, obj: &Object, with_metadata: bool) -> Result<Vec<SqlValue>> {
    self
      .columns()
      .filter(|(_, c)| with_metadata || !c.is_metadata())
      .map(|(n, c)| c.pack(n, lookup(obj, n)))
      .collect()
  }

  /// Rebuild a report object from a row selected with
  /// [`selected`](Self::selected) columns. With `drop_null`, NULL fields
  /// are omitted instead of materialized.
  pub fn unpack(&self, row: &Row<'_>, with_metadata: bool, drop_null: bool) -> Result<Object> {
    let mut obj = Object::new();
    for (index, (name, column)) in self.selected(with_metadata).enumerate() {
      let value = column.unpack(name, row.get_ref(index)?)?;
      if drop_null && value.is_null() {
        continue;
      }
      insert(&mut obj, name, value);
    }
    Ok(obj)
  }
}

/// Find the value for a (possibly dotted) column in a nested object,
/// falling back to a literally dotted key.
fn lookup<'a>(obj: &'a Object, name: &str) -> Option<&'a Value> {
  let mut parts = name.split('.');
  let first = parts.next()?;
  let nested = obj
    .get(first)
    .and_then(|root| parts.try_fold(root, |node, part| node.as_object()?.get(part)));
  nested.or_else(|| obj.get(name))
}

/// Store a value under a (possibly dotted) name, creating nested objects.
fn insert(obj: &mut Object, name: &str, value: Value) {
  match name.split_once('.') {
    None => {
      obj.insert(name.to_owned(), value);
    }
    Some((head, rest)) => {
      let child = obj
        .entry(head.to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
      if !child.is_object() {
        *child = Value::Object(Map::new());
      }
      if let Value::Object(child) = child {
        insert(child, rest, value);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use rusqlite::params_from_iter;
  use serde_json::json;

  use super::*;
  use crate::encode::NOW_EXPR;

  fn tests_table() -> Table {
    Table::new(vec![
      ("id", Column::text().primary_key()),
      ("origin", Column::text().not_null()),
      ("environment.comment", Column::text()),
      ("waived", Column::bool()),
      ("duration", Column::real()),
      ("start_time", Column::timestamp()),
      ("misc", Column::json()),
      (TIMESTAMP_COLUMN, Column::timestamp().metadata(NOW_EXPR)),
    ])
  }

  #[test]
  fn create_statement() {
    let sql = tests_table().format_create("tests");
    assert!(sql.starts_with("CREATE TABLE \"tests\" (\n    \"id\" TEXT PRIMARY KEY,\n"));
    assert!(sql.contains("\"environment.comment\" TEXT,"));
    assert!(sql.contains("\"waived\" INTEGER,"));
  }

  #[test]
  fn create_with_composite_key() {
    let table = Table::new(vec![
      ("id", Column::text().not_null()),
      ("version", Column::integer().not_null()),
      ("comment", Column::text()),
    ])
    .with_primary_key(&["id", "version"]);
    assert_eq!(
      table.format_create("issues"),
      "CREATE TABLE \"issues\" (\n    \"id\" TEXT NOT NULL,\n    \"version\" INTEGER NOT NULL,\n    \"comment\" TEXT,\n    PRIMARY KEY(\"id\", \"version\")\n)"
    );
  }

  #[test]
  fn insert_statement_fills_metadata() {
    let t = tests_table();
    let without = t.format_insert("tests", true, false);
    assert!(without.starts_with("INSERT OR IGNORE INTO \"tests\""));
    assert!(without.ends_with(&format!("?, ?, ?, ?, ?, ?, ?, {NOW_EXPR})")));

    let with = t.format_insert("tests", false, true);
    assert!(with.starts_with("INSERT OR REPLACE INTO"));
    assert!(with.ends_with(&format!("COALESCE(?, {NOW_EXPR}))")));
  }

  #[test]
  fn dump_window_needs_timestamps() {
    let plain = Table::new(vec![("id", Column::text().primary_key())]);
    let now = Utc::now();
    assert!(plain.format_dump("checkouts", false, None, None).is_ok());
    assert!(matches!(
      plain.format_dump("checkouts", false, Some(now), None),
      Err(Error::NoTimestamps(_))
    ));
    assert!(matches!(
      plain.format_get_last_modified("checkouts"),
      Err(Error::NoTimestamps(_))
    ));

    let (sql, params) = tests_table().format_dump("tests", false, Some(now), Some(now)).unwrap();
    assert!(sql.ends_with("WHERE \"_timestamp\" > ? AND \"_timestamp\" <= ? ORDER BY \"_timestamp\""));
    assert!(!sql.contains("\"_timestamp\", "));
    assert_eq!(params.len(), 2);
  }

  #[test]
  fn pack_flattens_nested_fields() {
    let obj = json!({
      "id": "origin:t1",
      "origin": "origin",
      "environment": {"comment": "VM"},
      "waived": true,
      "duration": 3,
      "start_time": "2024-01-01T00:00:00Z",
      "misc": {"answer": 42},
    });
    let row = tests_table().pack(obj.as_object().unwrap(), false).unwrap();
    assert_eq!(row, vec![
      SqlValue::Text("origin:t1".into()),
      SqlValue::Text("origin".into()),
      SqlValue::Text("VM".into()),
      SqlValue::Integer(1),
      SqlValue::Real(3.0),
      SqlValue::Text("2024-01-01T00:00:00.000000+00:00".into()),
      SqlValue::Text("{\"answer\":42}".into()),
    ]);
  }

  #[test]
  fn pack_accepts_dotted_keys_and_rejects_bad_types() {
    let t = tests_table();
    let obj = json!({"id": "x", "origin": "o", "environment.comment": "flat"});
    let row = t.pack(obj.as_object().unwrap(), false).unwrap();
    assert_eq!(row[2], SqlValue::Text("flat".into()));

    let obj = json!({"id": "x", "origin": "o", "waived": "yes"});
    assert!(matches!(
      t.pack(obj.as_object().unwrap(), false),
      Err(Error::InvalidValue { ref column, .. }) if column == "waived"
    ));
  }

  #[test]
  fn integral_reals_unpack_as_integers() {
    assert_eq!(real_to_json(3.0), Some(json!(3)));
    assert_eq!(real_to_json(-2.0), Some(json!(-2)));
    assert_eq!(real_to_json(1.5), Some(json!(1.5)));
    assert_eq!(real_to_json(1e300), Some(json!(1e300)));
    assert_eq!(real_to_json(f64::NAN), None);
  }

  #[test]
  fn unpack_rebuilds_nesting() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let t = tests_table();
    conn.execute(&t.format_create("tests"), []).unwrap();
    let obj = json!({
      "id": "origin:t1",
      "origin": "origin",
      "environment": {"comment": "VM"},
      "waived": false,
      "misc": [1, 2],
    });
    conn
      .execute(
        &t.format_insert("tests", false, false),
        params_from_iter(t.pack(obj.as_object().unwrap(), false).unwrap()),
      )
      .unwrap();

    let (sql, _) = t.format_dump("tests", false, None, None).unwrap();
    let dropped = conn.query_row(&sql, [], |row| Ok(t.unpack(row, false, true))).unwrap().unwrap();
    assert_eq!(Value::Object(dropped), obj);

    let kept = conn.query_row(&sql, [], |row| Ok(t.unpack(row, false, false))).unwrap().unwrap();
    assert_eq!(kept["duration"], Value::Null);
    assert!(!kept.contains_key(TIMESTAMP_COLUMN));

    let (sql, _) = t.format_dump("tests", true, None, None).unwrap();
    let meta = conn.query_row(&sql, [], |row| Ok(t.unpack(row, true, true))).unwrap().unwrap();
    assert!(meta[TIMESTAMP_COLUMN].as_str().unwrap().ends_with("+00:00"));
  }
}
