//! [`Connection`]: a narrow wrapper around one SQLite connection.
//!
//! Exposes scoped transactions, the out-of-band schema version marker
//! (`PRAGMA user_version`), the database's current time, and the private
//! load-priority flag used to settle key conflicts on repeated loads.

use std::{cell::Cell, str::FromStr};

use chrono::{DateTime, Utc};
use kcidb_core::Version;
use rand_core::{OsRng, RngCore};

use crate::{
  Error, Result,
  encode::{NOW_EXPR, decode_dt},
};

/// Documentation of the connection parameter string.
pub const PARAMS_DOC: &str = "\
Parameters: <DATABASE>

<DATABASE>      A path to the database file, absolute or relative to the
                current directory. Use \":memory:\" for an in-memory
                database.

                If it starts with an exclamation mark ('!'), rows already in
                the database win key conflicts on the first load, instead of
                a randomly chosen side. Double it to include one literally.
";

// ─── Parameters ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
  pub database: String,
  /// Forced initial load priority; `None` to pick randomly.
  pub prio_db:  Option<bool>,
}

impl FromStr for ConnectionParams {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let (database, prio_db) = match s.strip_prefix('!') {
      Some(rest) if rest.starts_with('!') => (rest, None),
      Some(rest) => (rest, Some(true)),
      None => (s, None),
    };
    if database.is_empty() {
      return Err(Error::InvalidParams(format!(
        "database must be specified\n\n{PARAMS_DOC}"
      )));
    }
    Ok(Self { database: database.to_owned(), prio_db })
  }
}

// ─── Connection ──────────────────────────────────────────────────────────────

/// A single SQLite connection. Not for concurrent use: it owns one
/// transaction context at a time.
pub struct Connection {
  conn:         rusqlite::Connection,
  load_prio_db: Cell<bool>,
}

fn log_statement(sql: &str) {
  tracing::debug!(target: "kcidb_store_sqlite::sql", "executing:\n{sql}");
}

impl Connection {
  /// Open a connection, drawing the initial load priority from the OS.
  pub fn open(params: &str) -> Result<Self> { Self::open_with_rng(params, &mut OsRng) }

  /// Open a connection, drawing the initial load priority from `rng`
  /// unless the parameters force it.
  pub fn open_with_rng<R: RngCore + ?Sized>(params: &str, rng: &mut R) -> Result<Self> {
    let params: ConnectionParams = params.parse()?;
    let load_prio_db = params.prio_db.unwrap_or_else(|| rng.next_u32() & 1 == 1);

    let mut conn = rusqlite::Connection::open(&params.database)?;
    conn.trace(Some(log_statement));
    tracing::debug!(database = %params.database, load_prio_db, "opened connection");

    Ok(Self { conn, load_prio_db: Cell::new(load_prio_db) })
  }

  pub fn close(self) -> Result<()> {
    self.conn.close().map_err(|(_, e)| Error::Database(e))
  }

  /// Run `f` inside a transaction, committing if it succeeds and rolling
  /// back otherwise.
  pub(crate) fn with_transaction<T>(
    &self,
    f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
  ) -> Result<T> {
    let tx = self.conn.unchecked_transaction()?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
  }

  /// Retrieve the schema version, or `None` if uninitialized.
  pub fn get_schema_version(&self) -> Result<Option<Version>> {
    read_version(&self.conn)
  }

  /// Set (or with `None`, remove) the schema version in its own
  /// transaction. Does not touch data or the actual schema.
  pub fn set_schema_version(&self, version: Option<Version>) -> Result<()> {
    self.with_transaction(|tx| write_version(tx, version))
  }

  /// The current time according to the database.
  pub fn get_current_time(&self) -> Result<DateTime<Utc>> {
    let now: String = self.conn.query_row(&format!("SELECT {NOW_EXPR}"), [], |r| r.get(0))?;
    decode_dt(&now)
  }

  /// True if rows already in the database win key conflicts on the next
  /// load.
  pub(crate) fn load_prio_db(&self) -> bool { self.load_prio_db.get() }

  #[cfg(test)]
  pub(crate) fn set_load_prio_db(&self, prio_db: bool) { self.load_prio_db.set(prio_db) }

  /// Alternate load priority, approximating the "any row wins" semantics of
  /// warehouses without last-write-wins guarantees.
  pub(crate) fn flip_load_prio_db(&self) { self.load_prio_db.set(!self.load_prio_db.get()) }
}

pub(crate) fn read_version(conn: &rusqlite::Connection) -> Result<Option<Version>> {
  let number: i64 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
  Ok(Version::decode(number)?)
}

pub(crate) fn write_version(conn: &rusqlite::Connection, version: Option<Version>) -> Result<()> {
  let number = version.map(Version::encode).transpose()?.unwrap_or(0);
  conn.pragma_update(None, "user_version", number)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tests::FixedRng;

  #[test]
  fn params_parsing() {
    let p: ConnectionParams = ":memory:".parse().unwrap();
    assert_eq!(p, ConnectionParams { database: ":memory:".into(), prio_db: None });

    let p: ConnectionParams = "!db.sqlite3".parse().unwrap();
    assert_eq!(p, ConnectionParams { database: "db.sqlite3".into(), prio_db: Some(true) });

    let p: ConnectionParams = "!!db.sqlite3".parse().unwrap();
    assert_eq!(p, ConnectionParams { database: "!db.sqlite3".into(), prio_db: None });

    assert!(matches!("".parse::<ConnectionParams>(), Err(Error::InvalidParams(_))));
    assert!(matches!("!".parse::<ConnectionParams>(), Err(Error::InvalidParams(_))));
  }

  #[test]
  fn priority_comes_from_rng_unless_forced() {
    let conn = Connection::open_with_rng(":memory:", &mut FixedRng(1)).unwrap();
    assert!(conn.load_prio_db());
    let conn = Connection::open_with_rng(":memory:", &mut FixedRng(2)).unwrap();
    assert!(!conn.load_prio_db());
    let conn = Connection::open_with_rng("!:memory:", &mut FixedRng(2)).unwrap();
    assert!(conn.load_prio_db());
  }

  #[test]
  fn flip_alternates() {
    let conn = Connection::open_with_rng(":memory:", &mut FixedRng(0)).unwrap();
    conn.flip_load_prio_db();
    assert!(conn.load_prio_db());
    conn.flip_load_prio_db();
    assert!(!conn.load_prio_db());
  }

  #[test]
  fn schema_version_marker() {
    let conn = Connection::open(":memory:").unwrap();
    assert_eq!(conn.get_schema_version().unwrap(), None);
    conn.set_schema_version(Some(Version::new(4, 1))).unwrap();
    assert_eq!(conn.get_schema_version().unwrap(), Some(Version::new(4, 1)));
    conn.set_schema_version(None).unwrap();
    assert_eq!(conn.get_schema_version().unwrap(), None);
  }

  #[test]
  fn current_time_is_recent() {
    let conn = Connection::open(":memory:").unwrap();
    let db_now = conn.get_current_time().unwrap();
    let delta = (Utc::now() - db_now).num_seconds().abs();
    assert!(delta < 60, "database time is {delta}s off");
  }
}
