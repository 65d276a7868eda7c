//! The chain of database schema versions.
//!
//! Each [`Schema`] is an immutable record: its version, the report version it
//! accepts and produces, its tables in dump order, and the per-type base
//! statements of the OO view. Every version after the first carries an
//! inherit step that brings a database at the previous version up to this
//! one by adding tables or columns, never removing data.
//!
//! The persisted version marker lives out-of-band in `PRAGMA user_version`;
//! see [`Connection`](crate::Connection).

use std::{collections::BTreeMap, sync::LazyLock};

use kcidb_core::{Version, io::IoSchema};

use crate::{Connection, Error, Result, connection::write_version, table::Table};

mod v04_00;
mod v04_01;
mod v04_02;

/// Upgrade step: `(conn, previous, this)`. Runs inside the caller's
/// transaction.
pub type InheritFn = fn(&rusqlite::Connection, &Schema, &Schema) -> Result<()>;

pub struct Schema {
  pub version:       Version,
  /// The report document version this schema stores.
  pub io:            &'static IoSchema,
  /// Tables, in dump order.
  pub tables:        Vec<(&'static str, Table)>,
  /// Base statement of every OO object type, projecting stored columns onto
  /// the type's fields.
  pub oo_statements: BTreeMap<&'static str, String>,
  inherit:           Option<InheritFn>,
}

static CHAIN: LazyLock<Vec<Schema>> = LazyLock::new(|| {
  let v4_0 = v04_00::schema();
  let v4_1 = v04_01::schema(&v4_0);
  let v4_2 = v04_02::schema(&v4_1);
  vec![v4_0, v4_1, v4_2]
});

/// Every schema version, oldest first.
pub fn chain() -> &'static [Schema] { &CHAIN }

/// The schema new databases are created with.
pub fn latest() -> &'static Schema {
  // The chain is a non-empty literal.
  &CHAIN[CHAIN.len() - 1]
}

pub fn find(version: Version) -> Result<&'static Schema> {
  chain()
    .iter()
    .find(|s| s.version == version)
    .ok_or(Error::UnknownSchemaVersion(version))
}

impl Schema {
  pub fn table(&self, name: &str) -> Option<&Table> {
    self.tables.iter().find(|(n, _)| *n == name).map(|(_, t)| t)
  }

  /// True if every table records row arrival times.
  pub fn has_timestamps(&self) -> bool {
    self.tables.iter().all(|(_, t)| t.timestamp_column().is_some())
  }

  /// The version this one inherits from, if any.
  pub fn previous(&self) -> Option<&'static Schema> {
    chain().iter().rev().find(|s| s.version < self.version)
  }

  /// Create every table on an empty database and mark it with this version.
  pub fn init(&self, conn: &Connection) -> Result<()> {
    conn.with_transaction(|tx| {
      self.create_tables(tx)?;
      write_version(tx, Some(self.version))
    })
  }

  /// Drop every table and clear the version marker.
  pub fn cleanup(&self, conn: &Connection) -> Result<()> {
    conn.with_transaction(|tx| {
      self.drop_tables(tx)?;
      write_version(tx, None)
    })
  }

  /// Delete every row, keeping the tables.
  pub fn empty(&self, conn: &Connection) -> Result<()> {
    conn.with_transaction(|tx| self.delete_rows(tx))
  }

  /// Bring a database at the previous version up to this one and mark it
  /// with this version.
  pub fn inherit(&self, conn: &Connection) -> Result<()> {
    conn.with_transaction(|tx| {
      self.inherit_in(tx)?;
      write_version(tx, Some(self.version))
    })
  }

  fn create_tables(&self, conn: &rusqlite::Connection) -> Result<()> {
    for (name, table) in &self.tables {
      conn
        .execute(&table.format_create(name), [])
        .map_err(Error::table("create", name))?;
    }
    Ok(())
  }

  fn drop_tables(&self, conn: &rusqlite::Connection) -> Result<()> {
    for (name, _) in &self.tables {
      conn
        .execute(&format!("DROP TABLE IF EXISTS {}", crate::sql::quote(name)), [])
        .map_err(Error::table("drop", name))?;
    }
    Ok(())
  }

  fn delete_rows(&self, conn: &rusqlite::Connection) -> Result<()> {
    for (name, table) in &self.tables {
      conn
        .execute(&table.format_delete(name), [])
        .map_err(Error::table("empty", name))?;
    }
    Ok(())
  }

  fn inherit_in(&self, conn: &rusqlite::Connection) -> Result<()> {
    match (self.inherit, self.previous()) {
      (Some(step), Some(prev)) => step(conn, prev, self),
      _ => Err(Error::NoPredecessor(self.version)),
    }
  }
}

// ─── Shared inherit steps ────────────────────────────────────────────────────

/// Create the tables `this` declares and `prev` lacks.
fn create_missing_tables(
  conn: &rusqlite::Connection,
  prev: &Schema,
  this: &Schema,
) -> Result<()> {
  for (name, table) in &this.tables {
    if prev.table(name).is_none() {
      tracing::info!(table = name, version = %this.version, "creating table");
      conn
        .execute(&table.format_create(name), [])
        .map_err(Error::table("create", name))?;
    }
  }
  Ok(())
}

/// Add the columns `this` declares and `prev` lacks to existing tables.
/// Metadata columns are filled in for existing rows from their expression.
fn add_missing_columns(
  conn: &rusqlite::Connection,
  prev: &Schema,
  this: &Schema,
) -> Result<()> {
  for (name, table) in &this.tables {
    let Some(prev_table) = prev.table(name) else { continue };
    for (column_name, column) in table.columns() {
      if prev_table.column(column_name).is_some() {
        continue;
      }
      tracing::info!(table = name, column = column_name, version = %this.version, "adding column");
      let quoted = crate::sql::quote(name);
      conn
        .execute(
          &format!("ALTER TABLE {quoted} ADD COLUMN {}", column.format_def(column_name, false)),
          [],
        )
        .map_err(Error::table("alter", name))?;
      if let Some(expr) = column.metadata_expr {
        conn
          .execute(
            &format!("UPDATE {quoted} SET {} = {expr}", crate::sql::quote(column_name)),
            [],
          )
          .map_err(Error::table("update", name))?;
      }
    }
  }
  Ok(())
}
