//! [`SqliteStore`]: the SQLite implementation of [`ReportStore`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use kcidb_core::{
  Version,
  io::{IoSchema, Object, Report},
  orm::{self, OoData, Pattern},
  store::{DumpParams, QueryParams, ReportStore, TimeBounds},
};
use rand_core::RngCore;
use rusqlite::{params_from_iter, types::Value as SqlValue};
use serde::Deserialize;

use crate::{
  Connection, Error, Result,
  encode::decode_dt,
  oo,
  query::IdQuery,
  schema::{self, Schema},
  table::Table,
};

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
  /// Skip full validation of produced reports and OO results. The version
  /// stamp of every produced report is still checked.
  pub light_checks: bool,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A report store bound to one SQLite database and the schema version it is
/// initialized at.
pub struct SqliteStore {
  conn:    Connection,
  schema:  Option<&'static Schema>,
  options: StoreOptions,
}

impl SqliteStore {
  /// Open a store from connection parameters (see
  /// [`PARAMS_DOC`](crate::connection::PARAMS_DOC)).
  pub fn open(params: &str) -> Result<Self> {
    Self::from_connection(Connection::open(params)?, StoreOptions::default())
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self> { Self::open(":memory:") }

  pub fn open_with_options(params: &str, options: StoreOptions) -> Result<Self> {
    Self::from_connection(Connection::open(params)?, options)
  }

  /// Open a store drawing its initial load priority from `rng`.
  pub fn open_with_rng<R: RngCore + ?Sized>(
    params: &str,
    rng: &mut R,
    options: StoreOptions,
  ) -> Result<Self> {
    Self::from_connection(Connection::open_with_rng(params, rng)?, options)
  }

  /// Bind the schema matching the stored version marker, if any.
  pub fn from_connection(conn: Connection, options: StoreOptions) -> Result<Self> {
    let schema = conn.get_schema_version()?.map(schema::find).transpose()?;
    Ok(Self { conn, schema, options })
  }

  pub fn close(self) -> Result<()> { self.conn.close() }

  pub fn connection(&self) -> &Connection { &self.conn }

  pub fn options(&self) -> &StoreOptions { &self.options }

  /// The schema version, or `None` if uninitialized.
  pub fn version(&self) -> Option<Version> { self.schema.map(|s| s.version) }

  pub fn is_initialized(&self) -> bool { self.schema.is_some() }

  /// The bound schema.
  pub fn schema(&self) -> Result<&'static Schema> { self.schema.ok_or(Error::Uninitialized) }

  /// Initialize an empty database at `version`, or the latest one.
  pub fn init_version(&mut self, version: Option<Version>) -> Result<()> {
    if let Some(current) = self.schema {
      return Err(Error::AlreadyInitialized(current.version));
    }
    let target = target_schema(version)?;
    target.init(&self.conn)?;
    tracing::info!(version = %target.version, "initialized database");
    self.schema = Some(target);
    Ok(())
  }

  /// Upgrade the database in place to `version`, or the latest one, one
  /// chain step per transaction.
  pub fn upgrade(&mut self, version: Option<Version>) -> Result<()> {
    let current = self.schema()?;
    let target = target_schema(version)?;
    if target.version.major != current.version.major || target.version < current.version {
      return Err(Error::IncompatibleSchema {
        current: current.version,
        target:  target.version,
      });
    }

    let steps = schema::chain()
      .iter()
      .filter(|s| s.version > current.version && s.version <= target.version);
    for step in steps {
      step.inherit(&self.conn)?;
      tracing::info!(version = %step.version, "upgraded database");
      self.schema = Some(step);
    }
    Ok(())
  }

  /// Stream rows of one statement through `chunker`.
  fn stream<F>(
    tx: &rusqlite::Connection,
    name: &str,
    table: &Table,
    (sql, params): (String, Vec<SqlValue>),
    with_metadata: bool,
    chunker: &mut Chunker<F>,
  ) -> Result<()>
  where
    F: FnMut(Report) -> Result<()>,
  {
    let mut stmt = tx.prepare(&sql).map_err(Error::table("select from", name))?;
    let mut rows = stmt.query(params_from_iter(params)).map_err(Error::table("select from", name))?;
    while let Some(row) = rows.next().map_err(Error::table("select from", name))? {
      chunker.push(name, table.unpack(row, with_metadata, true)?)?;
    }
    Ok(())
  }

  fn modified(
    &self,
    format: fn(&Table, &str) -> Result<(String, Vec<SqlValue>)>,
  ) -> Result<TimeBounds> {
    let schema = self.schema()?;
    self.conn.with_transaction(|tx| {
      let mut bounds = TimeBounds::new();
      for (name, table) in &schema.tables {
        let (sql, params) = format(table, name)?;
        let time: Option<String> = tx
          .query_row(&sql, params_from_iter(params), |row| row.get(1))
          .map_err(Error::table("select from", name))?;
        if let Some(time) = time {
          bounds.insert((*name).to_owned(), decode_dt(&time)?);
        }
      }
      Ok(bounds)
    })
  }
}

fn target_schema(version: Option<Version>) -> Result<&'static Schema> {
  version.map_or_else(|| Ok(schema::latest()), schema::find)
}

// ─── Chunking ────────────────────────────────────────────────────────────────

/// Accumulates objects into reports of at most `limit` objects (zero for no
/// limit), checking and handing each to the sink.
struct Chunker<F> {
  io:           &'static IoSchema,
  limit:        usize,
  light_checks: bool,
  report:       Report,
  count:        usize,
  sink:         F,
}

impl<F> Chunker<F>
where
  F: FnMut(Report) -> Result<()>,
{
  fn new(io: &'static IoSchema, limit: usize, light_checks: bool, sink: F) -> Self {
    Self { io, limit, light_checks, report: io.new_report(), count: 0, sink }
  }

  fn push(&mut self, list: &str, obj: Object) -> Result<()> {
    self.report.lists.entry(list.to_owned()).or_default().push(obj);
    self.count += 1;
    if self.limit > 0 && self.count >= self.limit {
      self.flush()?;
    }
    Ok(())
  }

  fn flush(&mut self) -> Result<()> {
    if self.count == 0 {
      return Ok(());
    }
    let report = std::mem::replace(&mut self.report, self.io.new_report());
    self.count = 0;
    if !self.io.is_compatible_exactly(&report) {
      return Err(Error::Core(kcidb_core::Error::IncompatibleReport {
        found:    report.version,
        expected: self.io.version,
      }));
    }
    if !self.light_checks {
      self.io.validate(&report)?;
    }
    tracing::debug!(objects = report.object_count(), "emitting report");
    (self.sink)(report)
  }

  /// Emit the trailing partial report, if any.
  fn finish(mut self) -> Result<()> { self.flush() }
}

// ─── ReportStore impl ────────────────────────────────────────────────────────

impl ReportStore for SqliteStore {
  type Error = Error;

  fn init(&mut self) -> Result<()> { self.init_version(None) }

  fn cleanup(&mut self) -> Result<()> {
    let schema = self.schema()?;
    schema.cleanup(&self.conn)?;
    tracing::info!(version = %schema.version, "cleaned up database");
    self.schema = None;
    Ok(())
  }

  fn empty(&self) -> Result<()> {
    let schema = self.schema()?;
    schema.empty(&self.conn)?;
    tracing::info!(version = %schema.version, "emptied database");
    Ok(())
  }

  fn get_current_time(&self) -> Result<DateTime<Utc>> { self.conn.get_current_time() }

  fn get_first_modified(&self) -> Result<TimeBounds> {
    self.modified(Table::format_get_first_modified)
  }

  fn get_last_modified(&self) -> Result<TimeBounds> {
    self.modified(Table::format_get_last_modified)
  }

  fn dump_iter<F>(&self, params: &DumpParams, sink: F) -> Result<()>
  where
    F: FnMut(Report) -> Result<()>,
  {
    let schema = self.schema()?;
    for name in params.after.keys().chain(params.until.keys()) {
      schema.io.list(name)?;
    }
    if !(params.after.is_empty() && params.until.is_empty()) && !schema.has_timestamps() {
      return Err(Error::NoTimestamps(format!(
        "schema {} does not record arrival times",
        schema.version
      )));
    }

    self.conn.with_transaction(|tx| {
      let mut chunker =
        Chunker::new(schema.io, params.objects_per_report, self.options.light_checks, sink);
      for (name, table) in &schema.tables {
        let statement = table.format_dump(
          name,
          params.with_metadata,
          params.after.get(*name).copied(),
          params.until.get(*name).copied(),
        )?;
        Self::stream(tx, name, table, statement, params.with_metadata, &mut chunker)?;
      }
      chunker.finish()
    })
  }

  fn query_iter<F>(&self, params: &QueryParams, sink: F) -> Result<()>
  where
    F: FnMut(Report) -> Result<()>,
  {
    let schema = self.schema()?;
    let query = IdQuery::compile(schema.io, &params.ids, params.children, params.parents)?;

    self.conn.with_transaction(|tx| {
      let mut chunker =
        Chunker::new(schema.io, params.objects_per_report, self.options.light_checks, sink);
      for (name, table) in &schema.tables {
        if let Some(statement) = query.format_fetch(name, table, params.with_metadata)? {
          Self::stream(tx, name, table, statement, params.with_metadata, &mut chunker)?;
        }
      }
      chunker.finish()
    })
  }

  fn oo_query(&self, patterns: &BTreeSet<Pattern>) -> Result<OoData> {
    let schema = self.schema()?;
    let data = self.conn.with_transaction(|tx| {
      let mut data = OoData::new();
      for (obj_type, type_patterns) in oo::group_by_type(patterns) {
        for pattern in &type_patterns {
          tracing::debug!(%pattern, "rendering OO pattern");
        }
        let (sql, params) = oo::render_type(schema, obj_type, &type_patterns)?;
        let table = oo::result_table(obj_type)?;
        let select = || Error::table("select OO objects of", obj_type.name);
        let mut stmt = tx.prepare(&sql).map_err(select())?;
        let mut rows = stmt.query(params_from_iter(params)).map_err(select())?;
        let mut objs = Vec::new();
        while let Some(row) = rows.next().map_err(select())? {
          objs.push(table.unpack(row, false, false)?);
        }
        tracing::debug!(obj_type = obj_type.name, objects = objs.len(), "fetched OO objects");
        data.insert(obj_type.name.to_owned(), objs);
      }
      Ok(data)
    })?;
    if !self.options.light_checks {
      orm::SCHEMA.validate(&data)?;
    }
    Ok(data)
  }

  fn load(&self, report: &Report, with_metadata: bool) -> Result<()> {
    let schema = self.schema()?;
    schema.io.validate(report)?;

    let prio_db = self.conn.load_prio_db();
    self.conn.with_transaction(|tx| {
      for (name, table) in &schema.tables {
        let objs = report.list(name);
        if objs.is_empty() {
          continue;
        }
        let mut stmt = tx
          .prepare(&table.format_insert(name, prio_db, with_metadata))
          .map_err(Error::table("insert into", name))?;
        for obj in objs {
          stmt
            .execute(params_from_iter(table.pack(obj, with_metadata)?))
            .map_err(Error::table("insert into", name))?;
        }
        tracing::debug!(table = name, objects = objs.len(), prio_db, "loaded objects");
      }
      Ok(())
    })?;
    self.conn.flip_load_prio_db();
    Ok(())
  }
}
