//! The `ReportStore` trait and supporting parameter types.
//!
//! The trait is implemented by relational backends (e.g.
//! `kcidb-store-sqlite`). It is synchronous: every call opens and closes its
//! own transaction, and streamed results are handed to a caller-supplied
//! sink chunk by chunk, inside that transaction.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::{
  io::{QueryIds, Report},
  orm::{OoData, Pattern},
};

// ─── Parameter types ─────────────────────────────────────────────────────────

/// Arrival-time bounds, keyed by object list name.
pub type TimeBounds = BTreeMap<String, DateTime<Utc>>;

/// Parameters for [`ReportStore::dump_iter`].
#[derive(Debug, Clone, Default)]
pub struct DumpParams {
  /// Maximum objects per emitted report; zero for no limit.
  pub objects_per_report: usize,
  /// Include metadata fields (e.g. `_timestamp`).
  pub with_metadata:      bool,
  /// Only objects which arrived strictly after these times.
  pub after:              TimeBounds,
  /// Only objects which arrived at or before these times.
  pub until:              TimeBounds,
}

/// Parameters for [`ReportStore::query_iter`].
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
  pub ids:                QueryIds,
  /// Also match children of matched objects, transitively.
  pub children:           bool,
  /// Also match parents of matched objects, transitively.
  pub parents:            bool,
  pub objects_per_report: usize,
  pub with_metadata:      bool,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a versioned report database.
///
/// A store is bound to one schema version at a time; see the backend for how
/// versions are negotiated and upgraded.
pub trait ReportStore {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Lifecycle ─────────────────────────────────────────────────────────

  /// Create the schema on an empty, uninitialized database.
  fn init(&mut self) -> Result<(), Self::Error>;

  /// Drop every table, removing all data and the version marker.
  fn cleanup(&mut self) -> Result<(), Self::Error>;

  /// Delete every row, keeping the schema.
  fn empty(&self) -> Result<(), Self::Error>;

  // ── Time ──────────────────────────────────────────────────────────────

  /// The current time according to the database.
  fn get_current_time(&self) -> Result<DateTime<Utc>, Self::Error>;

  /// Earliest arrival time per object list with any objects.
  fn get_first_modified(&self) -> Result<TimeBounds, Self::Error>;

  /// Latest arrival time per object list with any objects.
  fn get_last_modified(&self) -> Result<TimeBounds, Self::Error>;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Dump every object, in table order, passing reports of at most
  /// `objects_per_report` objects to `sink`. A non-empty final partial
  /// report is always emitted.
  fn dump_iter<F>(&self, params: &DumpParams, sink: F) -> Result<(), Self::Error>
  where
    F: FnMut(Report) -> Result<(), Self::Error>;

  /// Fetch objects matching explicit identities, optionally expanded along
  /// the object list graph, chunked like [`dump_iter`](Self::dump_iter).
  fn query_iter<F>(&self, params: &QueryParams, sink: F) -> Result<(), Self::Error>
  where
    F: FnMut(Report) -> Result<(), Self::Error>;

  /// Fetch flattened OO objects matching any of `patterns`.
  fn oo_query(&self, patterns: &BTreeSet<Pattern>) -> Result<OoData, Self::Error>;

  /// Collect every report [`dump_iter`](Self::dump_iter) emits.
  fn dump(&self, params: &DumpParams) -> Result<Vec<Report>, Self::Error> {
    let mut reports = Vec::new();
    self.dump_iter(params, |r| {
      reports.push(r);
      Ok(())
    })?;
    Ok(reports)
  }

  /// Collect every report [`query_iter`](Self::query_iter) emits.
  fn query(&self, params: &QueryParams) -> Result<Vec<Report>, Self::Error> {
    let mut reports = Vec::new();
    self.query_iter(params, |r| {
      reports.push(r);
      Ok(())
    })?;
    Ok(reports)
  }

  // ── Writes ────────────────────────────────────────────────────────────

  /// Load a report, directly compatible with the store's report version,
  /// in a single transaction.
  fn load(&self, report: &Report, with_metadata: bool) -> Result<(), Self::Error>;
}
