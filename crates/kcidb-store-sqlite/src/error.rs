//! Error type for `kcidb-store-sqlite`.

use kcidb_core::Version;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] kcidb_core::Error),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  /// A statement against a specific table failed.
  #[error("failed to {op} table {table:?}: {source}")]
  Table {
    op:     &'static str,
    table:  String,
    #[source]
    source: rusqlite::Error,
  },

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("invalid value for column {column:?}: {reason}")]
  InvalidValue { column: String, reason: String },

  /// Arrival-time features were requested but the schema has no row
  /// timestamps.
  #[error("no timestamps: {0}")]
  NoTimestamps(String),

  #[error("invalid connection parameters: {0}")]
  InvalidParams(String),

  #[error("database is not initialized")]
  Uninitialized,

  #[error("database is already initialized (schema {0})")]
  AlreadyInitialized(Version),

  #[error("unknown schema version {0}")]
  UnknownSchemaVersion(Version),

  #[error("schema {0} has no previous version to inherit from")]
  NoPredecessor(Version),

  #[error("cannot move database from schema {current} to {target}")]
  IncompatibleSchema { current: Version, target: Version },
}

impl Error {
  /// Wrap a backend error with the operation and table it came from.
  pub(crate) fn table<'a>(
    op: &'static str,
    table: &'a str,
  ) -> impl FnOnce(rusqlite::Error) -> Error + 'a {
    move |source| Error::Table { op, table: table.to_owned(), source }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
