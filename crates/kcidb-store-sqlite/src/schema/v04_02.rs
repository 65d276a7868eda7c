//! Schema v4.2: every table records row arrival times in `_timestamp`.
//!
//! Rows inherited from v4.1 get the upgrade time as their arrival time.

use kcidb_core::{Version, io};

use super::{Schema, add_missing_columns};
use crate::{
  Result,
  encode::NOW_EXPR,
  table::{Column, TIMESTAMP_COLUMN},
};

pub(super) fn schema(prev: &Schema) -> Schema {
  let tables = prev
    .tables
    .iter()
    .map(|(name, table)| {
      (*name, table.clone().with_column(TIMESTAMP_COLUMN, Column::timestamp().metadata(NOW_EXPR)))
    })
    .collect();

  Schema {
    version: Version::new(4, 2),
    io: &io::V4_2,
    tables,
    oo_statements: prev.oo_statements.clone(),
    inherit: Some(inherit),
  }
}

fn inherit(conn: &rusqlite::Connection, prev: &Schema, this: &Schema) -> Result<()> {
  add_missing_columns(conn, prev, this)
}
