//! Schema v4.1: adds issues and incidents.

use kcidb_core::{Version, io};

use super::{Schema, create_missing_tables};
use crate::{
  Result,
  table::{Column, Table},
};

pub(super) fn schema(prev: &Schema) -> Schema {
  let mut tables = prev.tables.clone();
  tables.push(("issues", issues()));
  tables.push(("incidents", incidents()));

  let mut oo_statements = prev.oo_statements.clone();
  oo_statements.insert("issue", ISSUE.to_owned());
  oo_statements.insert("issue_version", ISSUE_VERSION.to_owned());
  oo_statements.insert("incident", INCIDENT.to_owned());

  Schema {
    version: Version::new(4, 1),
    io: &io::V4_2,
    tables,
    oo_statements,
    inherit: Some(inherit),
  }
}

fn inherit(conn: &rusqlite::Connection, prev: &Schema, this: &Schema) -> Result<()> {
  create_missing_tables(conn, prev, this)
}

fn issues() -> Table {
  Table::new(vec![
    ("id", Column::text().not_null()),
    ("version", Column::integer().not_null()),
    ("origin", Column::text().not_null()),
    ("report_url", Column::text()),
    ("report_subject", Column::text()),
    ("culprit.code", Column::bool()),
    ("culprit.tool", Column::bool()),
    ("culprit.harness", Column::bool()),
    ("build_valid", Column::bool()),
    ("test_status", Column::text()),
    ("comment", Column::text()),
    ("misc", Column::json()),
  ])
  .with_primary_key(&["id", "version"])
}

fn incidents() -> Table {
  Table::new(vec![
    ("id", Column::text().primary_key()),
    ("origin", Column::text().not_null()),
    ("issue_id", Column::text().not_null()),
    ("issue_version", Column::integer().not_null()),
    ("build_id", Column::text()),
    ("test_id", Column::text()),
    ("present", Column::bool()),
    ("comment", Column::text()),
    ("misc", Column::json()),
  ])
}

const ISSUE: &str = "\
SELECT
    id,
    origin
FROM issues
GROUP BY id";

const ISSUE_VERSION: &str = "\
SELECT
    id,
    version AS version_num,
    origin,
    report_url,
    report_subject,
    \"culprit.code\" AS culprit_code,
    \"culprit.tool\" AS culprit_tool,
    \"culprit.harness\" AS culprit_harness,
    comment,
    misc
FROM issues";

const INCIDENT: &str = "\
SELECT
    id,
    origin,
    issue_id,
    issue_version AS issue_version_num,
    build_id,
    test_id,
    present,
    comment,
    misc
FROM incidents";
