//! Schema v4.0: checkouts, builds and tests.

use std::collections::BTreeMap;

use kcidb_core::{Version, io};

use super::Schema;
use crate::table::{Column, Table};

pub(super) fn schema() -> Schema {
  Schema {
    version:       Version::new(4, 0),
    io:            &io::V4_0,
    tables:        vec![("checkouts", checkouts()), ("builds", builds()), ("tests", tests())],
    oo_statements: BTreeMap::from([
      ("revision", REVISION.to_owned()),
      ("checkout", CHECKOUT.to_owned()),
      ("build", BUILD.to_owned()),
      ("test", TEST.to_owned()),
      ("issue", ISSUE.to_owned()),
      ("issue_version", ISSUE_VERSION.to_owned()),
      ("incident", INCIDENT.to_owned()),
    ]),
    inherit:       None,
  }
}

fn checkouts() -> Table {
  Table::new(vec![
    ("id", Column::text().primary_key()),
    ("origin", Column::text().not_null()),
    ("tree_name", Column::text()),
    ("git_repository_url", Column::text()),
    ("git_commit_hash", Column::text()),
    ("git_commit_name", Column::text()),
    ("git_repository_branch", Column::text()),
    ("patchset_files", Column::json()),
    ("patchset_hash", Column::text()),
    ("message_id", Column::text()),
    ("comment", Column::text()),
    ("start_time", Column::timestamp()),
    ("contacts", Column::json()),
    ("log_url", Column::text()),
    ("log_excerpt", Column::text()),
    ("valid", Column::bool()),
    ("misc", Column::json()),
  ])
}

fn builds() -> Table {
  Table::new(vec![
    ("checkout_id", Column::text().not_null()),
    ("id", Column::text().primary_key()),
    ("origin", Column::text().not_null()),
    ("comment", Column::text()),
    ("start_time", Column::timestamp()),
    ("duration", Column::real()),
    ("architecture", Column::text()),
    ("command", Column::text()),
    ("compiler", Column::text()),
    ("input_files", Column::json()),
    ("output_files", Column::json()),
    ("config_name", Column::text()),
    ("config_url", Column::text()),
    ("log_url", Column::text()),
    ("log_excerpt", Column::text()),
    ("valid", Column::bool()),
    ("misc", Column::json()),
  ])
}

fn tests() -> Table {
  Table::new(vec![
    ("build_id", Column::text().not_null()),
    ("id", Column::text().primary_key()),
    ("origin", Column::text().not_null()),
    ("environment.comment", Column::text()),
    ("environment.misc", Column::json()),
    ("path", Column::text()),
    ("comment", Column::text()),
    ("log_url", Column::text()),
    ("log_excerpt", Column::text()),
    ("status", Column::text()),
    ("waived", Column::bool()),
    ("start_time", Column::timestamp()),
    ("duration", Column::real()),
    ("output_files", Column::json()),
    ("misc", Column::json()),
  ])
}

const REVISION: &str = "\
SELECT
    git_commit_hash,
    patchset_hash,
    patchset_files,
    git_commit_name
FROM checkouts
GROUP BY git_commit_hash, patchset_hash";

const CHECKOUT: &str = "\
SELECT
    id,
    git_commit_hash,
    NULL AS git_commit_tags,
    NULL AS git_commit_message,
    patchset_hash,
    origin,
    git_repository_url,
    git_repository_branch,
    NULL AS git_repository_branch_tip,
    tree_name,
    message_id,
    start_time,
    log_url,
    comment,
    valid,
    misc
FROM checkouts";

const BUILD: &str = "\
SELECT
    id,
    checkout_id,
    origin,
    start_time,
    duration,
    architecture,
    command,
    compiler,
    input_files,
    output_files,
    config_name,
    config_url,
    log_url,
    comment,
    CASE valid
        WHEN TRUE THEN 'PASS'
        WHEN FALSE THEN 'FAIL'
        ELSE NULL
    END AS status,
    misc
FROM builds";

const TEST: &str = "\
SELECT
    id,
    build_id,
    origin,
    path,
    \"environment.comment\" AS environment_comment,
    NULL AS environment_compatible,
    \"environment.misc\" AS environment_misc,
    log_url,
    status,
    NULL AS number_value,
    NULL AS number_unit,
    NULL AS number_prefix,
    start_time,
    duration,
    output_files,
    comment,
    misc
FROM tests";

// No issue tables yet: empty results with the right columns.

const ISSUE: &str = "\
SELECT
    NULL AS id,
    NULL AS origin
WHERE 0";

const ISSUE_VERSION: &str = "\
SELECT
    NULL AS id,
    NULL AS version_num,
    NULL AS origin,
    NULL AS report_url,
    NULL AS report_subject,
    NULL AS culprit_code,
    NULL AS culprit_tool,
    NULL AS culprit_harness,
    NULL AS comment,
    NULL AS misc
WHERE 0";

const INCIDENT: &str = "\
SELECT
    NULL AS id,
    NULL AS origin,
    NULL AS issue_id,
    NULL AS issue_version_num,
    NULL AS build_id,
    NULL AS test_id,
    NULL AS present,
    NULL AS comment,
    NULL AS misc
WHERE 0";
