//! Rendering OO [`Pattern`]s into SQL over a schema's per-type base
//! statements, and typing their result columns.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::LazyLock,
};

use kcidb_core::{
  io::Id,
  orm::{self, ObjType, Pattern},
};
use rusqlite::types::Value as SqlValue;

use crate::{
  Error, Result,
  encode::encode_id_value,
  schema::Schema,
  sql::{indent, quote, quote_list, values_select},
  table::{Column, Table},
};

/// Result columns of every OO type, in field order.
static RESULT_TABLES: LazyLock<BTreeMap<&'static str, Table>> = LazyLock::new(|| {
  orm::SCHEMA
    .types
    .iter()
    .map(|t| {
      let columns = t.fields.iter().map(|f| (*f, result_column(f))).collect();
      (t.name, Table::new(columns))
    })
    .collect()
});

fn result_column(field: &str) -> Column {
  match field {
    "patchset_files" | "git_commit_tags" | "input_files" | "output_files"
    | "environment_compatible" | "environment_misc" | "misc" => Column::json(),
    "git_repository_branch_tip" | "valid" | "culprit_code" | "culprit_tool"
    | "culprit_harness" | "present" => Column::bool(),
    "start_time" => Column::timestamp(),
    "duration" | "number_value" => Column::real(),
    "version_num" | "issue_version_num" => Column::integer(),
    _ => Column::text(),
  }
}

/// The table for unpacking rows of `obj_type`.
pub(crate) fn result_table(obj_type: &ObjType) -> Result<&'static Table> {
  RESULT_TABLES
    .get(obj_type.name)
    .ok_or_else(|| Error::Core(kcidb_core::Error::UnknownObjectType(obj_type.name.to_owned())))
}

fn base_statement<'s>(schema: &'s Schema, obj_type: &ObjType) -> Result<&'s str> {
  schema
    .oo_statements
    .get(obj_type.name)
    .map(String::as_str)
    .ok_or_else(|| Error::Core(kcidb_core::Error::UnknownObjectType(obj_type.name.to_owned())))
}

/// Render one pattern into a statement selecting every field of the
/// matching objects. Rows may repeat.
pub(crate) fn render_pattern(schema: &Schema, pattern: &Pattern) -> Result<(String, Vec<SqlValue>)> {
  let obj_type = pattern.obj_type();
  let raw = base_statement(schema, obj_type)?;
  let statement = indent(raw, 4);

  let (mut sql, mut params) = match pattern.obj_id_set() {
    None => (raw.to_owned(), Vec::new()),
    // An empty VALUES list is not valid SQL.
    Some(ids) if ids.is_empty() => (format!("SELECT obj.* FROM (\n{statement}\n) AS obj WHERE 0"), Vec::new()),
    Some(ids) => (
      format!(
        "SELECT obj.* FROM (\n{statement}\n) AS obj INNER JOIN (\n{}) AS ids USING({})",
        indent(&values_select(obj_type.id_fields, ids.len()), 4),
        quote_list(obj_type.id_fields.iter().copied()),
      ),
      id_params(ids),
    ),
  };

  if let Some(base) = pattern.base() {
    let (base_sql, base_params) = render_pattern(schema, base)?;
    let base_type = base.obj_type();
    let no_relation = || {
      Error::Core(kcidb_core::Error::NoRelation {
        base:  base_type.name.to_owned(),
        other: obj_type.name.to_owned(),
      })
    };
    let pairs: Vec<(&str, &str)> = if pattern.is_child() {
      let relation = base_type.child(obj_type.name).ok_or_else(no_relation)?;
      relation.ref_fields.iter().copied().zip(base_type.id_fields.iter().copied()).collect()
    } else {
      let relation = obj_type.child(base_type.name).ok_or_else(no_relation)?;
      obj_type.id_fields.iter().copied().zip(relation.ref_fields.iter().copied()).collect()
    };
    let on = pairs
      .iter()
      .map(|(o, b)| format!("obj.{} = base.{}", quote(o), quote(b)))
      .collect::<Vec<_>>()
      .join(" AND ");
    sql = format!(
      "SELECT obj.* FROM (\n{}\n) AS obj INNER JOIN (\n{}\n) AS base ON {on}",
      indent(&sql, 4),
      indent(&base_sql, 4),
    );
    params.extend(base_params);
  }

  Ok((sql, params))
}

/// Render every pattern of one type into a single statement returning each
/// matching object once.
pub(crate) fn render_type(
  schema: &Schema,
  obj_type: &ObjType,
  patterns: &[&Pattern],
) -> Result<(String, Vec<SqlValue>)> {
  let mut selects = Vec::with_capacity(patterns.len());
  let mut params = Vec::new();
  for pattern in patterns {
    let (sql, pattern_params) = render_pattern(schema, pattern)?;
    selects.push(sql);
    params.extend(pattern_params);
  }
  let id_fields = quote_list(obj_type.id_fields.iter().copied());
  let sql = format!(
    "SELECT obj.* FROM (\n{}\n) AS obj INNER JOIN (\n    SELECT DISTINCT {id_fields} FROM (\n{}\n    )\n) AS ids USING({id_fields})",
    indent(base_statement(schema, obj_type)?, 4),
    indent(&selects.join("\nUNION ALL\n"), 8),
  );
  Ok((sql, params))
}

/// Group patterns by type, in type graph order.
pub(crate) fn group_by_type(
  patterns: &BTreeSet<Pattern>,
) -> Vec<(&'static ObjType, Vec<&Pattern>)> {
  orm::SCHEMA
    .types
    .iter()
    .filter_map(|t| {
      let matching: Vec<&Pattern> = patterns.iter().filter(|p| p.obj_type() == t).collect();
      (!matching.is_empty()).then_some((t, matching))
    })
    .collect()
}

fn id_params(ids: &BTreeSet<Id>) -> Vec<SqlValue> {
  ids.iter().flat_map(|id| id.iter().map(encode_id_value)).collect()
}
