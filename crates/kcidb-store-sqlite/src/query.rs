//! Identity selection for `query_iter`.
//!
//! Each object list gets a set of `SELECT`s yielding identities to fetch,
//! joined with `UNION`. Explicit identities seed the sets; the parents pass
//! adds, for every list, the identities its children refer to; the children
//! pass adds, for every list, the objects referring to its matched parents.
//! Both passes are transitive. The final fetch joins each table with its
//! identity union.

use std::collections::{BTreeMap, BTreeSet};

use kcidb_core::io::{IdValue, IoSchema, ObjectList, QueryIds};
use rusqlite::types::Value as SqlValue;

use crate::{
  Error, Result,
  encode::encode_id_value,
  sql::{indent, quote, quote_list, values_select},
  table::Table,
};

#[derive(Debug, Default)]
struct IdSelects {
  selects: Vec<String>,
  /// Parameters of every select, in text order.
  params:  Vec<SqlValue>,
}

impl IdSelects {
  fn union(&self) -> String { self.selects.join("UNION\n") }

  fn push(&mut self, select: String, params: &[SqlValue]) {
    self.selects.push(select);
    self.params.extend_from_slice(params);
  }
}

/// Compiled identity selects for every object list of a schema.
#[derive(Debug)]
pub(crate) struct IdQuery<'a> {
  io:    &'a IoSchema,
  lists: BTreeMap<&'static str, IdSelects>,
}

impl<'a> IdQuery<'a> {
  pub(crate) fn compile(io: &'a IoSchema, ids: &QueryIds, children: bool, parents: bool) -> Result<Self> {
    let mut lists: BTreeMap<&'static str, IdSelects> =
      io.lists.iter().map(|l| (l.name, IdSelects::default())).collect();

    for (name, list_ids) in ids {
      let list = io.list(name)?;
      if list_ids.is_empty() {
        continue;
      }
      let mut params = Vec::new();
      for id in list_ids {
        check_id(list, id)?;
        params.extend(id.iter().map(encode_id_value));
      }
      let fields: Vec<&str> = list.id_field_names().collect();
      if let Some(selects) = lists.get_mut(list.name) {
        selects.push(values_select(&fields, list_ids.len()), &params);
      }
    }

    let mut query = Self { io, lists };
    if parents {
      let mut visited = BTreeSet::new();
      for root in io.roots() {
        query.add_parents(root, &mut visited);
      }
    }
    if children {
      query.add_children();
    }
    Ok(query)
  }

  /// Post-order walk: a list's children are complete before their
  /// references are turned into the list's identities.
  fn add_parents(&mut self, list: &'a ObjectList, visited: &mut BTreeSet<&'static str>) {
    if !visited.insert(list.name) {
      return;
    }
    let io = self.io;
    for (child, link) in io.children(list.name) {
      self.add_parents(child, visited);
      let Some(child_selects) = self.lists.get(child.name) else { continue };
      if child_selects.selects.is_empty() {
        continue;
      }
      let columns = link
        .ref_fields
        .iter()
        .zip(list.id_field_names())
        .map(|(r, f)| format!("{}.{} AS {}", quote(child.name), quote(r), quote(f)))
        .collect::<Vec<_>>()
        .join(", ");
      let select = format!(
        "SELECT {columns} FROM {} INNER JOIN (\n{}) AS ids USING({})\n",
        quote(child.name),
        indent(&child_selects.union(), 4),
        quote_list(child.id_field_names()),
      );
      let params = child_selects.params.clone();
      if let Some(selects) = self.lists.get_mut(list.name) {
        selects.push(select, &params);
      }
    }
  }

  /// Topological walk: a list's identities are complete, from every parent,
  /// before they are expanded into its children.
  fn add_children(&mut self) {
    let io = self.io;
    for list in io.topological_order() {
      let Some(parent_selects) = self.lists.get(list.name) else { continue };
      if parent_selects.selects.is_empty() {
        continue;
      }
      let union = indent(&parent_selects.union(), 4);
      let params = parent_selects.params.clone();
      for (child, link) in io.children(list.name) {
        let on = link
          .ref_fields
          .iter()
          .zip(list.id_field_names())
          .map(|(r, f)| format!("{}.{} = \"parent\".{}", quote(child.name), quote(r), quote(f)))
          .collect::<Vec<_>>()
          .join(" AND ");
        let columns = child
          .id_field_names()
          .map(|f| format!("{}.{} AS {}", quote(child.name), quote(f), quote(f)))
          .collect::<Vec<_>>()
          .join(", ");
        let select = format!(
          "SELECT {columns} FROM {} INNER JOIN (\n{union}) AS \"parent\" ON {on}\n",
          quote(child.name),
        );
        if let Some(selects) = self.lists.get_mut(child.name) {
          selects.push(select, &params);
        }
      }
    }
  }

  /// The statement fetching matched rows of `name`, or `None` if nothing of
  /// that list can match.
  pub(crate) fn format_fetch(
    &self,
    name: &str,
    table: &Table,
    with_metadata: bool,
  ) -> Result<Option<(String, Vec<SqlValue>)>> {
    let list = self.io.list(name)?;
    let Some(selects) = self.lists.get(list.name).filter(|s| !s.selects.is_empty()) else {
      return Ok(None);
    };
    let columns = table
      .selected(with_metadata)
      .map(|(n, _)| format!("{}.{}", quote(name), quote(n)))
      .collect::<Vec<_>>()
      .join(", ");
    let sql = format!(
      "SELECT {columns}\nFROM {} INNER JOIN (\n{}) AS ids USING({})\n",
      quote(name),
      indent(&selects.union(), 4),
      quote_list(list.id_field_names()),
    );
    Ok(Some((sql, selects.params.clone())))
  }
}

fn check_id(list: &ObjectList, id: &[IdValue]) -> Result<()> {
  if id.len() != list.id_fields.len() {
    return Err(Error::Core(kcidb_core::Error::IdArity {
      obj_type: list.name.to_owned(),
      expected: list.id_fields.len(),
      got:      id.len(),
    }));
  }
  for (field, value) in list.id_fields.iter().zip(id) {
    if value.kind() != field.kind {
      return Err(Error::Core(kcidb_core::Error::Validation(format!(
        "{}: id field {:?} expects {:?}, got {value:?}",
        list.name, field.name, field.kind
      ))));
    }
  }
  Ok(())
}
