//! Report documents ("I/O data") and the versioned schemas describing them.
//!
//! A [`Report`] is a version stamp plus zero or more named object lists.
//! Each [`IoSchema`] declares which lists a document version carries, the
//! identity fields of each list, and the parent links forming the list graph
//! (`checkouts` → `builds` → `tests`, `issues` → `incidents`, and
//! `builds`/`tests` → `incidents`).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, Version};

/// A single report object. Nested sub-objects (e.g. `environment`) are kept
/// nested; storage flattens them into dotted column names.
pub type Object = Map<String, Value>;

// ─── Identities ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
  Text,
  Integer,
}

/// One component of an identity tuple.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(untagged)]
pub enum IdValue {
  Integer(i64),
  Text(String),
}

impl IdValue {
  pub fn kind(&self) -> IdKind {
    match self {
      Self::Integer(_) => IdKind::Integer,
      Self::Text(_) => IdKind::Text,
    }
  }

  /// Extract an identity component from a JSON value, if it is a scalar of
  /// a supported kind.
  pub fn from_json(value: &Value) -> Option<Self> {
    match value {
      Value::String(s) => Some(Self::Text(s.clone())),
      Value::Number(n) => n.as_i64().map(Self::Integer),
      _ => None,
    }
  }
}

impl From<&str> for IdValue {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for IdValue {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<i64> for IdValue {
  fn from(n: i64) -> Self { Self::Integer(n) }
}

/// An identity tuple: values in the order of the type's identity fields.
pub type Id = Vec<IdValue>;

/// Explicit identity sets to match, keyed by object list name.
pub type QueryIds = BTreeMap<String, BTreeSet<Id>>;

// ─── Schema description ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct IdField {
  pub name: &'static str,
  pub kind: IdKind,
}

/// A link from an object list to one of its parent lists. `ref_fields` hold
/// the parent's identity, positionally aligned with the parent's id fields.
#[derive(Debug)]
pub struct Link {
  pub parent:     &'static str,
  pub ref_fields: &'static [&'static str],
}

#[derive(Debug)]
pub struct ObjectList {
  pub name:      &'static str,
  pub id_fields: &'static [IdField],
  /// Fields which must be present and non-null.
  pub required:  &'static [&'static str],
  /// Every allowed top-level field.
  pub fields:    &'static [&'static str],
  pub parents:   &'static [Link],
}

impl ObjectList {
  pub fn id_field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.id_fields.iter().map(|f| f.name)
  }

  /// Extract the identity tuple of an object of this list.
  pub fn id_of(&self, obj: &Object) -> Result<Id> {
    self
      .id_fields
      .iter()
      .map(|field| {
        let value = obj
          .get(field.name)
          .and_then(IdValue::from_json)
          .filter(|v| v.kind() == field.kind)
          .ok_or_else(|| {
            Error::Validation(format!(
              "{}: id field {:?} is missing or has the wrong type",
              self.name, field.name
            ))
          })?;
        Ok(value)
      })
      .collect()
  }

  fn validate_object(&self, index: usize, obj: &Object) -> Result<()> {
    let at = |msg: String| Error::Validation(format!("{}[{index}]: {msg}", self.name));

    for key in obj.keys() {
      if !key.starts_with('_') && !self.fields.contains(&key.as_str()) {
        return Err(at(format!("unknown field {key:?}")));
      }
    }
    for name in self.required {
      if obj.get(*name).is_none_or(Value::is_null) {
        return Err(at(format!("missing required field {name:?}")));
      }
    }
    self.id_of(obj).map_err(|e| at(e.to_string()))?;
    Ok(())
  }
}

#[derive(Debug)]
pub struct IoSchema {
  pub version: Version,
  /// Object lists, parents declared before their children.
  pub lists:   &'static [ObjectList],
}

impl IoSchema {
  pub fn list(&self, name: &str) -> Result<&ObjectList> {
    self
      .lists
      .iter()
      .find(|l| l.name == name)
      .ok_or_else(|| Error::UnknownObjectList(name.to_owned()))
  }

  /// Lists with no parents: the children of the graph root `""`.
  pub fn roots(&self) -> impl Iterator<Item = &ObjectList> {
    self.lists.iter().filter(|l| l.parents.is_empty())
  }

  /// Direct children of `parent`, with the link each uses to refer to it.
  pub fn children<'a>(
    &'a self,
    parent: &'a str,
  ) -> impl Iterator<Item = (&'a ObjectList, &'a Link)> + 'a {
    self.lists.iter().flat_map(move |child| {
      child
        .parents
        .iter()
        .filter(move |link| link.parent == parent)
        .map(move |link| (child, link))
    })
  }

  /// Lists ordered so every parent precedes all of its children.
  pub fn topological_order(&self) -> Vec<&ObjectList> {
    let mut order: Vec<&ObjectList> = Vec::with_capacity(self.lists.len());
    let mut placed: BTreeSet<&str> = BTreeSet::new();
    while order.len() < self.lists.len() {
      let before = order.len();
      for list in self.lists {
        if !placed.contains(list.name)
          && list.parents.iter().all(|l| placed.contains(l.parent))
        {
          placed.insert(list.name);
          order.push(list);
        }
      }
      // Cycle or dangling parent.
      if order.len() == before {
        break;
      }
    }
    order
  }

  pub fn new_report(&self) -> Report { Report::new(self.version) }

  /// The document carries exactly this schema's version.
  pub fn is_compatible_exactly(&self, report: &Report) -> bool {
    report.version == self.version
  }

  /// The document can be consumed as-is: same major, not a newer minor.
  pub fn is_compatible_directly(&self, report: &Report) -> bool {
    self.version.is_inheritable_from(report.version)
  }

  /// Full structural validation of a directly compatible document.
  pub fn validate(&self, report: &Report) -> Result<()> {
    if !self.is_compatible_directly(report) {
      return Err(Error::IncompatibleReport {
        found:    report.version,
        expected: self.version,
      });
    }
    for (name, objects) in &report.lists {
      let list = self.list(name)?;
      for (index, obj) in objects.iter().enumerate() {
        list.validate_object(index, obj)?;
      }
    }
    Ok(())
  }

  /// Re-stamp a directly compatible document with this schema's version.
  pub fn upgrade(&self, mut report: Report) -> Result<Report> {
    if !self.is_compatible_directly(&report) {
      return Err(Error::IncompatibleReport {
        found:    report.version,
        expected: self.version,
      });
    }
    report.version = self.version;
    Ok(report)
  }
}

// ─── Documents ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
  pub version: Version,
  #[serde(flatten)]
  pub lists:   BTreeMap<String, Vec<Object>>,
}

impl Report {
  pub fn new(version: Version) -> Self {
    Self { version, lists: BTreeMap::new() }
  }

  /// Total number of objects across all lists.
  pub fn object_count(&self) -> usize { self.lists.values().map(Vec::len).sum() }

  pub fn is_empty(&self) -> bool { self.object_count() == 0 }

  /// Objects of a list, empty if the list is absent.
  pub fn list(&self, name: &str) -> &[Object] {
    self.lists.get(name).map(Vec::as_slice).unwrap_or_default()
  }
}

// ─── Versions ────────────────────────────────────────────────────────────────

const fn text(name: &'static str) -> IdField { IdField { name, kind: IdKind::Text } }

const CHECKOUTS: ObjectList = ObjectList {
  name:      "checkouts",
  id_fields: &[text("id")],
  required:  &["id", "origin"],
  fields:    &[
    "id",
    "origin",
    "tree_name",
    "git_repository_url",
    "git_commit_hash",
    "git_commit_name",
    "git_repository_branch",
    "patchset_files",
    "patchset_hash",
    "message_id",
    "comment",
    "start_time",
    "contacts",
    "log_url",
    "log_excerpt",
    "valid",
    "misc",
  ],
  parents:   &[],
};

const BUILDS: ObjectList = ObjectList {
  name:      "builds",
  id_fields: &[text("id")],
  required:  &["checkout_id", "id", "origin"],
  fields:    &[
    "checkout_id",
    "id",
    "origin",
    "comment",
    "start_time",
    "duration",
    "architecture",
    "command",
    "compiler",
    "input_files",
    "output_files",
    "config_name",
    "config_url",
    "log_url",
    "log_excerpt",
    "valid",
    "misc",
  ],
  parents:   &[Link { parent: "checkouts", ref_fields: &["checkout_id"] }],
};

const TESTS: ObjectList = ObjectList {
  name:      "tests",
  id_fields: &[text("id")],
  required:  &["build_id", "id", "origin"],
  fields:    &[
    "build_id",
    "id",
    "origin",
    "environment",
    "path",
    "comment",
    "log_url",
    "log_excerpt",
    "status",
    "waived",
    "start_time",
    "duration",
    "output_files",
    "misc",
  ],
  parents:   &[Link { parent: "builds", ref_fields: &["build_id"] }],
};

const ISSUES: ObjectList = ObjectList {
  name:      "issues",
  id_fields: &[text("id"), IdField { name: "version", kind: IdKind::Integer }],
  required:  &["id", "version", "origin"],
  fields:    &[
    "id",
    "version",
    "origin",
    "report_url",
    "report_subject",
    "culprit",
    "build_valid",
    "test_status",
    "comment",
    "misc",
  ],
  parents:   &[],
};

const INCIDENTS: ObjectList = ObjectList {
  name:      "incidents",
  id_fields: &[text("id")],
  required:  &["id", "origin", "issue_id", "issue_version"],
  fields:    &[
    "id",
    "origin",
    "issue_id",
    "issue_version",
    "build_id",
    "test_id",
    "present",
    "comment",
    "misc",
  ],
  parents:   &[
    Link { parent: "issues", ref_fields: &["issue_id", "issue_version"] },
    Link { parent: "builds", ref_fields: &["build_id"] },
    Link { parent: "tests", ref_fields: &["test_id"] },
  ],
};

/// Report version 4.0: checkouts, builds and tests.
pub static V4_0: IoSchema = IoSchema {
  version: Version::new(4, 0),
  lists:   &[CHECKOUTS, BUILDS, TESTS],
};

/// Report version 4.2: adds issues and their incidents.
pub static V4_2: IoSchema = IoSchema {
  version: Version::new(4, 2),
  lists:   &[CHECKOUTS, BUILDS, TESTS, ISSUES, INCIDENTS],
};

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn report(value: Value) -> Report { serde_json::from_value(value).unwrap() }

  #[test]
  fn report_serializes_flat() {
    let r = report(json!({
      "version": {"major": 4, "minor": 0},
      "checkouts": [{"id": "origin:1", "origin": "origin"}],
    }));
    assert_eq!(r.object_count(), 1);
    assert_eq!(r.list("checkouts")[0]["id"], "origin:1");
    assert!(r.list("builds").is_empty());
    let back = serde_json::to_value(&r).unwrap();
    assert_eq!(back["checkouts"][0]["origin"], "origin");
    assert!(back.get("builds").is_none());
  }

  #[test]
  fn graph_shape() {
    let roots: Vec<_> = V4_2.roots().map(|l| l.name).collect();
    assert_eq!(roots, ["checkouts", "issues"]);

    let children: Vec<_> = V4_2.children("builds").map(|(l, _)| l.name).collect();
    assert_eq!(children, ["tests", "incidents"]);

    let (_, link) = V4_2.children("issues").next().unwrap();
    assert_eq!(link.ref_fields, ["issue_id", "issue_version"]);
  }

  #[test]
  fn topological_order_puts_parents_first() {
    let order: Vec<_> = V4_2.topological_order().iter().map(|l| l.name).collect();
    let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
    assert_eq!(order.len(), 5);
    assert!(pos("checkouts") < pos("builds"));
    assert!(pos("builds") < pos("tests"));
    assert!(pos("tests") < pos("incidents"));
    assert!(pos("issues") < pos("incidents"));
  }

  #[test]
  fn compatibility() {
    let old = V4_0.new_report();
    let new = V4_2.new_report();
    assert!(V4_2.is_compatible_directly(&old));
    assert!(!V4_2.is_compatible_exactly(&old));
    assert!(!V4_0.is_compatible_directly(&new));
    assert!(V4_2.is_compatible_exactly(&new));
  }

  #[test]
  fn validate_accepts_well_formed() {
    let r = report(json!({
      "version": {"major": 4, "minor": 2},
      "tests": [{
        "id": "origin:t1",
        "build_id": "origin:b1",
        "origin": "origin",
        "environment": {"comment": "VM"},
        "_timestamp": "2024-01-01T00:00:00.000000+00:00",
      }],
      "issues": [{"id": "origin:i1", "version": 1, "origin": "origin"}],
    }));
    V4_2.validate(&r).unwrap();
  }

  #[test]
  fn validate_rejects_missing_required() {
    let r = report(json!({
      "version": {"major": 4, "minor": 0},
      "builds": [{"id": "origin:b1", "origin": "origin"}],
    }));
    let err = V4_0.validate(&r).unwrap_err();
    assert!(matches!(err, Error::Validation(ref m) if m.contains("checkout_id")));
  }

  #[test]
  fn validate_rejects_unknown_field_and_list() {
    let r = report(json!({
      "version": {"major": 4, "minor": 0},
      "checkouts": [{"id": "origin:1", "origin": "origin", "colour": "red"}],
    }));
    assert!(matches!(V4_0.validate(&r), Err(Error::Validation(_))));

    let r = report(json!({
      "version": {"major": 4, "minor": 0},
      "issues": [{"id": "origin:i1", "version": 1, "origin": "origin"}],
    }));
    assert!(matches!(V4_0.validate(&r), Err(Error::UnknownObjectList(_))));
  }

  #[test]
  fn validate_rejects_wrong_id_kind() {
    let r = report(json!({
      "version": {"major": 4, "minor": 2},
      "issues": [{"id": "origin:i1", "version": "one", "origin": "origin"}],
    }));
    assert!(matches!(V4_2.validate(&r), Err(Error::Validation(_))));
  }

  #[test]
  fn upgrade_restamps() {
    let up = V4_2.upgrade(V4_0.new_report()).unwrap();
    assert_eq!(up.version, Version::new(4, 2));
    assert!(V4_0.upgrade(V4_2.new_report()).is_err());
  }

  #[test]
  fn id_of_extracts_tuple() {
    let obj = json!({"id": "origin:i1", "version": 3, "origin": "origin"});
    let id = ISSUES.id_of(obj.as_object().unwrap()).unwrap();
    assert_eq!(id, vec![IdValue::from("origin:i1"), IdValue::from(3)]);
  }
}
