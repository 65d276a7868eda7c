//! The object-oriented view of report data.
//!
//! Unlike report documents, which nest by object list, OO data is a flat set
//! of typed objects linked by a fixed parent/child graph:
//!
//! ```text
//! revision → checkout → build → test
//!                          ↘      ↓
//! issue → issue_version  →  incident
//! ```
//!
//! The graph does not change between database schema versions; only its
//! relational rendering does. [`Pattern`]s select objects by type, optional
//! identity set, and a chain of graph hops.

use std::{
  cmp::Ordering,
  collections::{BTreeMap, BTreeSet},
  fmt,
  hash::{Hash, Hasher},
};

use crate::{
  Error, Result,
  io::{Id, IdValue, Object},
};

/// OO query results, keyed by object type name.
pub type OoData = BTreeMap<String, Vec<Object>>;

// ─── Type graph ──────────────────────────────────────────────────────────────

/// A parent → child edge. `ref_fields` are child fields holding the parent's
/// identity, aligned with the parent's id fields.
#[derive(Debug)]
pub struct Relation {
  pub child:      &'static str,
  pub ref_fields: &'static [&'static str],
}

#[derive(Debug)]
pub struct ObjType {
  pub name:      &'static str,
  /// Every field of an object of this type, in result column order.
  pub fields:    &'static [&'static str],
  pub id_fields: &'static [&'static str],
  pub children:  &'static [Relation],
}

impl ObjType {
  pub fn child(&self, name: &str) -> Option<&Relation> {
    self.children.iter().find(|r| r.child == name)
  }
}

// Types are singletons in `SCHEMA`, identified by name.
impl PartialEq for ObjType {
  fn eq(&self, other: &Self) -> bool { self.name == other.name }
}

impl Eq for ObjType {}

impl PartialOrd for ObjType {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ObjType {
  fn cmp(&self, other: &Self) -> Ordering { self.name.cmp(other.name) }
}

impl Hash for ObjType {
  fn hash<H: Hasher>(&self, state: &mut H) { self.name.hash(state) }
}

#[derive(Debug)]
pub struct OoSchema {
  pub types: &'static [ObjType],
}

impl OoSchema {
  pub fn get(&self, name: &str) -> Result<&ObjType> {
    self
      .types
      .iter()
      .find(|t| t.name == name)
      .ok_or_else(|| Error::UnknownObjectType(name.to_owned()))
  }

  /// Check every object carries exactly the fields of its type.
  pub fn validate(&self, data: &OoData) -> Result<()> {
    for (name, objs) in data {
      let obj_type = self.get(name)?;
      for obj in objs {
        let matches = obj.len() == obj_type.fields.len()
          && obj_type.fields.iter().all(|f| obj.contains_key(*f));
        if !matches {
          return Err(Error::Validation(format!(
            "{name} object has fields {:?}, expected {:?}",
            obj.keys().collect::<Vec<_>>(),
            obj_type.fields
          )));
        }
      }
    }
    Ok(())
  }
}

pub static SCHEMA: OoSchema = OoSchema {
  types: &[
    ObjType {
      name:      "revision",
      fields:    &[
        "git_commit_hash",
        "patchset_hash",
        "patchset_files",
        "git_commit_name",
      ],
      id_fields: &["git_commit_hash", "patchset_hash"],
      children:  &[Relation {
        child:      "checkout",
        ref_fields: &["git_commit_hash", "patchset_hash"],
      }],
    },
    ObjType {
      name:      "checkout",
      fields:    &[
        "id",
        "git_commit_hash",
        "git_commit_tags",
        "git_commit_message",
        "patchset_hash",
        "origin",
        "git_repository_url",
        "git_repository_branch",
        "git_repository_branch_tip",
        "tree_name",
        "message_id",
        "start_time",
        "log_url",
        "comment",
        "valid",
        "misc",
      ],
      id_fields: &["id"],
      children:  &[Relation { child: "build", ref_fields: &["checkout_id"] }],
    },
    ObjType {
      name:      "build",
      fields:    &[
        "id",
        "checkout_id",
        "origin",
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
        "comment",
        "status",
        "misc",
      ],
      id_fields: &["id"],
      children:  &[
        Relation { child: "test", ref_fields: &["build_id"] },
        Relation { child: "incident", ref_fields: &["build_id"] },
      ],
    },
    ObjType {
      name:      "test",
      fields:    &[
        "id",
        "build_id",
        "origin",
        "path",
        "environment_comment",
        "environment_compatible",
        "environment_misc",
        "log_url",
        "status",
        "number_value",
        "number_unit",
        "number_prefix",
        "start_time",
        "duration",
        "output_files",
        "comment",
        "misc",
      ],
      id_fields: &["id"],
      children:  &[Relation { child: "incident", ref_fields: &["test_id"] }],
    },
    ObjType {
      name:      "issue",
      fields:    &["id", "origin"],
      id_fields: &["id"],
      children:  &[Relation { child: "issue_version", ref_fields: &["id"] }],
    },
    ObjType {
      name:      "issue_version",
      fields:    &[
        "id",
        "version_num",
        "origin",
        "report_url",
        "report_subject",
        "culprit_code",
        "culprit_tool",
        "culprit_harness",
        "comment",
        "misc",
      ],
      id_fields: &["id", "version_num"],
      children:  &[Relation {
        child:      "incident",
        ref_fields: &["issue_id", "issue_version_num"],
      }],
    },
    ObjType {
      name:      "incident",
      fields:    &[
        "id",
        "origin",
        "issue_id",
        "issue_version_num",
        "build_id",
        "test_id",
        "present",
        "comment",
        "misc",
      ],
      id_fields: &["id"],
      children:  &[],
    },
  ],
};

// ─── Patterns ────────────────────────────────────────────────────────────────

/// A request for objects of one type.
///
/// `obj_id_set` of `None` matches every object of the type; `Some` restricts
/// to the listed identities (an empty set matches nothing). A pattern with a
/// base matches only objects which are children (or parents) of the objects
/// the base matches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pattern {
  base:       Option<Box<Pattern>>,
  child:      bool,
  obj_type:   &'static ObjType,
  obj_id_set: Option<BTreeSet<Id>>,
}

impl Pattern {
  /// Match objects of `obj_type`, optionally restricted to `ids`.
  pub fn new(obj_type: &str, ids: Option<BTreeSet<Id>>) -> Result<Self> {
    let obj_type = SCHEMA.get(obj_type)?;
    check_arity(obj_type, ids.as_ref())?;
    Ok(Self { base: None, child: false, obj_type, obj_id_set: ids })
  }

  /// Match children of type `obj_type` of the objects `base` matches.
  pub fn children(base: Pattern, obj_type: &str, ids: Option<BTreeSet<Id>>) -> Result<Self> {
    let obj_type = SCHEMA.get(obj_type)?;
    if base.obj_type.child(obj_type.name).is_none() {
      return Err(Error::NoRelation {
        base:  base.obj_type.name.to_owned(),
        other: obj_type.name.to_owned(),
      });
    }
    check_arity(obj_type, ids.as_ref())?;
    Ok(Self {
      base: Some(Box::new(base)),
      child: true,
      obj_type,
      obj_id_set: ids,
    })
  }

  /// Match parents of type `obj_type` of the objects `base` matches.
  pub fn parents(base: Pattern, obj_type: &str, ids: Option<BTreeSet<Id>>) -> Result<Self> {
    let obj_type = SCHEMA.get(obj_type)?;
    if obj_type.child(base.obj_type.name).is_none() {
      return Err(Error::NoRelation {
        base:  base.obj_type.name.to_owned(),
        other: obj_type.name.to_owned(),
      });
    }
    check_arity(obj_type, ids.as_ref())?;
    Ok(Self {
      base: Some(Box::new(base)),
      child: false,
      obj_type,
      obj_id_set: ids,
    })
  }

  pub fn base(&self) -> Option<&Pattern> { self.base.as_deref() }

  /// True if this pattern's objects are children of the base's objects.
  pub fn is_child(&self) -> bool { self.child }

  pub fn obj_type(&self) -> &'static ObjType { self.obj_type }

  pub fn obj_id_set(&self) -> Option<&BTreeSet<Id>> { self.obj_id_set.as_ref() }
}

fn check_arity(obj_type: &ObjType, ids: Option<&BTreeSet<Id>>) -> Result<()> {
  let expected = obj_type.id_fields.len();
  match ids.into_iter().flatten().find(|id| id.len() != expected) {
    Some(id) => Err(Error::IdArity {
      obj_type: obj_type.name.to_owned(),
      expected,
      got: id.len(),
    }),
    None => Ok(()),
  }
}

impl fmt::Display for Pattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(base) = &self.base {
      write!(f, "{base}{}", if self.child { ">" } else { "<" })?;
    }
    f.write_str(self.obj_type.name)?;
    if let Some(ids) = &self.obj_id_set {
      let ids: Vec<String> = ids
        .iter()
        .map(|id| {
          id.iter()
            .map(|v| match v {
              IdValue::Text(s) => format!("{s:?}"),
              IdValue::Integer(n) => n.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
        })
        .collect();
      write!(f, "[{}]", ids.join("; "))?;
    }
    Ok(())
  }
}
