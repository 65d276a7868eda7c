//! Error types for `kcidb-core`.

use thiserror::Error;

use crate::Version;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid version: {0}")]
  InvalidVersion(String),

  #[error("unknown object list: {0:?}")]
  UnknownObjectList(String),

  #[error("unknown object type: {0:?}")]
  UnknownObjectType(String),

  #[error("object type {base:?} has no relation to {other:?}")]
  NoRelation { base: String, other: String },

  #[error("expected {expected} id fields for {obj_type:?}, got {got}")]
  IdArity {
    obj_type: String,
    expected: usize,
    got:      usize,
  },

  #[error("report version {found} is not compatible with {expected}")]
  IncompatibleReport { found: Version, expected: Version },

  #[error("invalid report: {0}")]
  Validation(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
