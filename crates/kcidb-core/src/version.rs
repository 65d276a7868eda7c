//! Two-part `(major, minor)` versions shared by database schemas and report
//! documents.
//!
//! Versions compare lexicographically. A minor bump only ever adds structure,
//! so a newer minor can inherit an older one; a major bump is a break.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Minor versions are packed into the low three decimal digits.
const MINOR_LIMIT: u32 = 1000;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
  pub major: u32,
  pub minor: u32,
}

impl Version {
  pub const fn new(major: u32, minor: u32) -> Self { Self { major, minor } }

  /// Pack the version into the single integer stored out-of-band by
  /// backends (`major * 1000 + minor`).
  pub fn encode(self) -> Result<i64> {
    if self.minor >= MINOR_LIMIT {
      return Err(Error::InvalidVersion(format!(
        "minor version {} does not fit below {MINOR_LIMIT}",
        self.minor
      )));
    }
    Ok(i64::from(self.major) * i64::from(MINOR_LIMIT) + i64::from(self.minor))
  }

  /// Unpack a stored version number. Zero means "uninitialized".
  pub fn decode(number: i64) -> Result<Option<Self>> {
    if number == 0 {
      return Ok(None);
    }
    let limit = i64::from(MINOR_LIMIT);
    let major = u32::try_from(number / limit)
      .map_err(|_| Error::InvalidVersion(format!("stored version {number}")))?;
    let minor = u32::try_from(number % limit)
      .map_err(|_| Error::InvalidVersion(format!("stored version {number}")))?;
    Ok(Some(Self { major, minor }))
  }

  /// True if a database at `prev` can be brought to this version by
  /// inheritance, i.e. the majors match and `prev` is not newer.
  pub fn is_inheritable_from(self, prev: Version) -> bool {
    self.major == prev.major && prev <= self
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.major, self.minor)
  }
}

impl FromStr for Version {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let (major, minor) = s
      .split_once('.')
      .ok_or_else(|| Error::InvalidVersion(format!("{s:?} is not MAJOR.MINOR")))?;
    let parse = |part: &str| {
      part
        .parse::<u32>()
        .map_err(|e| Error::InvalidVersion(format!("{s:?}: {e}")))
    };
    Ok(Self { major: parse(major)?, minor: parse(minor)? })
  }
}

impl TryFrom<(i64, i64)> for Version {
  type Error = Error;

  fn try_from((major, minor): (i64, i64)) -> Result<Self> {
    let component = |n: i64| {
      u32::try_from(n)
        .map_err(|_| Error::InvalidVersion(format!("({major}, {minor})")))
    };
    Ok(Self { major: component(major)?, minor: component(minor)? })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn orders_lexicographically() {
    assert!(Version::new(4, 1) > Version::new(4, 0));
    assert!(Version::new(5, 0) > Version::new(4, 999));
    assert!(Version::new(3, 7) < Version::new(4, 0));
  }

  #[test]
  fn encode_decode() {
    let v = Version::new(4, 2);
    assert_eq!(v.encode().unwrap(), 4002);
    assert_eq!(Version::decode(4002).unwrap(), Some(v));
    assert_eq!(Version::decode(0).unwrap(), None);
  }

  #[test]
  fn encode_rejects_wide_minor() {
    assert!(Version::new(1, 1000).encode().is_err());
  }

  #[test]
  fn rejects_negative_components() {
    assert!(Version::try_from((4, -1)).is_err());
    assert!(Version::try_from((-4, 0)).is_err());
    assert_eq!(Version::try_from((4, 1)).unwrap(), Version::new(4, 1));
  }

  #[test]
  fn parses_major_minor() {
    assert_eq!("4.1".parse::<Version>().unwrap(), Version::new(4, 1));
    assert!("4".parse::<Version>().is_err());
    assert!("4.x".parse::<Version>().is_err());
  }

  #[test]
  fn deserialize_rejects_malformed() {
    assert!(serde_json::from_str::<Version>(r#"{"major": 4}"#).is_err());
    assert!(serde_json::from_str::<Version>(r#"{"major": 4, "minor": -1}"#).is_err());
    assert!(serde_json::from_str::<Version>("[4, 0]").is_ok());
  }

  #[test]
  fn major_mismatch_is_not_inheritable() {
    assert!(Version::new(4, 2).is_inheritable_from(Version::new(4, 0)));
    assert!(!Version::new(4, 0).is_inheritable_from(Version::new(4, 2)));
    assert!(!Version::new(5, 0).is_inheritable_from(Version::new(4, 2)));
  }
}
