//! Layered CLI configuration: an optional TOML file, then `KCIDB_*`
//! environment variables, then command-line overrides.

use std::path::Path;

use anyhow::{Context as _, Result};
use kcidb_store_sqlite::StoreOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
  /// Connection parameters, see `kcidb_store_sqlite::connection::PARAMS_DOC`.
  #[serde(default)]
  pub database:     Option<String>,
  #[serde(default)]
  pub light_checks: bool,
}

impl CliConfig {
  pub fn load(path: &Path) -> Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("KCIDB"))
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?
      .try_deserialize()
      .context("failed to deserialise CliConfig")
  }

  pub fn database(&self) -> Result<&str> {
    self.database.as_deref().context(
      "no database specified: use --database, KCIDB_DATABASE, or `database` in the config file",
    )
  }

  pub fn store_options(&self) -> StoreOptions { StoreOptions { light_checks: self.light_checks } }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_gives_defaults() {
    let cfg = CliConfig::load(Path::new("/nonexistent/kcidb.toml")).unwrap();
    assert!(!cfg.light_checks);
  }

  #[test]
  fn missing_database_is_an_error() {
    let cfg = CliConfig::default();
    assert!(cfg.database().is_err());
    let cfg = CliConfig { database: Some(":memory:".into()), ..Default::default() };
    assert_eq!(cfg.database().unwrap(), ":memory:");
  }
}
