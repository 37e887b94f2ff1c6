//! Host configuration, read from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::reconciler::{DEFAULT_SWEEP_MINUTES, DEFAULT_SYSTEM_CRON};

/// Settings for a [`JobHost`](crate::host::JobHost). Every field has a default,
/// so an empty file is a valid configuration.
///
/// ```toml
/// database = "/var/lib/jobkeeper/jobs.db"
/// max_workers = 8
/// sweep_minutes = [0, 15, 30, 45]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
  /// Path of the SQLite job store.
  #[serde(default = "default_database")]
  pub database: PathBuf,
  /// Handlers that may run at the same time.
  #[serde(default = "default_max_workers")]
  pub max_workers: usize,
  /// Cron expression for the system job, used only when it is first created.
  #[serde(default = "default_system_cron")]
  pub system_cron: String,
  /// Minutes of the hour at which lost `Running` jobs are re-registered.
  #[serde(default = "default_sweep_minutes")]
  pub sweep_minutes: Vec<u32>,
  /// How long `on_stop` waits for executing handlers.
  #[serde(default = "default_shutdown_timeout_secs")]
  pub shutdown_timeout_secs: u64,
  /// Default retention for the log purge handler.
  #[serde(default = "default_log_retention_days")]
  pub log_retention_days: u32,
}

fn default_database() -> PathBuf {
  PathBuf::from("jobkeeper.db")
}

fn default_max_workers() -> usize {
  4
}

fn default_system_cron() -> String {
  DEFAULT_SYSTEM_CRON.to_string()
}

fn default_sweep_minutes() -> Vec<u32> {
  DEFAULT_SWEEP_MINUTES.to_vec()
}

fn default_shutdown_timeout_secs() -> u64 {
  10
}

fn default_log_retention_days() -> u32 {
  30
}

impl Default for HostConfig {
  fn default() -> Self {
    Self {
      database: default_database(),
      max_workers: default_max_workers(),
      system_cron: default_system_cron(),
      sweep_minutes: default_sweep_minutes(),
      shutdown_timeout_secs: default_shutdown_timeout_secs(),
      log_retention_days: default_log_retention_days(),
    }
  }
}

impl HostConfig {
  /// Loads configuration from `path`, falling back to defaults if the file
  /// does not exist.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      debug!("Config file not found at {}, using defaults", path.display());
      return Ok(Self::default());
    }
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(content)?)
  }

  pub fn shutdown_timeout(&self) -> Duration {
    Duration::from_secs(self.shutdown_timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_gives_defaults() {
    let config = HostConfig::from_toml_str("").unwrap();
    assert_eq!(config, HostConfig::default());
    assert_eq!(config.sweep_minutes, vec![0, 30]);
    assert_eq!(config.system_cron, "0/15 * * * * ?");
  }

  #[test]
  fn partial_file_overrides() {
    let config = HostConfig::from_toml_str("max_workers = 8\nsweep_minutes = [5]").unwrap();
    assert_eq!(config.max_workers, 8);
    assert_eq!(config.sweep_minutes, vec![5]);
    assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
  }

  #[test]
  fn bad_toml_is_an_error() {
    assert!(matches!(
      HostConfig::from_toml_str("max_workers = \"many\""),
      Err(ConfigError::Toml(_))
    ));
  }
}
