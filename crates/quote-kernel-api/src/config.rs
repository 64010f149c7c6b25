use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use quote_kernel_sync::{RemoteConfig, DEFAULT_SYNC_INTERVAL_SECS};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DB_PATH: &str = "./quote_kernel.sqlite3";

/// Settings shared by the CLI and the service. Every field has a default, so a
/// config file only needs the keys it overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuoteKernelConfig {
    pub db: PathBuf,
    pub remote: RemoteConfig,
    pub sync_interval_secs: u64,
    pub push_on_add: bool,
}

impl Default for QuoteKernelConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from(DEFAULT_DB_PATH),
            remote: RemoteConfig::default(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            push_on_add: true,
        }
    }
}

impl QuoteKernelConfig {
    /// Load from an optional YAML file; `None` yields the defaults.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or is not valid YAML.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&body)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// # Errors
    /// Returns an error when `body` is not a valid YAML config document.
    pub fn from_yaml_str(body: &str) -> Result<Self> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(body).context("invalid quote kernel config")
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}
