//! Runtime configuration.
//!
//! Resolved once by the host at startup and passed into [`crate::Store`] and
//! [`crate::sync::SyncCoordinator`]; nothing here reads the environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Config parse error: {0}")]
    Parse(String),
}

/// Where and how the local database is opened.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    pub enable_wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            enable_wal: true,
        }
    }
}

/// Push/pull tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum records per push request.
    pub push_batch_size: usize,
    /// Maximum records requested per pull page.
    pub pull_page_size: usize,
    pub push_timeout_secs: u64,
    pub pull_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_batch_size: 500,
            pull_page_size: 1000,
            push_timeout_secs: 30,
            pull_timeout_secs: 30,
        }
    }
}

impl SyncConfig {
    /// Parse from JSON; missing keys fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.push_batch_size == 0 {
            return Err(ConfigError::Invalid("push_batch_size must be at least 1".into()));
        }
        if self.pull_page_size == 0 {
            return Err(ConfigError::Invalid("pull_page_size must be at least 1".into()));
        }
        if self.push_timeout_secs == 0 || self.pull_timeout_secs == 0 {
            return Err(ConfigError::Invalid("sync timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}
