//! Store configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/inventory/config.toml)
//! 3. Environment variables (INVENTORY_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable prefix
const ENV_PREFIX: &str = "INVENTORY";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Path of the SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// How long a connection waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Number of read-only connections
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,

    /// Give up waiting for the write lease after this long (unset: wait forever)
    #[serde(default)]
    pub lease_timeout_ms: Option<u64>,

    /// Backlog that `Store::watch_queued` watches warn about
    #[serde(default = "default_watch_queue_depth")]
    pub watch_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            read_pool_size: default_read_pool_size(),
            lease_timeout_ms: None,
            watch_queue_depth: default_watch_queue_depth(),
        }
    }
}

impl Config {
    /// Defaults with a specific database file
    pub fn with_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Load configuration from default location and environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;
            toml::from_str(&content).map_err(|e| Error::Config {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(toml_content).map_err(|e| Error::Config {
            path: PathBuf::from("<string>"),
            details: e.to_string(),
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DB_PATH", ENV_PREFIX)) {
            if !val.is_empty() {
                self.db_path = PathBuf::from(val);
            }
        }

        if let Some(val) = env_number(&format!("{}_BUSY_TIMEOUT_MS", ENV_PREFIX)) {
            self.busy_timeout_ms = val;
        }

        if let Some(val) = env_number(&format!("{}_READ_POOL_SIZE", ENV_PREFIX)) {
            self.read_pool_size = val as usize;
        }

        // Empty or zero clears the timeout
        if let Ok(val) = std::env::var(format!("{}_LEASE_TIMEOUT_MS", ENV_PREFIX)) {
            self.lease_timeout_ms = val.trim().parse().ok().filter(|ms| *ms > 0);
        }

        if let Some(val) = env_number(&format!("{}_WATCH_QUEUE_DEPTH", ENV_PREFIX)) {
            self.watch_queue_depth = val as usize;
        }
    }

    /// Get the config file path
    ///
    /// Can be overridden with INVENTORY_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("inventory")
            .join("config.toml")
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lease_timeout(&self) -> Option<Duration> {
        self.lease_timeout_ms.map(Duration::from_millis)
    }
}

fn env_number(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Get the default database path
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inventory")
        .join("inventory.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_read_pool_size() -> usize {
    4
}

fn default_watch_queue_depth() -> usize {
    1024
}
