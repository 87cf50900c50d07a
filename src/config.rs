//! Configuration for rcctl.
//!
//! Loaded from an optional TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a working configuration:
//!
//! ```toml
//! [connection]
//! user = "default"
//! password = "secret"
//! connect_timeout_ms = 5000
//! command_timeout_ms = 10000
//!
//! [cluster]
//! total_slots = 16384
//! settle_delay_ms = 2000
//! migrate_timeout_ms = 60000
//! default_batch_size = 10
//! join_poll_attempts = 10
//! join_poll_interval_ms = 1000
//!
//! [logging]
//! level = "info"
//! ```

use crate::error::{RcctlError, Result};
use crate::slots::DEFAULT_TOTAL_SLOTS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub cluster: ClusterConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RcctlError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| RcctlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.total_slots == 0 {
            return Err(RcctlError::Config("cluster.total_slots must be > 0".to_string()));
        }
        if self.cluster.default_batch_size == 0 {
            return Err(RcctlError::Config(
                "cluster.default_batch_size must be > 0".to_string(),
            ));
        }
        if self.cluster.join_poll_attempts == 0 {
            return Err(RcctlError::Config(
                "cluster.join_poll_attempts must be > 0".to_string(),
            ));
        }
        if self.connection.command_timeout_ms == 0 || self.connection.connect_timeout_ms == 0 {
            return Err(RcctlError::Config("connection timeouts must be > 0".to_string()));
        }
        Ok(())
    }
}

/// How to reach and authenticate against store nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub user: String,
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            user: "default".to_string(),
            password: None,
            connect_timeout_ms: 5_000,
            command_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Parameters threaded into the topology engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Size of the hash slot space.
    pub total_slots: u16,
    /// Wait after membership introductions for gossip to propagate.
    pub settle_delay_ms: u64,
    /// Server-side timeout for a single key relocation.
    pub migrate_timeout_ms: u64,
    /// Keys fetched per drain round when none is given on the command line.
    pub default_batch_size: usize,
    /// add-node --wait-for-join: number of listing polls.
    pub join_poll_attempts: u32,
    /// add-node --wait-for-join: pause between polls.
    pub join_poll_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            total_slots: DEFAULT_TOTAL_SLOTS,
            settle_delay_ms: 2_000,
            migrate_timeout_ms: 60_000,
            default_batch_size: 10,
            join_poll_attempts: 10,
            join_poll_interval_ms: 1_000,
        }
    }
}

impl ClusterConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn migrate_timeout(&self) -> Duration {
        Duration::from_millis(self.migrate_timeout_ms)
    }

    pub fn join_poll_interval(&self) -> Duration {
        Duration::from_millis(self.join_poll_interval_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
