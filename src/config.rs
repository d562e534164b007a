//! Cluster configuration loaded from TOML.
//!
//! Every key is optional; missing keys take the defaults below.
//!
//! ```toml
//! [cluster]
//! num_shards = 4
//!
//! [coordinator]
//! shard_workers = 4
//! client_workers = 4
//! cache_update_interval_ms = 5000
//! # reply_timeout_ms = 30000
//!
//! [shard]
//! cache_capacity = 4096
//! max_nodes_per_forward = 500
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::CoordinatorOptions;
use crate::shard::ShardOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Cluster shape.
    #[serde(default)]
    pub cluster: ClusterSection,
    /// Coordinator threads and timers.
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    /// Per-shard limits.
    #[serde(default)]
    pub shard: ShardSection,
}

/// `[cluster]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Number of shard servers.
    pub num_shards: u32,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self { num_shards: 4 }
    }
}

/// `[coordinator]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorSection {
    /// Threads handling shard messages.
    pub shard_workers: usize,
    /// Threads handling client requests.
    pub client_workers: usize,
    /// Period of the cache broadcast, in milliseconds.
    pub cache_update_interval_ms: u64,
    /// Reply timeout in milliseconds; unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_timeout_ms: Option<u64>,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            shard_workers: 4,
            client_workers: 4,
            cache_update_interval_ms: 5000,
            reply_timeout_ms: None,
        }
    }
}

/// `[shard]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShardSection {
    /// Maximum cached answers per shard.
    pub cache_capacity: usize,
    /// Maximum frontier nodes per forwarded message.
    pub max_nodes_per_forward: usize,
}

impl Default for ShardSection {
    fn default() -> Self {
        Self {
            cache_capacity: 4096,
            max_nodes_per_forward: 500,
        }
    }
}

impl ClusterConfig {
    /// Loads `explicit`, or the default path when it exists, or the defaults.
    ///
    /// An explicit path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return read_file(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => read_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }

    /// Rejects values the cluster cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.cluster.num_shards == 0, "cluster.num_shards must be at least 1"),
            (self.coordinator.shard_workers == 0, "coordinator.shard_workers must be at least 1"),
            (self.coordinator.client_workers == 0, "coordinator.client_workers must be at least 1"),
            (
                self.coordinator.cache_update_interval_ms == 0,
                "coordinator.cache_update_interval_ms must be positive",
            ),
            (self.coordinator.reply_timeout_ms == Some(0), "coordinator.reply_timeout_ms must be positive"),
            (self.shard.cache_capacity == 0, "shard.cache_capacity must be at least 1"),
            (self.shard.max_nodes_per_forward == 0, "shard.max_nodes_per_forward must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(ConfigError::Invalid {
                reason: (*reason).to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Coordinator settings derived from this configuration.
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            reply_timeout: self.coordinator.reply_timeout_ms.map(Duration::from_millis),
            cache_update_interval: Duration::from_millis(self.coordinator.cache_update_interval_ms),
            shard_workers: self.coordinator.shard_workers,
            client_workers: self.coordinator.client_workers,
        }
    }

    /// Shard settings derived from this configuration.
    pub fn shard_options(&self) -> ShardOptions {
        ShardOptions {
            cache_capacity: self.shard.cache_capacity,
            max_nodes_per_forward: self.shard.max_nodes_per_forward,
        }
    }
}

fn read_file(path: &Path) -> Result<ClusterConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ClusterConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// The configuration could not be rendered.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
    /// A value is out of range.
    #[error("invalid config: {reason}")]
    Invalid {
        /// Which key and why.
        reason: String,
    },
}

/// `<config dir>/weft/config.toml`, when the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("weft").join("config.toml"))
}
