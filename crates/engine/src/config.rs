//! Server configuration.
//!
//! Loaded once in `main` from a YAML file and passed down explicitly; every
//! field has a serde default so a partial (or absent) file works.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared password; empty means no auth required.
    #[serde(default)]
    pub password: String,
    /// Number of logical databases.
    #[serde(default = "default_databases")]
    pub databases: usize,
    /// Idle-connection timeout in seconds; 0 disables reaping.
    #[serde(default)]
    pub keepalive: u64,
    /// Enable undo-log rollback for MULTI and TCC commit.
    #[serde(default)]
    pub open_atomic_tx: bool,

    /// Enable append-only persistence.
    #[serde(default)]
    pub append_only: bool,
    #[serde(default = "default_aof_filename")]
    pub aof_filename: String,
    /// 0 = always, 1 = every second, 2 = no.
    #[serde(default)]
    pub aof_fsync: u8,
    #[serde(default)]
    pub auto_aof_rewrite: bool,
    /// Growth percentage over the last-rewrite size that triggers a rewrite.
    #[serde(default = "default_rewrite_percentage")]
    pub auto_aof_rewrite_percentage: u64,
    /// Minimum file size (MB) before auto-rewrite considers firing.
    #[serde(default = "default_rewrite_min_size")]
    pub auto_aof_rewrite_min_size: u64,

    /// This node's advertised host:port; required in cluster mode.
    #[serde(default, rename = "self")]
    pub self_addr: String,
    /// Peer host:port list; non-empty implies cluster mode.
    #[serde(default)]
    pub peers: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6179
}

fn default_databases() -> usize {
    16
}

fn default_aof_filename() -> String {
    "dump.aof".to_string()
}

fn default_rewrite_percentage() -> u64 {
    100
}

fn default_rewrite_min_size() -> u64 {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty config must deserialize")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let cfg: ServerConfig = serde_yaml::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.databases == 0 {
            return Err(ConfigError::Invalid("databases must be positive".into()));
        }
        if self.aof_fsync > 2 {
            return Err(ConfigError::Invalid(
                "aof_fsync must be 0 (always), 1 (every sec) or 2 (no)".into(),
            ));
        }
        if self.is_cluster() && self.self_addr.is_empty() {
            return Err(ConfigError::Invalid(
                "cluster mode requires 'self' (host:port)".into(),
            ));
        }
        Ok(())
    }

    pub fn is_cluster(&self) -> bool {
        !self.peers.is_empty()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
