//! Configuration management for the murmur daemon.
//!
//! The config file is TOML. On first run, if no config exists, one is
//! written with defaults to the requested path. Every section has serde
//! defaults so a partial file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::gossip::DEFAULT_VACUUM_INTERVAL_SECS;
use crate::constants::integration::*;
use crate::error::AppError;

/// Get the platform-specific data directory for murmur
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        // Windows: %APPDATA%\murmur
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("murmur")
    } else {
        // Linux/Mac: ~/.murmur
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".murmur")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub gossip: GossipConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "murmur".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Accept incoming connections; false gives a connect-only node
    pub listen: bool,
    pub listen_address: String,
    /// 0 picks an ephemeral port
    pub port: u16,
    /// Public host other peers should dial, when it differs from the bind address
    pub external_address: Option<String>,
    /// host:port entries dialed at startup
    pub bootstrap_peers: Vec<String>,
    pub min_integration: usize,
    pub max_clients: usize,
    pub tick_interval_ms: u64,
    pub connect_timeout_secs: u64,
    /// Honour the remote shutdown sentinel. Anyone who can connect can then
    /// stop the node.
    pub allow_remote_shutdown: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: true,
            listen_address: "0.0.0.0".to_string(),
            port: 9000,
            external_address: None,
            bootstrap_peers: vec![],
            min_integration: DEFAULT_MIN_INTEGRATION,
            max_clients: DEFAULT_MAX_CLIENTS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            allow_remote_shutdown: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    pub vacuum_interval_secs: u64,
    /// Channels tuned in at startup
    pub channels: Vec<String>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            vacuum_interval_secs: DEFAULT_VACUUM_INTERVAL_SECS,
            channels: vec![String::new()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// "memory" or "sled"
    pub backend: String,
    /// Empty means the platform data directory
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            data_dir: String::new(),
        }
    }
}

impl StorageConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            get_data_dir()
        } else {
            PathBuf::from(&self.data_dir)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "compact", "pretty" (multi-line, compact under journald) or "json"
    pub format: String,
    /// "stdout" or "file"
    pub output: String,
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            output: "stdout".to_string(),
            file_path: "./logs/murmurd.log".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let contents = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or write the defaults there and return them.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load_from_file(path);
        }

        let mut config = Config::default();
        config.storage.data_dir = get_data_dir().to_string_lossy().to_string();
        config.save_to_file(path)?;
        tracing::info!("📝 Wrote default configuration to {}", path.display());
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let path = path.as_ref();
        let contents =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let network = &self.network;
        if network.min_integration == 0 {
            return Err(AppError::Config(
                "network.min_integration must be at least 1".to_string(),
            ));
        }
        if network.max_clients < network.min_integration {
            return Err(AppError::Config(format!(
                "network.max_clients ({}) is below network.min_integration ({})",
                network.max_clients, network.min_integration
            )));
        }
        if !matches!(self.storage.backend.as_str(), "memory" | "sled") {
            return Err(AppError::Config(format!(
                "unknown storage backend '{}'",
                self.storage.backend
            )));
        }
        if !matches!(self.logging.format.as_str(), "compact" | "pretty" | "json") {
            return Err(AppError::Config(format!(
                "unknown logging format '{}'",
                self.logging.format
            )));
        }
        if self.gossip.vacuum_interval_secs == 0 {
            return Err(AppError::Config(
                "gossip.vacuum_interval_secs must be positive".to_string(),
            ));
        }
        for channel in &self.gossip.channels {
            crate::message::validate_channel(channel)
                .map_err(|e| AppError::Config(format!("gossip.channels: {}", e)))?;
        }
        Ok(())
    }
}
