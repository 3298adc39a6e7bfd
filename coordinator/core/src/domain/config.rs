// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Daemon Configuration
//
// Defines the YAML configuration schema for the berth daemon:
// - Listener settings (TCP bind address/port, Unix socket)
// - Storage backend selection (SQLite file or in-memory)
// - Port allocation range and reserved ports
// - Lock, message, and agent liveness defaults
// - Expiry sweeper cadence
// - Logging level and format

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::agent::LivenessThresholds;
use crate::domain::repository::{SqliteConfig, StorageBackend};
use crate::domain::service::PortRange;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ports: PortsConfig,

    #[serde(default)]
    pub locks: LocksConfig,

    #[serde(default)]
    pub messages: MessagesConfig,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub sweeper: SweeperConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP bind address (loopback unless you know what you are doing)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Unix socket path; `null` disables the Unix listener
    #[serde(default = "default_socket_path")]
    pub socket_path: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
            socket_path: default_socket_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::default(),
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_range_min")]
    pub range_min: u32,

    #[serde(default = "default_range_max")]
    pub range_max: u32,

    /// Ports never handed out by automatic probing
    #[serde(default = "default_reserved_ports")]
    pub reserved: Vec<u16>,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            range_min: default_range_min(),
            range_max: default_range_max(),
            reserved: default_reserved_ports(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocksConfig {
    #[serde(default = "default_lock_ttl_ms")]
    pub default_ttl_ms: i64,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_lock_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_message_limit")]
    pub default_limit: u32,

    #[serde(default = "default_max_message_limit")]
    pub max_limit: u32,

    #[serde(default = "default_max_poll_timeout_ms")]
    pub max_poll_timeout_ms: u64,

    /// Per-subscriber queue depth before the subscriber is dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            default_limit: default_message_limit(),
            max_limit: default_max_message_limit(),
            max_poll_timeout_ms: default_max_poll_timeout_ms(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: i64,

    #[serde(default = "default_dead_after_ms")]
    pub dead_after_ms: i64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: default_stale_after_ms(),
            dead_after_ms: default_dead_after_ms(),
        }
    }
}

impl AgentsConfig {
    pub fn thresholds(&self) -> LivenessThresholds {
        LivenessThresholds {
            stale_after_ms: self.stale_after_ms,
            dead_after_ms: self.dead_after_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    9876
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".berth"))
        .unwrap_or_else(|| PathBuf::from(".berth"))
}

fn default_socket_path() -> Option<PathBuf> {
    Some(data_dir().join("berth.sock"))
}

fn default_database_path() -> PathBuf {
    data_dir().join("berth.db")
}

fn default_range_min() -> u32 {
    3100
}

fn default_range_max() -> u32 {
    9999
}

fn default_reserved_ports() -> Vec<u16> {
    vec![
        3306, 5000, 5432, 5672, 6379, 8000, 8080, 8443, 8888, 9000, 9090, 9200, 9876,
    ]
}

fn default_lock_ttl_ms() -> i64 {
    5 * 60 * 1000
}

fn default_message_limit() -> u32 {
    100
}

fn default_max_message_limit() -> u32 {
    1000
}

fn default_max_poll_timeout_ms() -> u64 {
    60_000
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_stale_after_ms() -> i64 {
    10 * 60 * 1000
}

fn default_dead_after_ms() -> i64 {
    20 * 60 * 1000
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. BERTH_CONFIG_PATH environment variable
    /// 2. ./berth.yaml (working directory)
    /// 3. ~/.berth/config.yaml (user home)
    /// 4. /etc/berth/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("BERTH_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./berth.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".berth").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/berth/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BERTH_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: BERTH_PORT={}", port);
                    self.network.port = port;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for BERTH_PORT: '{}'. Ignoring.", val);
                }
            }
        }

        if let Ok(val) = std::env::var("BERTH_HOST") {
            tracing::info!("Environment override: BERTH_HOST={}", val);
            self.network.bind_address = val;
        }

        if let Ok(val) = std::env::var("BERTH_SOCKET") {
            match val.to_lowercase().as_str() {
                "" | "none" | "off" => self.network.socket_path = None,
                _ => self.network.socket_path = Some(PathBuf::from(val)),
            }
        }

        if let Ok(val) = std::env::var("BERTH_DB") {
            if val == ":memory:" {
                self.storage.backend = StorageKind::Memory;
            } else {
                self.storage.database_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("BERTH_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        PortRange::new(self.ports.range_min, self.ports.range_max)
            .map_err(|e| ConfigError::Invalid(format!("ports: {}", e)))?;

        if self.agents.stale_after_ms <= 0 {
            return Err(ConfigError::Invalid(
                "agents.stale_after_ms must be positive".to_string(),
            ));
        }
        if self.agents.stale_after_ms >= self.agents.dead_after_ms {
            return Err(ConfigError::Invalid(format!(
                "agents.stale_after_ms ({}) must be less than agents.dead_after_ms ({})",
                self.agents.stale_after_ms, self.agents.dead_after_ms
            )));
        }
        if self.locks.default_ttl_ms <= 0 {
            return Err(ConfigError::Invalid(
                "locks.default_ttl_ms must be positive".to_string(),
            ));
        }
        if self.messages.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid(
                "messages.subscriber_buffer cannot be zero".to_string(),
            ));
        }
        if self.messages.default_limit == 0 || self.messages.default_limit > self.messages.max_limit {
            return Err(ConfigError::Invalid(
                "messages.default_limit must be between 1 and messages.max_limit".to_string(),
            ));
        }
        if self.sweeper.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "sweeper.interval_seconds cannot be zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn port_range(&self) -> Result<PortRange, ConfigError> {
        PortRange::new(self.ports.range_min, self.ports.range_max)
            .map_err(|e| ConfigError::Invalid(format!("ports: {}", e)))
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match self.storage.backend {
            StorageKind::Memory => StorageBackend::InMemory,
            StorageKind::Sqlite => StorageBackend::Sqlite(SqliteConfig {
                path: self.storage.database_path.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.network.port, 9876);
        assert_eq!(config.network.bind_address, "127.0.0.1");
        assert_eq!(config.ports.range_min, 3100);
        assert_eq!(config.ports.range_max, 9999);
        assert!(config.ports.reserved.contains(&9876));
        assert_eq!(config.locks.default_ttl_ms, 300_000);
        assert_eq!(config.agents.thresholds(), LivenessThresholds::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
network:
  port: 7000
  socket_path: null
storage:
  backend: memory
logging:
  format: json
"#;
        let config = DaemonConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.network.port, 7000);
        assert!(config.network.socket_path.is_none());
        assert_eq!(config.storage.backend, StorageKind::Memory);
        assert!(matches!(config.storage_backend(), StorageBackend::InMemory));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.messages.subscriber_buffer, 256);
    }

    #[test]
    fn test_validation() {
        let mut config = DaemonConfig::default();

        config.ports.range_min = 5000;
        config.ports.range_max = 4000;
        assert!(config.validate().is_err());
        config.ports = PortsConfig::default();

        config.agents.stale_after_ms = config.agents.dead_after_ms;
        assert!(config.validate().is_err());
        config.agents = AgentsConfig::default();

        config.locks.default_ttl_ms = 0;
        assert!(config.validate().is_err());
        config.locks = LocksConfig::default();

        config.messages.subscriber_buffer = 0;
        assert!(config.validate().is_err());
        config.messages = MessagesConfig::default();

        config.sweeper.interval_seconds = 0;
        assert!(config.validate().is_err());
        config.sweeper = SweeperConfig::default();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let result = DaemonConfig::load_or_default(Some(PathBuf::from(
            "/nonexistent/berth/config.yaml",
        )));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
