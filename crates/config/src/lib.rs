//! Configuration for the sender and receiver, stored as TOML.
//!
//! Every field has a default so a missing file or a sparse file both
//! work; `load()` falls back to defaults when the path does not exist.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chunkferry_protocol::Priority;

/// Errors loading or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration, one file shared by both roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub transfer: TransferSection,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub priority: PriorityConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port the receiver listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address the receiver binds.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// Timeout for the initial connection attempt, seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Per-chunk acknowledgment timeout, seconds.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSection {
    /// Maximum chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// Per-chunk retry bound before the job fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whether resumed attempts skip receiver-held chunks.
    #[serde(default = "default_true")]
    pub enable_resume: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// zstd level (1-19).
    #[serde(default = "default_compression_level")]
    pub level: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Path to the hex-encoded pre-shared key.
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Priority assigned when a file is prepared without one.
    #[serde(default)]
    pub default: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Where the JSON status snapshot is written (per role, the file
    /// name gains a role prefix).
    #[serde(default = "default_status_dir")]
    pub status_dir: PathBuf,
}

fn default_port() -> u16 {
    5001
}

fn default_listen_host() -> String {
    "0.0.0.0".into()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_ack_timeout() -> u64 {
    30
}

fn default_chunk_size() -> u32 {
    1024 * 1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> i32 {
    3
}

fn default_key_file() -> PathBuf {
    PathBuf::from("secret.key")
}

fn default_status_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            listen_host: default_listen_host(),
            connect_timeout_secs: default_connect_timeout(),
            ack_timeout_secs: default_ack_timeout(),
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            enable_resume: true,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_compression_level(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            status_dir: default_status_dir(),
        }
    }
}

impl TransferConfig {
    /// Loads configuration from `path`, or defaults when the file does
    /// not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: TransferConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            Ok(TransferConfig::default())
        }
    }

    /// Saves the configuration as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Per-chunk acknowledgment timeout.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.network.ack_timeout_secs)
    }

    /// Connection attempt timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.network.connect_timeout_secs)
    }
}
