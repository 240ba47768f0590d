//! Configuration loading.
//!
//! One TOML file, loaded once at startup. Sections: `[listen]` (transport
//! socket), `[transport]` (wire format + send timeout), `[database]` and
//! `[directory]` (ranks, permissions, mutes for the bundled directory
//! implementation).

use crate::message::WireFormat;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Gateway listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address game servers connect to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// Outbound transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Wire encoding for both directions.
    #[serde(default = "default_format")]
    pub format: WireFormat,
    /// Bounded send timeout; messages exceeding it are dropped.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl TransportConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Configuration for the bundled player directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryConfig {
    /// Permissions granted to every player.
    #[serde(default)]
    pub default_permissions: Vec<String>,
    /// Handles whose chat is suppressed.
    #[serde(default)]
    pub muted: Vec<Uuid>,
    /// Staff entries with elevated rank and extra permissions.
    #[serde(default)]
    pub staff: Vec<StaffEntry>,
}

/// One staff member in the directory config.
#[derive(Debug, Clone, Deserialize)]
pub struct StaffEntry {
    pub handle: Uuid,
    #[serde(default)]
    pub rank: u32,
    /// Optional name-tag prefix (e.g. `§c[Admin]`).
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_bind() -> SocketAddr {
    "127.0.0.1:5577".parse().expect("valid default bind address")
}

fn default_format() -> WireFormat {
    WireFormat::Json
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_db_path() -> String {
    "chatlink.db".to_string()
}
