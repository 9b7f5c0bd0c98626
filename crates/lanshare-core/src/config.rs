//! Configuration system for lanshare.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LANSHARE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/lanshare/config.toml
//!   3. ~/.config/lanshare/config.toml

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{ANNOUNCE_INTERVAL_SECS, BROADCAST_ADDR, DISCOVERY_PORT, UPLOAD_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanshareConfig {
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the upload server binds to. Empty = first non-loopback address.
    pub bind_ip: String,
    /// Destination of announcement datagrams.
    pub broadcast_addr: String,
    /// UDP port shared by all peers for announcements.
    pub discovery_port: u16,
    /// TCP port shared by all peers for chunk requests.
    pub upload_port: u16,
    pub announce_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Upper bound on concurrently served upload connections.
    pub max_upload_connections: usize,
    pub connect_timeout_secs: u64,
    /// Longest a single read or write may stall once connected, on both the
    /// serving and the fetching side.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Holds `downloads/`, `logs/` and, when not hosting, `chunks/`.
    pub work_dir: PathBuf,
    /// Content index snapshot. Empty = `<work_dir>/content_index.json`.
    pub index_file: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: String::new(),
            broadcast_addr: BROADCAST_ADDR.to_string(),
            discovery_port: DISCOVERY_PORT,
            upload_port: UPLOAD_PORT,
            announce_interval_secs: ANNOUNCE_INTERVAL_SECS,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_upload_connections: 64,
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: data_dir(),
            index_file: PathBuf::new(),
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl NetworkConfig {
    /// Explicit bind address, if one is configured.
    pub fn bind_ip(&self) -> Result<Option<IpAddr>, ConfigError> {
        if self.bind_ip.is_empty() {
            return Ok(None);
        }
        self.bind_ip
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidAddress(self.bind_ip.clone()))
    }

    pub fn broadcast_ip(&self) -> Result<IpAddr, ConfigError> {
        self.broadcast_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.broadcast_addr.clone()))
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }
}

impl TransferConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl StorageConfig {
    pub fn chunks_dir(&self) -> PathBuf {
        self.work_dir.join("chunks")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.work_dir.join("downloads")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    pub fn index_path(&self) -> PathBuf {
        if self.index_file.as_os_str().is_empty() {
            self.work_dir.join("content_index.json")
        } else {
            self.index_file.clone()
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("lanshare")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("lanshare")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid IP address: {0:?}")]
    InvalidAddress(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LanshareConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load config from an explicit file, then apply env overrides.
    /// A missing file yields defaults.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            LanshareConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LANSHARE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&LanshareConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply LANSHARE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LANSHARE_NETWORK__BIND_IP") {
            self.network.bind_ip = v;
        }
        if let Ok(v) = std::env::var("LANSHARE_NETWORK__BROADCAST_ADDR") {
            self.network.broadcast_addr = v;
        }
        if let Ok(v) = std::env::var("LANSHARE_NETWORK__DISCOVERY_PORT") {
            if let Ok(p) = v.parse() {
                self.network.discovery_port = p;
            }
        }
        if let Ok(v) = std::env::var("LANSHARE_NETWORK__UPLOAD_PORT") {
            if let Ok(p) = v.parse() {
                self.network.upload_port = p;
            }
        }
        if let Ok(v) = std::env::var("LANSHARE_STORAGE__WORK_DIR") {
            self.storage.work_dir = PathBuf::from(v);
        }
    }
}
