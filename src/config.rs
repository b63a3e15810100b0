//! Configuration for pinwatch

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the config file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pinwatch")
        .join("config.toml")
}

/// Resolve a user-supplied port string.
///
/// Surrounding whitespace is ignored. Anything that is not a plain run of
/// ASCII digits fitting in a `u16` yields `default`.
pub fn parse_port(input: &str, default: u16) -> u16 {
    let trimmed = input.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return default;
    }
    trimmed.parse().unwrap_or(default)
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project root; the `.local` layout is created beneath it
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub ipfs: IpfsConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

/// Ports and timings for the `serve ipfs` session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// Public HTTP gateway port
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,

    /// Block exchange (swarm) port
    #[serde(default = "default_swarm_port")]
    pub swarm_port: u16,

    /// Control API port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Delay after startup before waiting for the shutdown signal
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Static file server settings for `serve http`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Port used when none is given
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Port used when the given value does not parse
    #[serde(default = "default_http_fallback_port")]
    pub fallback_port: u16,

    /// Delay after startup before waiting for the shutdown signal
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Sync engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum ingests running at once across all entries
    #[serde(default = "default_max_concurrent_ingests")]
    pub max_concurrent_ingests: usize,

    /// Capacity of the filesystem event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_swarm_port() -> u16 {
    4001
}

fn default_api_port() -> u16 {
    5001
}

fn default_settle_delay_ms() -> u64 {
    3000
}

fn default_http_port() -> u16 {
    8081
}

fn default_http_fallback_port() -> u16 {
    8080
}

fn default_max_concurrent_ingests() -> usize {
    16
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            gateway_port: default_gateway_port(),
            swarm_port: default_swarm_port(),
            api_port: default_api_port(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            fallback_port: default_http_fallback_port(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_ingests: default_max_concurrent_ingests(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            ipfs: IpfsConfig::default(),
            http: HttpConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl IpfsConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl HttpConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// `<root>/.local`
    pub fn local_dir(&self) -> PathBuf {
        self.root.join(".local")
    }

    /// Watched content directory for `serve ipfs`
    pub fn content_dir(&self) -> PathBuf {
        self.local_dir().join("ipfs").join("content")
    }

    /// Store working directory for `serve ipfs`
    pub fn repo_dir(&self) -> PathBuf {
        self.local_dir().join("ipfs").join("repo")
    }

    /// Document root for `serve http`
    pub fn http_dir(&self) -> PathBuf {
        self.local_dir().join("http")
    }
}
