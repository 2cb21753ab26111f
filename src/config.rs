//! Configuration file support for dirbridge
//!
//! Reads from .dirbridge/config.toml, or the file named by `DIRBRIDGE_CONFIG`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that points at an explicit config file
pub const CONFIG_ENV: &str = "DIRBRIDGE_CONFIG";

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// HTTP transport settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Directory watch settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Path confinement for everything the UI asks for
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Native folder picker settings
    #[serde(default)]
    pub dialog: DialogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Interface to bind. Default: 127.0.0.1
    #[serde(default = "default_host")]
    pub host: String,

    /// Default: 3002
    #[serde(default = "default_port")]
    pub port: u16,

    /// Close HTTP sessions that have not called in for this long.
    /// 0 keeps idle sessions forever. Default: 120000
    #[serde(default = "default_session_idle_ms")]
    pub session_idle_ms: u64,

    /// Shared secret required as `Authorization: Bearer <token>`
    #[serde(default)]
    pub token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_session_idle_ms() -> u64 {
    120_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_idle_ms: default_session_idle_ms(),
            token: None,
        }
    }
}

impl ServerConfig {
    pub fn session_idle(&self) -> Option<Duration> {
        if self.session_idle_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.session_idle_ms))
        }
    }
}

/// Which notify backend installs the OS-level watch
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// inotify / FSEvents / ReadDirectoryChangesW
    #[default]
    Native,
    /// Periodic rescans, for network mounts and WSL paths
    Poll,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    #[serde(default)]
    pub backend: WatchBackend,

    /// Hold notifications for a path until it has been quiet this long.
    /// 0 disables coalescing (one notification per underlying event).
    #[serde(default)]
    pub debounce_ms: u64,

    /// Rescan interval for the poll backend
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Upper bound for `debounce_ms`
pub const MAX_DEBOUNCE_MS: u64 = 60_000;

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backend: WatchBackend::Native,
            debounce_ms: 0,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Option<Duration> {
        if self.debounce_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.debounce_ms.min(MAX_DEBOUNCE_MS)))
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SandboxConfig {
    /// Directories the UI may touch. Empty means unrestricted.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Whether a folder chosen in the picker becomes an allowed root
    /// Default: true
    #[serde(default = "default_true")]
    pub grant_picked: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            grant_picked: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DialogConfig {
    #[serde(default = "default_dialog_title")]
    pub title: String,

    /// Directory the picker opens in
    #[serde(default)]
    pub start_dir: Option<PathBuf>,
}

fn default_dialog_title() -> String {
    "Select folder".to_string()
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            title: default_dialog_title(),
            start_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load config from `DIRBRIDGE_CONFIG` or the nearest .dirbridge/config.toml
    /// Returns default config if no file exists or it cannot be parsed
    pub fn load() -> Self {
        let Some(path) = Self::find_config_path() else {
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(config) => {
                log::debug!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Load an explicit config file, failing loudly
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Find config.toml via env var, then by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".dirbridge").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// `host:port` for the HTTP transport
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
