//! Client configuration.
//!
//! Settings are resolved in this order (later wins):
//!
//! 1. Built-in defaults
//! 2. A JSON file passed to [`Config::load`]
//! 3. `TRIPLAYER_SOCKET`, `TRIPLAYER_ADDR` and `TRIPLAYER_TIMEOUT_MS`
//!    environment variables

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default protocol timeout for connect, send and receive.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`Config`].
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid value for an environment variable.
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// A value is outside the range the client can work with.
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Where the sysmodule listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// TCP address (the console build listens on a loopback port).
    Tcp(SocketAddr),
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::Unix(default_socket_path())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// Resolve the default socket path for the sysmodule.
///
/// Resolution order:
/// 1. `$XDG_RUNTIME_DIR/triplayer.sock` (Linux standard)
/// 2. `~/Library/Caches/triplayer.sock` (macOS)
/// 3. `/tmp/triplayer.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("triplayer.sock");
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join("triplayer.sock");
    }

    PathBuf::from("/tmp/triplayer.sock")
}

/// Settings for a [`Sysmodule`](crate::sysmodule::Sysmodule) and its connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: Endpoint,
    /// Connect/send/receive timeout in milliseconds.
    pub timeout_ms: u64,
    /// Minimum time between two state polls.
    pub poll_interval_ms: u64,
    /// Sleep when there is nothing to do.
    pub idle_sleep_ms: u64,
    /// Sleep while the engine is in an error state.
    pub error_sleep_ms: u64,
    /// How often blocking calls re-check the error state.
    pub wait_interval_ms: u64,
    /// Maximum number of songs sent when replacing the queue.
    pub queue_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: 100,
            idle_sleep_ms: 5,
            error_sleep_ms: 50,
            wait_interval_ms: 5,
            queue_limit: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Loaded config from {}", path.display());
        config.with_env_overrides()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::default().with_env_overrides()
    }

    /// Apply `TRIPLAYER_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = lookup("TRIPLAYER_SOCKET") {
            self.endpoint = Endpoint::Unix(PathBuf::from(path));
        }

        // A TCP address wins over a socket path when both are set
        if let Some(addr) = lookup("TRIPLAYER_ADDR") {
            let parsed = addr
                .parse()
                .map_err(|_| ConfigError::InvalidValue("TRIPLAYER_ADDR".into(), addr.clone()))?;
            self.endpoint = Endpoint::Tcp(parsed);
        }

        if let Some(timeout) = lookup("TRIPLAYER_TIMEOUT_MS") {
            self.timeout_ms = timeout.parse().map_err(|_| {
                ConfigError::InvalidValue("TRIPLAYER_TIMEOUT_MS".into(), timeout.clone())
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check that every interval is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation("timeout_ms must be > 0".into()));
        }
        if self.wait_interval_ms == 0 {
            return Err(ConfigError::Validation("wait_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn error_sleep(&self) -> Duration {
        Duration::from_millis(self.error_sleep_ms)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }
}
