//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (`~/.config/autod/config.toml` by default)
//! - Environment variables (`AUTOD_*`)
//! - CLI arguments (applied by the binary on top of both)

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AutodError, Result};
use crate::protocol::DEFAULT_NEW_COMMAND_TIMEOUT_SECS;
use crate::server::{ServerConfig, DEFAULT_PORT};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ListenConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub sessions: SessionsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| AutodError::Config(format!("Failed to read config file: {e}")))?;

        Ok(toml::from_str(&content)?)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("autod").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = lookup("AUTOD_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("AUTOD_PORT").and_then(|v| v.parse().ok()) {
            config.server.port = port;
        }
        if let Some(cors) = lookup("AUTOD_CORS").and_then(|v| v.parse().ok()) {
            config.server.cors = cors;
        }

        if let Some(secs) = lookup("AUTOD_NEW_COMMAND_TIMEOUT").and_then(|v| v.parse().ok()) {
            config.sessions.new_command_timeout_secs = secs;
        }
        if let Some(ms) = lookup("AUTOD_WATCHDOG_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.sessions.watchdog_interval_ms = ms;
        }
        if let Some(max) = lookup("AUTOD_MAX_SESSIONS").and_then(|v| v.parse().ok()) {
            config.sessions.max_sessions = max;
        }

        config
    }

    /// Load the file at `path` (or the default location, if present) and
    /// overlay the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        Ok(file.merge(Self::from_env()))
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults).
    ///
    /// An overlay value equal to the default is indistinguishable from an
    /// unset one, so it cannot switch a setting back to its default: a file
    /// with `cors = false` stays disabled even with `AUTOD_CORS=true`.
    pub fn merge(self, other: Self) -> Self {
        fn pick<T: PartialEq>(base: T, over: T, default: T) -> T {
            if over != default {
                over
            } else {
                base
            }
        }

        let server = ListenConfig::default();
        let sessions = SessionsConfig::default();
        Self {
            server: ListenConfig {
                host: pick(self.server.host, other.server.host, server.host),
                port: pick(self.server.port, other.server.port, server.port),
                max_body_size: pick(
                    self.server.max_body_size,
                    other.server.max_body_size,
                    server.max_body_size,
                ),
                cors: pick(self.server.cors, other.server.cors, server.cors),
            },
            sessions: SessionsConfig {
                new_command_timeout_secs: pick(
                    self.sessions.new_command_timeout_secs,
                    other.sessions.new_command_timeout_secs,
                    sessions.new_command_timeout_secs,
                ),
                watchdog_interval_ms: pick(
                    self.sessions.watchdog_interval_ms,
                    other.sessions.watchdog_interval_ms,
                    sessions.watchdog_interval_ms,
                ),
                max_sessions: pick(
                    self.sessions.max_sessions,
                    other.sessions.max_sessions,
                    sessions.max_sessions,
                ),
            },
        }
    }

    /// Build the server configuration
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|e| AutodError::Config(format!("Invalid host '{}': {e}", self.server.host)))?;

        let mut config = ServerConfig::default()
            .with_addr(SocketAddr::new(ip, self.server.port))
            .with_new_command_timeout(self.sessions.new_command_timeout())
            .with_watchdog_interval(Duration::from_millis(self.sessions.watchdog_interval_ms.max(1)))
            .with_max_sessions(self.sessions.max_sessions)
            .with_max_body_size(self.server.max_body_size);
        if !self.server.cors {
            config = config.without_cors();
        }
        Ok(config)
    }
}

/// Listener configuration (`[server]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Enable CORS
    pub cors: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_body_size: 10 * 1024 * 1024, // 10 MB
            cors: true,
        }
    }
}

/// Session lifecycle configuration (`[sessions]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Default idle timeout in seconds; 0 disables it
    pub new_command_timeout_secs: u64,

    /// Watchdog sweep interval in milliseconds
    pub watchdog_interval_ms: u64,

    /// Maximum concurrently active sessions (0 = unlimited)
    pub max_sessions: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            new_command_timeout_secs: DEFAULT_NEW_COMMAND_TIMEOUT_SECS,
            watchdog_interval_ms: 500,
            max_sessions: 0,
        }
    }
}

impl SessionsConfig {
    /// Default idle timeout; `None` when disabled
    pub fn new_command_timeout(&self) -> Option<Duration> {
        (self.new_command_timeout_secs > 0)
            .then(|| Duration::from_secs(self.new_command_timeout_secs))
    }
}
