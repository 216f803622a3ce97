//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::DEFAULT_NEW_COMMAND_TIMEOUT_SECS;

/// Default listen port
pub const DEFAULT_PORT: u16 = 4723;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Idle timeout applied when a session does not set `newCommandTimeout`;
    /// `None` disables it
    pub new_command_timeout: Option<Duration>,
    /// How often the watchdog sweeps for idle sessions
    pub watchdog_interval: Duration,
    /// Maximum concurrently active sessions (0 = unlimited)
    pub max_sessions: usize,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Enable request logging
    pub logging: bool,
    /// CORS enabled
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            new_command_timeout: Some(Duration::from_secs(DEFAULT_NEW_COMMAND_TIMEOUT_SECS)),
            watchdog_interval: Duration::from_millis(500),
            max_sessions: 0,
            max_body_size: 10 * 1024 * 1024, // 10MB
            logging: true,
            cors_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Create with custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Bind to all interfaces
    pub fn bind_all(mut self) -> Self {
        self.addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.addr.port()));
        self
    }

    /// Set address directly
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Set the default idle timeout; `None` disables it
    pub fn with_new_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.new_command_timeout = timeout;
        self
    }

    /// Set watchdog sweep interval
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Cap concurrently active sessions
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set max body size
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Disable logging
    pub fn without_logging(mut self) -> Self {
        self.logging = false;
        self
    }

    /// Disable CORS
    pub fn without_cors(mut self) -> Self {
        self.cors_enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), DEFAULT_PORT);
        assert!(config.addr.ip().is_loopback());
        assert_eq!(config.new_command_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.max_sessions, 0);
    }

    #[test]
    fn test_bind_all_keeps_port() {
        let config = ServerConfig::default().with_port(9000).bind_all();
        assert_eq!(config.addr.port(), 9000);
        assert!(config.addr.ip().is_unspecified());
    }
}
