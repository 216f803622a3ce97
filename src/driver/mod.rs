//! Automation driver collaborator.
//!
//! The core never automates anything itself. It talks to a [`Driver`] that
//! declares capability constraints, allocates one [`DriverContext`] per
//! session, executes commands against it, and releases it on termination.

mod fake;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::{CapabilitySet, ConstraintSet};

pub use fake::{FakeDriver, CRASH_SCRIPT, ELEMENT_KEY, FAKE_COMMANDS};

/// Error raised by a driver.
///
/// `fatal` signals that the context is gone; the session manager terminates
/// the session when it sees one.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    /// W3C error code
    pub code: &'static str,
    /// Human-readable message
    pub message: String,
    /// Driver-side trace
    pub stacktrace: Option<String>,
    /// Context lost
    pub fatal: bool,
}

impl DriverError {
    /// Recoverable error with a W3C code
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            stacktrace: None,
            fatal: false,
        }
    }

    /// Recoverable `invalid argument`
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("invalid argument", message)
    }

    /// Context loss
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            ..Self::new("unknown error", message)
        }
    }

    /// Attach a trace
    pub fn with_stacktrace(mut self, trace: impl Into<String>) -> Self {
        self.stacktrace = Some(trace.into());
        self
    }
}

/// Result type alias for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Handle to a driver-side automation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverContext {
    /// Driver-assigned handle
    pub handle: String,
}

impl DriverContext {
    /// Wrap a handle
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
        }
    }
}

/// Automation engine consumed by the session manager and command router.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Name used in logs and origin traces
    fn name(&self) -> &str;

    /// Capability constraints; read once at startup
    fn declare_constraints(&self) -> ConstraintSet;

    /// Whether `command` is implemented
    fn implements(&self, command: &str) -> bool;

    /// Allocate a context for a new session
    async fn create_context(&self, capabilities: &CapabilitySet) -> DriverResult<DriverContext>;

    /// Run one command
    async fn execute(
        &self,
        context: &DriverContext,
        command: &str,
        args: Value,
    ) -> DriverResult<Value>;

    /// Release a context
    async fn release_context(&self, context: DriverContext) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        let err = DriverError::fatal("device disconnected");
        assert!(err.fatal);
        assert_eq!(err.code, "unknown error");
        assert_eq!(err.to_string(), "device disconnected");
    }

    #[test]
    fn test_recoverable_errors() {
        let err = DriverError::invalid_argument("bad orientation").with_stacktrace("at setOrientation");
        assert!(!err.fatal);
        assert_eq!(err.stacktrace.as_deref(), Some("at setOrientation"));
    }
}
