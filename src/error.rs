//! Autod error types.
//!
//! # Error Classification
//!
//! Every failure the core produces is a distinct, typed variant:
//!
//! - **Capability errors** (`InvalidCapabilities`, `NoMatchingCapabilities`)
//!   are resolved inside the negotiator and surface as HTTP 400.
//! - **Creation errors** (`SessionConflict`, `SessionNotCreated`) are raised
//!   by the session manager before any session is registered.
//! - **Routing errors** (`NoSuchSession`, `UnknownMethod`, `UnknownCommand`)
//!   are raised by the command router and leave the idle timer untouched.
//! - **Driver errors** are passed through opaquely via `#[source]`.
//!
//! Each variant maps onto a W3C error code (see [`AutodError::w3c_code`]) and
//! an HTTP status (see [`AutodError::status_code`]).

use http::StatusCode;
use thiserror::Error;

use crate::driver::DriverError;

/// Message used for every lookup against an absent or closed session.
pub const NO_SUCH_SESSION_MESSAGE: &str = "A session is either terminated or not started";

/// Message used when a command exists but nothing implements it.
pub const NOT_IMPLEMENTED_MESSAGE: &str = "Method has not yet been implemented";

/// Autod errors.
#[derive(Error, Debug)]
pub enum AutodError {
    /// A capability was missing, disallowed, mistyped, or unknown.
    #[error("{0}")]
    InvalidCapabilities(String),

    /// No usable capability set was found, even after legacy fallback.
    #[error("No matching capabilities found: {0}")]
    NoMatchingCapabilities(String),

    /// Another active session holds the same uniqueness key.
    #[error("Session conflict: {0}")]
    SessionConflict(String),

    /// Creation was refused for a reason other than a conflict.
    #[error("Session not created: {0}")]
    SessionNotCreated(String),

    /// The session id is unknown or the session was terminated.
    #[error("{}", NO_SUCH_SESSION_MESSAGE)]
    NoSuchSession(String),

    /// The command is known but has no implementation for this session.
    #[error("{}: '{command}' is not yet implemented for this session", NOT_IMPLEMENTED_MESSAGE)]
    UnknownMethod {
        /// Command name.
        command: String,
        /// Driver-facing entry point that would have handled it.
        origin: String,
    },

    /// No command is mapped to this request.
    #[error("The requested resource could not be found: {method} {path}")]
    UnknownCommand {
        /// HTTP method.
        method: String,
        /// Request path below the session.
        path: String,
    },

    /// Malformed request body or argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error reported by the driver collaborator.
    #[error("{0}")]
    Driver(#[source] DriverError),

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Autod operations
pub type Result<T> = std::result::Result<T, AutodError>;

impl AutodError {
    /// W3C error code carried in the `error` field of error responses.
    pub fn w3c_code(&self) -> &'static str {
        match self {
            AutodError::InvalidCapabilities(_)
            | AutodError::NoMatchingCapabilities(_)
            | AutodError::InvalidArgument(_)
            | AutodError::Json(_) => "invalid argument",
            AutodError::SessionConflict(_) | AutodError::SessionNotCreated(_) => {
                "session not created"
            },
            AutodError::NoSuchSession(_) => "invalid session id",
            AutodError::UnknownMethod { .. } => "unknown method",
            AutodError::UnknownCommand { .. } => "unknown command",
            AutodError::Driver(err) => err.code,
            AutodError::Server(_) | AutodError::Config(_) | AutodError::Io(_) => "unknown error",
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AutodError::InvalidCapabilities(_)
            | AutodError::NoMatchingCapabilities(_)
            | AutodError::InvalidArgument(_)
            | AutodError::Json(_) => StatusCode::BAD_REQUEST,
            AutodError::NoSuchSession(_)
            | AutodError::UnknownMethod { .. }
            | AutodError::UnknownCommand { .. } => StatusCode::NOT_FOUND,
            AutodError::SessionConflict(_)
            | AutodError::SessionNotCreated(_)
            | AutodError::Driver(_)
            | AutodError::Server(_)
            | AutodError::Config(_)
            | AutodError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Trace reported in the `stacktrace` field of error responses.
    pub fn stacktrace(&self) -> String {
        match self {
            AutodError::UnknownMethod { origin, .. } => {
                format!("NotYetImplementedError: {NOT_IMPLEMENTED_MESSAGE}\n    at {origin}")
            },
            AutodError::Driver(err) => err.stacktrace.clone().unwrap_or_default(),
            _ => String::new(),
        }
    }
}

impl From<DriverError> for AutodError {
    fn from(err: DriverError) -> Self {
        AutodError::Driver(err)
    }
}

impl From<toml::de::Error> for AutodError {
    fn from(err: toml::de::Error) -> Self {
        AutodError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_errors_are_bad_requests() {
        let err = AutodError::InvalidCapabilities("'platformName' can't be blank".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.w3c_code(), "invalid argument");
        assert_eq!(err.to_string(), "'platformName' can't be blank");
    }

    #[test]
    fn test_unknown_method_carries_origin() {
        let err = AutodError::UnknownMethod {
            command: "getScreenshot".into(),
            origin: "FakeDriver.execute_command (getScreenshot)".into(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.w3c_code(), "unknown method");
        assert!(err.to_string().contains("not yet been implemented"));
        assert!(err.to_string().contains("not yet implemented"));
        assert!(err.stacktrace().contains("FakeDriver.execute_command"));
    }

    #[test]
    fn test_no_such_session_message() {
        let err = AutodError::NoSuchSession("abc".into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("terminated"));
    }

    #[test]
    fn test_conflict_is_distinct_from_validation() {
        let err = AutodError::SessionConflict("app 'a.apk' is in use".into());
        assert_eq!(err.w3c_code(), "session not created");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
