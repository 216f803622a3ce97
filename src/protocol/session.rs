//! Session records.
//!
//! A [`Session`] is created once negotiation succeeds and the driver has
//! allocated a context. Its id, protocol, capabilities, and idle timeout are
//! fixed for life; only the session manager moves `state` and
//! `last_activity`.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::capabilities::{CapabilitySet, Protocol};
use super::NEW_COMMAND_TIMEOUT_CAPABILITY;

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Accepting commands
    Active,
    /// Closed; absorbing
    Terminated,
}

/// Why a session was terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Explicit client request
    Deleted,
    /// No command within the idle timeout
    Timeout,
    /// The driver lost its context
    DriverFailure,
    /// Server shutting down
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Deleted => write!(f, "deleted"),
            TerminationReason::Timeout => write!(f, "timeout"),
            TerminationReason::DriverFailure => write!(f, "driver failure"),
            TerminationReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Resolve the idle timeout from `newCommandTimeout` (seconds).
///
/// `0` disables the timeout. Missing, negative, or unparsable values fall
/// back to `default`.
pub fn resolve_idle_timeout(
    capabilities: &CapabilitySet,
    default: Option<Duration>,
) -> Option<Duration> {
    let Some(value) = capabilities.get(NEW_COMMAND_TIMEOUT_CAPABILITY) else {
        return default;
    };

    let secs = value.as_f64();
    if secs == Some(0.0) {
        return None;
    }

    match secs.and_then(|secs| Duration::try_from_secs_f64(secs).ok()) {
        Some(timeout) => Some(timeout),
        None => {
            warn!(value = %value, "ignoring invalid {NEW_COMMAND_TIMEOUT_CAPABILITY}");
            default
        },
    }
}

/// An automation session
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    protocol: Protocol,
    capabilities: CapabilitySet,
    idle_timeout: Option<Duration>,
    uniqueness_key: Option<String>,
    created_at: DateTime<Utc>,
    last_activity: Instant,
    state: SessionState,
    termination: Option<TerminationReason>,
}

impl Session {
    /// Create an active session with a fresh id
    pub fn new(
        protocol: Protocol,
        capabilities: CapabilitySet,
        idle_timeout: Option<Duration>,
        uniqueness_key: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            capabilities: capabilities.with_protocol(protocol),
            protocol,
            idle_timeout,
            uniqueness_key,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            state: SessionState::Active,
            termination: None,
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Governing protocol
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Resolved capabilities
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Idle timeout; `None` when disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Uniqueness key, if the session requested exclusive access
    pub fn uniqueness_key(&self) -> Option<&str> {
        self.uniqueness_key.as_deref()
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last routed command (or creation)
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if session is active
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Reason for termination, once terminated
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination
    }

    /// Whether the idle timeout has elapsed at `now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.is_active()
            && self
                .idle_timeout
                .is_some_and(|timeout| now.saturating_duration_since(self.last_activity) >= timeout)
    }

    /// Update last activity timestamp
    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Move to `Terminated`. Returns `false` if already terminated.
    pub(crate) fn terminate(&mut self, reason: TerminationReason) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }
        self.state = SessionState::Terminated;
        self.termination = Some(reason);
        true
    }
}
