//! Capability negotiation and session records.
//!
//! Implements the dual-protocol new-session handshake: a client may speak the
//! legacy JSON Wire Protocol, W3C WebDriver, or send both payloads at once.
//!
//! # Negotiation Flow
//!
//! ```text
//! POST /session body
//!        |
//!        v
//!  NewSessionRequest::from_body
//!        |
//!        +--> W3C `capabilities`?  -- for each firstMatch entry -->
//!        |        merge over alwaysMatch --> match_capabilities(constraints)
//!        |                                    first entry that passes wins
//!        |
//!        +--> Legacy `desiredCapabilities`?
//!        |
//!        v
//!  Negotiated { protocol, capabilities }  -->  SessionManager::create_session
//! ```
//!
//! ## Session States
//!
//! | State        | Description                   | Valid Transitions |
//! |--------------|-------------------------------|-------------------|
//! | `Active`     | Accepting commands            | → Terminated      |
//! | `Terminated` | Deleted, timed out, or failed | (terminal)        |
//!
//! ## Validation Rules
//!
//! | Order | Rule                                   | Message                      |
//! |-------|----------------------------------------|------------------------------|
//! | 1     | required capability present            | `'x' can't be blank`         |
//! | 2     | value within the allowed set           | `x: v not part of [a, b]`    |
//! | 3     | value of the declared kind             | `'x' must be of type string` |
//! | 4     | key declared or allow-listed           | `'x' is not a recognized ...`|
//!
//! # Usage
//!
//! ```rust,ignore
//! use autod::protocol::{negotiate, ConstraintSet};
//!
//! let constraints = ConstraintSet::new().require("platformName");
//! let negotiated = negotiate(&body, &constraints)?;
//! println!("{} {:?}", negotiated.protocol, negotiated.capabilities);
//! ```

mod capabilities;
mod constraints;
mod matcher;
mod message;
mod negotiation;
mod session;

pub use capabilities::{canonical_name, CapKind, CapValue, CapabilitySet, Protocol, VENDOR_PREFIX};
pub use constraints::{Constraint, ConstraintSet, UniquenessRule, STANDARD_CAPABILITIES};
pub use matcher::{match_capabilities, merge_entry};
pub use message::{ErrorValue, LegacyResponse, Response, W3cResponse, W3cSessionCreated};
pub use negotiation::{negotiate, Negotiated, NewSessionRequest};
pub use session::{resolve_idle_timeout, Session, SessionState, TerminationReason};

/// Capability carrying the per-session idle timeout, in seconds
pub const NEW_COMMAND_TIMEOUT_CAPABILITY: &str = "newCommandTimeout";

/// Default idle timeout (60 seconds)
pub const DEFAULT_NEW_COMMAND_TIMEOUT_SECS: u64 = 60;
