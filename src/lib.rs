//! # Autod - Remote Automation Session Core
//!
//! Session negotiation and lifecycle management for remote automation
//! servers that speak both the legacy JSON Wire Protocol (JSONWP) and the W3C
//! WebDriver protocol.
//!
//! ## Features
//!
//! - **Dual-protocol negotiation**: `desiredCapabilities`, W3C
//!   `alwaysMatch`/`firstMatch`, or both in one request
//! - **Capability validation**: driver-declared required keys, allowed
//!   values, value kinds, and unknown-key policy
//! - **Uniqueness**: at most one active session per exclusive resource
//! - **Idle timeouts**: per-session `newCommandTimeout` enforced by a watchdog
//! - **Command routing**: protocol-aware vocabulary with W3C error responses
//!
//! ## Architecture
//!
//! ```text
//! Client                    Autod                           Driver
//!    |                        |                                |
//!    |-- POST /session ------>| negotiate -> match            |
//!    |                        |-- create_context ------------->|
//!    |<----- sessionId -------|                                |
//!    |                        |                                |
//!    |-- POST .../url ------->| route -> run_command           |
//!    |                        |-- execute -------------------->|
//!    |<------ value ----------|                                |
//!    |                        |                                |
//!    |-- DELETE /session/x -->| terminate                      |
//!    |                        |-- release_context ------------>|
//! ```
//!
//! ### Session Lifecycle
//!
//! ```text
//!   negotiate + create_context
//!  ─────────────────────────────> [Active]
//!                                    │
//!            DELETE / idle timeout / │ fatal driver error / shutdown
//!                                    v
//!                               [Terminated]
//! ```
//!
//! ### Error Codes
//!
//! | Error               | W3C code              | HTTP |
//! |---------------------|-----------------------|------|
//! | invalid capability  | `invalid argument`    | 400  |
//! | uniqueness conflict | `session not created` | 500  |
//! | unknown session     | `invalid session id`  | 404  |
//! | unimplemented       | `unknown method`      | 404  |
//! | unmapped route      | `unknown command`     | 404  |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use autod::{driver::FakeDriver, server::SessionManager};
//! use serde_json::json;
//!
//! let sessions = SessionManager::new(Arc::new(FakeDriver::new()));
//! let session = sessions
//!     .new_session(&json!({
//!         "capabilities": {
//!             "alwaysMatch": {"platformName": "Fake"},
//!             "firstMatch": [{"deviceName": "Fake"}]
//!         }
//!     }))
//!     .await?;
//!
//! sessions.run_command(session.id(), "getUrl", json!({})).await?;
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Capability negotiation, validation, and session records
//! - [`driver`]: Driver collaborator trait and the in-process fake driver
//! - [`server`]: Session manager, command router, and HTTP API (Axum-based)
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use config::Config;
pub use driver::{Driver, DriverContext, DriverError, FakeDriver};
pub use error::{AutodError, Result};
pub use protocol::{
    negotiate, CapValue, CapabilitySet, ConstraintSet, Negotiated, Protocol, Session,
    SessionState, TerminationReason,
};
pub use server::{AppState, CommandRouter, ServerConfig, SessionManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
