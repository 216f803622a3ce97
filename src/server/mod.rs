//! Autod HTTP server.
//!
//! Provides the remote automation HTTP API:
//! - Session lifecycle (`POST /session`, `GET`/`DELETE /session/{id}`)
//! - Command routing (`/session/{id}/...`)
//! - Server status and session listing
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use autod::driver::FakeDriver;
//! use autod::server::{create_router, AppState, ServerConfig};
//!
//! let config = ServerConfig::default().with_port(4723);
//! let state = Arc::new(AppState::new(config, Arc::new(FakeDriver::new())));
//! state.sessions.spawn_watchdog(state.config.watchdog_interval);
//! let app = create_router(state);
//! ```

mod commands;
mod config;
mod handlers;
mod state;

pub use commands::{is_known_command, resolve, CommandOutcome, CommandRouter, COMMANDS, ROUTES};
pub use config::{ServerConfig, DEFAULT_PORT};
pub use handlers::{create_router, BuildInfo, StatusResponse};
pub use state::{AppState, SessionManager};
