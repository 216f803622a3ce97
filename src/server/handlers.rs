//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::Method,
    response::{IntoResponse, Response as HttpResponse},
    routing::{any, get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::state::AppState;
use crate::error::{AutodError, Result};
use crate::protocol::{Response, TerminationReason};

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body_size = state.config.max_body_size;
    let logging = state.config.logging;
    let cors = state.config.cors_enabled;

    let mut router = Router::new()
        // Health and status
        .route("/status", get(status))
        .route("/sessions", get(list_sessions))
        // Session lifecycle
        .route("/session", post(create_session))
        .route("/session/{id}", get(get_session).delete(delete_session))
        // Commands
        .route("/session/{id}/{*path}", any(session_command))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(state);

    if logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    if cors {
        router = router.layer(cors_layer());
    }
    router
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

impl IntoResponse for AutodError {
    fn into_response(self) -> HttpResponse {
        debug!(error = %self, code = self.w3c_code(), "request failed");
        (self.status_code(), Json(Response::error(&self))).into_response()
    }
}

/// Build information reported by `/status`
#[derive(Serialize)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
}

/// Status response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Accepting new sessions
    pub ready: bool,
    /// Human-readable status
    pub message: String,
    /// Build information
    pub build: BuildInfo,
    /// Seconds since start
    pub uptime_secs: u64,
    /// Active session count
    pub active_sessions: usize,
}

/// Status endpoint
async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Response>> {
    let active_sessions = state.sessions.count();
    let max = state.config.max_sessions;
    let ready = max == 0 || active_sessions < max;

    let status = StatusResponse {
        ready,
        message: if ready {
            "autod is ready to accept new sessions".to_string()
        } else {
            format!("autod is at its limit of {max} sessions")
        },
        build: BuildInfo {
            version: env!("CARGO_PKG_VERSION"),
        },
        uptime_secs: state.uptime().as_secs(),
        active_sessions,
    };
    Ok(Json(Response::value(serde_json::to_value(status)?)))
}

/// List active sessions
async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Response> {
    let sessions: Vec<Value> = state
        .sessions
        .list_sessions()
        .iter()
        .map(|session| {
            json!({
                "id": session.id(),
                "protocol": session.protocol().to_string(),
                "createdAt": session.created_at().to_rfc3339(),
                "capabilities": session.capabilities().to_json(),
            })
        })
        .collect();
    Json(Response::value(Value::Array(sessions)))
}

/// Create new session
async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Response>> {
    let body: Value = serde_json::from_slice(&body).map_err(|err| {
        AutodError::InvalidArgument(format!("new session body is not valid JSON: {err}"))
    })?;
    let session = state.sessions.new_session(&body).await?;
    Ok(Json(Response::session_created(&session)))
}

/// Get session capabilities
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Response>> {
    let session = state.sessions.get_session(&id)?;
    Ok(Json(Response::success(
        session.protocol(),
        &id,
        session.capabilities().to_json(),
    )))
}

/// Delete session
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Response>> {
    let protocol = state.sessions.get_session(&id)?.protocol();
    state
        .sessions
        .terminate_session(&id, TerminationReason::Deleted)
        .await?;
    Ok(Json(Response::success(protocol, &id, Value::Null)))
}

/// Route a command to a session
async fn session_command(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path((id, path)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Response>> {
    let outcome = state
        .commands
        .dispatch(&id, method.as_str(), &path, &body)
        .await?;
    Ok(Json(Response::success(outcome.protocol, &id, outcome.value)))
}
