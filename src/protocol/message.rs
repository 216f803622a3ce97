//! Outbound wire shapes.
//!
//! | Shape          | JSON                                           |
//! |----------------|------------------------------------------------|
//! | Legacy success | `{status: 0, sessionId, value}`                |
//! | W3C success    | `{value}`                                      |
//! | W3C new session| `{value: {sessionId, capabilities}}`           |
//! | Error          | `{value: {error, message, stacktrace}}`        |

use serde::Serialize;
use serde_json::Value;

use super::capabilities::{CapabilitySet, Protocol};
use super::session::Session;
use crate::error::AutodError;

/// JSONWP success status
pub const LEGACY_STATUS_SUCCESS: u32 = 0;

/// Legacy (JSONWP) response envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyResponse {
    /// JSONWP status code
    pub status: u32,
    /// Session id, `null` outside a session
    pub session_id: Option<String>,
    /// Payload
    pub value: Value,
}

/// W3C response envelope
#[derive(Debug, Clone, Serialize)]
pub struct W3cResponse<T> {
    /// Payload
    pub value: T,
}

/// W3C new-session payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct W3cSessionCreated {
    /// New session id
    pub session_id: String,
    /// Resolved capabilities
    pub capabilities: CapabilitySet,
}

/// Error payload
#[derive(Debug, Clone, Serialize)]
pub struct ErrorValue {
    /// W3C error code
    pub error: String,
    /// Human-readable message
    pub message: String,
    /// Origin trace
    pub stacktrace: String,
}

/// Any outbound body
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// JSONWP envelope
    Legacy(LegacyResponse),
    /// W3C new-session envelope
    SessionCreated(W3cResponse<W3cSessionCreated>),
    /// W3C envelope
    W3C(W3cResponse<Value>),
    /// Error envelope
    Error(W3cResponse<ErrorValue>),
}

impl Response {
    /// New-session response in the session's protocol
    pub fn session_created(session: &Session) -> Self {
        match session.protocol() {
            Protocol::Legacy => Response::Legacy(LegacyResponse {
                status: LEGACY_STATUS_SUCCESS,
                session_id: Some(session.id().to_string()),
                value: session.capabilities().to_json(),
            }),
            Protocol::W3C => Response::SessionCreated(W3cResponse {
                value: W3cSessionCreated {
                    session_id: session.id().to_string(),
                    capabilities: session.capabilities().clone(),
                },
            }),
        }
    }

    /// Command success in the given protocol
    pub fn success(protocol: Protocol, session_id: &str, value: Value) -> Self {
        match protocol {
            Protocol::Legacy => Response::Legacy(LegacyResponse {
                status: LEGACY_STATUS_SUCCESS,
                session_id: Some(session_id.to_string()),
                value,
            }),
            Protocol::W3C => Response::W3C(W3cResponse { value }),
        }
    }

    /// Success outside any session
    pub fn value(value: Value) -> Self {
        Response::W3C(W3cResponse { value })
    }

    /// Error response
    pub fn error(err: &AutodError) -> Self {
        Response::Error(W3cResponse {
            value: ErrorValue {
                error: err.w3c_code().to_string(),
                message: err.to_string(),
                stacktrace: err.stacktrace(),
            },
        })
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(protocol: Protocol) -> Session {
        let caps = CapabilitySet::new(protocol)
            .with("platformName", "Fake")
            .with("deviceName", "Fake");
        Session::new(protocol, caps, None, None)
    }

    #[test]
    fn test_w3c_session_created_shape() {
        let session = session(Protocol::W3C);
        let body = Response::session_created(&session).to_json();

        assert!(body.get("status").is_none());
        assert!(body.get("sessionId").is_none());
        assert_eq!(body["value"]["sessionId"], json!(session.id()));
        assert_eq!(
            body["value"]["capabilities"],
            json!({"platformName": "Fake", "deviceName": "Fake"})
        );
    }

    #[test]
    fn test_legacy_session_created_shape() {
        let session = session(Protocol::Legacy);
        let body = Response::session_created(&session).to_json();

        assert_eq!(body["status"], json!(0));
        assert_eq!(body["sessionId"], json!(session.id()));
        assert_eq!(body["value"], json!({"platformName": "Fake", "deviceName": "Fake"}));
    }

    #[test]
    fn test_success_shapes() {
        let w3c = Response::success(Protocol::W3C, "abc", json!("x")).to_json();
        assert_eq!(w3c, json!({"value": "x"}));

        let legacy = Response::success(Protocol::Legacy, "abc", Value::Null).to_json();
        assert_eq!(legacy, json!({"status": 0, "sessionId": "abc", "value": null}));
    }

    #[test]
    fn test_error_shape() {
        let err = AutodError::InvalidCapabilities("'platformName' can't be blank".into());
        let body = Response::error(&err).to_json();
        assert_eq!(body["value"]["error"], json!("invalid argument"));
        assert_eq!(body["value"]["message"], json!("'platformName' can't be blank"));
        assert_eq!(body["value"]["stacktrace"], json!(""));
    }
}
