//! Command vocabulary and routing.
//!
//! | Stage    | Input                         | Failure           |
//! |----------|-------------------------------|-------------------|
//! | resolve  | `(method, path)` under session| `unknown command` |
//! | lookup   | session id                    | `invalid session id` |
//! | catalog  | command name + protocol       | `unknown method`  |
//! | driver   | command + args                | driver error      |

use std::sync::Arc;

use phf::phf_map;
use serde_json::{Map, Value};
use tracing::debug;

use super::state::SessionManager;
use crate::error::{AutodError, Result};
use crate::protocol::Protocol;

const BOTH: &[Protocol] = &[Protocol::Legacy, Protocol::W3C];
const LEGACY_ONLY: &[Protocol] = &[Protocol::Legacy];
const W3C_ONLY: &[Protocol] = &[Protocol::W3C];

/// Command name -> protocols it exists in
pub static COMMANDS: phf::Map<&'static str, &'static [Protocol]> = phf_map! {
    // Navigation
    "getUrl" => BOTH,
    "setUrl" => BOTH,
    "back" => BOTH,
    "forward" => BOTH,
    "refresh" => BOTH,
    "getTitle" => BOTH,
    "getPageSource" => BOTH,
    // Windows
    "getWindowHandle" => BOTH,
    "getWindowRect" => W3C_ONLY,
    "getWindowSize" => LEGACY_ONLY,
    // Elements
    "findElement" => BOTH,
    "findElements" => BOTH,
    "click" => BOTH,
    "getText" => BOTH,
    "getElementRect" => W3C_ONLY,
    // Scripts
    "execute" => BOTH,
    "executeAsync" => BOTH,
    // Device
    "getScreenshot" => BOTH,
    "getOrientation" => BOTH,
    "setOrientation" => BOTH,
    // Timeouts
    "implicitWait" => LEGACY_ONLY,
    "timeouts" => BOTH,
    "getTimeouts" => W3C_ONLY,
    // Cookies
    "getCookies" => BOTH,
    "setCookie" => BOTH,
    "deleteCookies" => BOTH,
    // Logs
    "getLogTypes" => LEGACY_ONLY,
    "getLog" => LEGACY_ONLY,
};

/// `(method, path below /session/{id}, command)`
pub static ROUTES: &[(&str, &str, &str)] = &[
    ("GET", "url", "getUrl"),
    ("POST", "url", "setUrl"),
    ("POST", "back", "back"),
    ("POST", "forward", "forward"),
    ("POST", "refresh", "refresh"),
    ("GET", "title", "getTitle"),
    ("GET", "source", "getPageSource"),
    ("GET", "window_handle", "getWindowHandle"),
    ("GET", "window", "getWindowHandle"),
    ("GET", "window/rect", "getWindowRect"),
    ("GET", "window/{windowHandle}/size", "getWindowSize"),
    ("POST", "element", "findElement"),
    ("POST", "elements", "findElements"),
    ("POST", "element/{elementId}/click", "click"),
    ("GET", "element/{elementId}/text", "getText"),
    ("GET", "element/{elementId}/rect", "getElementRect"),
    ("POST", "execute", "execute"),
    ("POST", "execute/sync", "execute"),
    ("POST", "execute_async", "executeAsync"),
    ("POST", "execute/async", "executeAsync"),
    ("GET", "screenshot", "getScreenshot"),
    ("GET", "orientation", "getOrientation"),
    ("POST", "orientation", "setOrientation"),
    ("POST", "timeouts/implicit_wait", "implicitWait"),
    ("POST", "timeouts", "timeouts"),
    ("GET", "timeouts", "getTimeouts"),
    ("GET", "cookie", "getCookies"),
    ("POST", "cookie", "setCookie"),
    ("DELETE", "cookie", "deleteCookies"),
    ("GET", "log/types", "getLogTypes"),
    ("POST", "log", "getLog"),
];

/// Check if a command exists for a protocol
pub fn is_known_command(command: &str, protocol: Protocol) -> bool {
    COMMANDS
        .get(command)
        .is_some_and(|protocols| protocols.contains(&protocol))
}

/// Resolve `(method, path)` to a command name and its path parameters
pub fn resolve(method: &str, path: &str) -> Result<(&'static str, Map<String, Value>)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    for &(route_method, pattern, command) in ROUTES {
        if !route_method.eq_ignore_ascii_case(method) {
            continue;
        }
        if let Some(params) = match_pattern(pattern, &segments) {
            return Ok((command, params));
        }
    }

    Err(AutodError::UnknownCommand {
        method: method.to_string(),
        path: path.to_string(),
    })
}

fn match_pattern(pattern: &str, segments: &[&str]) -> Option<Map<String, Value>> {
    let parts: Vec<&str> = pattern.split('/').collect();
    if parts.len() != segments.len() {
        return None;
    }

    let mut params = Map::new();
    for (part, segment) in parts.iter().zip(segments) {
        match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            Some(name) => {
                params.insert(name.to_string(), Value::String((*segment).to_string()));
            },
            None if part == segment => {},
            None => return None,
        }
    }
    Some(params)
}

/// Parse a command body into an args object; empty bodies are `{}`
fn parse_args(body: &[u8]) -> Result<Map<String, Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(args)) => Ok(args),
        Ok(other) => Err(AutodError::InvalidArgument(format!(
            "command body must be a JSON object, got {other}"
        ))),
        Err(err) => Err(AutodError::InvalidArgument(format!(
            "command body is not valid JSON: {err}"
        ))),
    }
}

/// Result of a routed command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Protocol of the session that ran it
    pub protocol: Protocol,
    /// Driver result
    pub value: Value,
}

/// Routes commands to sessions
pub struct CommandRouter {
    sessions: Arc<SessionManager>,
}

impl CommandRouter {
    /// Create a router over a session manager
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Route a named command to a session.
    ///
    /// Unknown sessions and unimplemented commands fail before the driver
    /// is reached and leave the idle timer untouched.
    pub async fn route(&self, session_id: &str, command: &str, args: Value) -> Result<CommandOutcome> {
        let session = self.sessions.get_session(session_id)?;
        let protocol = session.protocol();
        let driver = self.sessions.driver();

        if !is_known_command(command, protocol) || !driver.implements(command) {
            debug!(session_id, command, %protocol, "command not implemented");
            return Err(AutodError::UnknownMethod {
                command: command.to_string(),
                origin: format!("{}.execute_command ({command})", driver.name()),
            });
        }

        let value = self.sessions.run_command(session_id, command, args).await?;
        Ok(CommandOutcome { protocol, value })
    }

    /// Resolve an HTTP request below `/session/{id}` and route it
    pub async fn dispatch(
        &self,
        session_id: &str,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<CommandOutcome> {
        self.sessions.get_session(session_id)?;
        let (command, params) = resolve(method, path)?;

        let mut args = parse_args(body)?;
        args.extend(params);
        self.route(session_id, command, Value::Object(args)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, FakeDriver, ELEMENT_KEY};
    use crate::protocol::{CapabilitySet, Negotiated};
    use serde_json::json;

    async fn setup(protocol: Protocol) -> (CommandRouter, String) {
        let driver: Arc<dyn Driver> = Arc::new(FakeDriver::new());
        let sessions = Arc::new(SessionManager::new(driver));
        let caps = CapabilitySet::new(protocol)
            .with("platformName", "Fake")
            .with("deviceName", "Fake");
        let session = sessions
            .create_session(Negotiated {
                protocol,
                capabilities: caps,
                first_match_index: None,
            })
            .await
            .unwrap();
        (CommandRouter::new(sessions), session.id().to_string())
    }

    #[test]
    fn test_every_route_is_catalogued() {
        for (_, _, command) in ROUTES {
            assert!(COMMANDS.contains_key(*command), "{command} missing from catalog");
        }
    }

    #[test]
    fn test_resolve_with_params() {
        let (command, params) = resolve("POST", "/element/element-7/click").unwrap();
        assert_eq!(command, "click");
        assert_eq!(params["elementId"], json!("element-7"));

        let (command, params) = resolve("get", "url").unwrap();
        assert_eq!(command, "getUrl");
        assert!(params.is_empty());
    }

    #[test]
    fn test_resolve_unknown() {
        let err = resolve("GET", "/no/such/thing").unwrap_err();
        assert!(matches!(err, AutodError::UnknownCommand { .. }));
        assert_eq!(err.w3c_code(), "unknown command");

        // Right path, wrong method.
        assert!(resolve("DELETE", "url").is_err());
    }

    #[test]
    fn test_protocol_specific_commands() {
        assert!(is_known_command("implicitWait", Protocol::Legacy));
        assert!(!is_known_command("implicitWait", Protocol::W3C));
        assert!(is_known_command("getTimeouts", Protocol::W3C));
        assert!(!is_known_command("getTimeouts", Protocol::Legacy));
        assert!(!is_known_command("selfDestruct", Protocol::W3C));
    }

    #[test]
    fn test_parse_args() {
        assert!(parse_args(b"").unwrap().is_empty());
        assert_eq!(parse_args(br#"{"url":"x"}"#).unwrap()["url"], json!("x"));
        assert!(matches!(parse_args(b"[1]"), Err(AutodError::InvalidArgument(_))));
        assert!(matches!(parse_args(b"{oops"), Err(AutodError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_dispatch_round_trip() {
        let (router, id) = setup(Protocol::W3C).await;

        router
            .dispatch(&id, "POST", "url", br#"{"url":"https://example.com"}"#)
            .await
            .unwrap();
        let outcome = router.dispatch(&id, "GET", "url", b"").await.unwrap();
        assert_eq!(outcome.protocol, Protocol::W3C);
        assert_eq!(outcome.value, json!("https://example.com"));

        let found = router
            .dispatch(&id, "POST", "element", br#"{"using":"id","value":"ok"}"#)
            .await
            .unwrap();
        let element = found.value[ELEMENT_KEY].as_str().unwrap().to_string();
        let text = router
            .dispatch(&id, "GET", &format!("element/{element}/text"), b"")
            .await
            .unwrap();
        assert_eq!(text.value, json!("id=ok"));
    }

    #[tokio::test]
    async fn test_unimplemented_command_is_unknown_method() {
        let (router, id) = setup(Protocol::W3C).await;
        let before = router.sessions.get_session(&id).unwrap().last_activity();

        let err = router.dispatch(&id, "GET", "screenshot", b"").await.unwrap_err();
        match &err {
            AutodError::UnknownMethod { command, origin } => {
                assert_eq!(command, "getScreenshot");
                assert_eq!(origin, "FakeDriver.execute_command (getScreenshot)");
            },
            other => panic!("unexpected error: {other}"),
        }

        let after = router.sessions.get_session(&id).unwrap().last_activity();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_command_outside_protocol_vocabulary() {
        let (router, id) = setup(Protocol::W3C).await;
        let err = router
            .dispatch(&id, "POST", "timeouts/implicit_wait", br#"{"ms":100}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, AutodError::UnknownMethod { .. }));

        let (router, id) = setup(Protocol::Legacy).await;
        router
            .dispatch(&id, "POST", "timeouts/implicit_wait", br#"{"ms":100}"#)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (router, _) = setup(Protocol::W3C).await;
        let err = router.route("missing", "getUrl", json!({})).await.unwrap_err();
        assert!(matches!(err, AutodError::NoSuchSession(_)));
    }
}
