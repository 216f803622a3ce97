//! In-process fake automation engine.
//!
//! Keeps a little page state per context so commands have observable
//! effects. Used by `autod serve` and throughout the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use super::{Driver, DriverContext, DriverError, DriverResult};
use crate::protocol::{CapKind, CapabilitySet, ConstraintSet, Protocol};

/// W3C web element identifier key
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Script that makes the fake device drop its context
pub const CRASH_SCRIPT: &str = "autod: crash";

/// Commands the fake engine implements
pub const FAKE_COMMANDS: &[&str] = &[
    "getUrl",
    "setUrl",
    "getTitle",
    "getPageSource",
    "getWindowHandle",
    "back",
    "refresh",
    "findElement",
    "click",
    "getText",
    "execute",
    "getOrientation",
    "setOrientation",
    "implicitWait",
    "timeouts",
];

#[derive(Debug)]
struct FakeContext {
    app: Option<String>,
    history: Vec<String>,
    orientation: &'static str,
    elements: HashMap<String, String>,
    next_element: u64,
    implicit_wait_ms: u64,
}

impl FakeContext {
    fn new(capabilities: &CapabilitySet) -> Self {
        Self {
            app: capabilities.get_str("app").map(ToString::to_string),
            history: Vec::new(),
            orientation: "PORTRAIT",
            elements: HashMap::new(),
            next_element: 1,
            implicit_wait_ms: 0,
        }
    }

    fn url(&self) -> Value {
        self.history.last().map_or(Value::Null, |url| json!(url))
    }
}

fn string_arg<'a>(args: &'a Value, name: &str) -> DriverResult<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| DriverError::invalid_argument(format!("missing string argument '{name}'")))
}

/// Fake driver
pub struct FakeDriver {
    contexts: RwLock<HashMap<String, FakeContext>>,
    create_delay: Option<Duration>,
    command_delay: Option<Duration>,
    fail_creates: bool,
    created: AtomicUsize,
    released: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    /// Create a fake driver
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            create_delay: None,
            command_delay: None,
            fail_creates: false,
            created: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay context allocation
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Delay every command before it touches the context
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = Some(delay);
        self
    }

    /// Refuse every context allocation
    pub fn failing_creates(mut self) -> Self {
        self.fail_creates = true;
        self
    }

    /// Contexts allocated so far
    pub fn contexts_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Contexts released so far
    pub fn contexts_released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Most commands ever executing at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Contexts currently alive
    pub async fn live_contexts(&self) -> usize {
        self.contexts.read().await.len()
    }

    async fn execute_now(
        &self,
        context: &DriverContext,
        command: &str,
        args: &Value,
    ) -> DriverResult<Value> {
        let mut contexts = self.contexts.write().await;
        let ctx = contexts
            .get_mut(&context.handle)
            .ok_or_else(|| DriverError::fatal(format!("context {} is gone", context.handle)))?;

        let result = Self::run(ctx, command, args);
        if result.as_ref().is_err_and(|err| err.fatal) {
            contexts.remove(&context.handle);
        }
        result
    }

    fn run(ctx: &mut FakeContext, command: &str, args: &Value) -> DriverResult<Value> {
        match command {
            "getUrl" => Ok(ctx.url()),
            "setUrl" => {
                let url = string_arg(args, "url")?;
                ctx.history.push(url.to_string());
                Ok(Value::Null)
            },
            "back" => {
                ctx.history.pop();
                Ok(Value::Null)
            },
            "refresh" => Ok(Value::Null),
            "getTitle" => Ok(json!(ctx
                .history
                .last()
                .map_or_else(|| "Fake".to_string(), |url| format!("Fake - {url}")))),
            "getPageSource" => Ok(json!(format!(
                "<app name=\"{}\"><window/></app>",
                ctx.app.as_deref().unwrap_or("fake")
            ))),
            "getWindowHandle" => Ok(json!("window-1")),
            "findElement" => {
                let using = string_arg(args, "using")?;
                let value = string_arg(args, "value")?;
                if value == "missing" {
                    return Err(DriverError::new(
                        "no such element",
                        format!("no element matches {using}={value}"),
                    ));
                }
                let id = format!("element-{}", ctx.next_element);
                ctx.next_element += 1;
                ctx.elements.insert(id.clone(), format!("{using}={value}"));
                Ok(json!({ ELEMENT_KEY: id, "ELEMENT": id }))
            },
            "click" | "getText" => {
                let id = string_arg(args, "elementId")?;
                let selector = ctx.elements.get(id).ok_or_else(|| {
                    DriverError::new("no such element", format!("element {id} is unknown"))
                })?;
                if command == "click" {
                    Ok(Value::Null)
                } else {
                    Ok(json!(selector))
                }
            },
            "execute" => {
                let script = string_arg(args, "script")?;
                if script == CRASH_SCRIPT {
                    return Err(DriverError::fatal("fake device disconnected")
                        .with_stacktrace("    at FakeDriver.execute_command (execute)"));
                }
                Ok(args.get("args").cloned().unwrap_or(Value::Null))
            },
            "getOrientation" => Ok(json!(ctx.orientation)),
            "setOrientation" => {
                ctx.orientation = match string_arg(args, "orientation")? {
                    "PORTRAIT" => "PORTRAIT",
                    "LANDSCAPE" => "LANDSCAPE",
                    other => {
                        return Err(DriverError::invalid_argument(format!(
                            "orientation '{other}' is not supported"
                        )))
                    },
                };
                Ok(Value::Null)
            },
            "implicitWait" => {
                ctx.implicit_wait_ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
                Ok(Value::Null)
            },
            "timeouts" => {
                if let Some(ms) = args.get("implicit").and_then(Value::as_u64) {
                    ctx.implicit_wait_ms = ms;
                }
                Ok(Value::Null)
            },
            other => Err(DriverError::new(
                "unknown method",
                format!("fake driver cannot run '{other}'"),
            )),
        }
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn name(&self) -> &str {
        "FakeDriver"
    }

    fn declare_constraints(&self) -> ConstraintSet {
        ConstraintSet::new()
            .require("platformName")
            .allow_values("platformName", &["Fake"])
            .require("deviceName")
            .with_kind("deviceName", CapKind::String)
            .with_kind("app", CapKind::String)
            .allow_values("automationName", &["Fake"])
            .with_kind("uniqueApp", CapKind::Boolean)
            .with_kind("newCommandTimeout", CapKind::Number)
            .allow_unknown(Protocol::Legacy)
            .unique_by("uniqueApp", "app")
    }

    fn implements(&self, command: &str) -> bool {
        FAKE_COMMANDS.contains(&command)
    }

    async fn create_context(&self, capabilities: &CapabilitySet) -> DriverResult<DriverContext> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_creates {
            return Err(DriverError::new(
                "session not created",
                "fake device is unavailable",
            ));
        }

        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let context = DriverContext::new(format!("fake-{n}"));
        self.contexts
            .write()
            .await
            .insert(context.handle.clone(), FakeContext::new(capabilities));
        debug!(handle = %context.handle, "fake context allocated");
        Ok(context)
    }

    async fn execute(
        &self,
        context: &DriverContext,
        command: &str,
        args: Value,
    ) -> DriverResult<Value> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.command_delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.execute_now(context, command, &args).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn release_context(&self, context: DriverContext) -> DriverResult<()> {
        self.contexts.write().await.remove(&context.handle);
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> CapabilitySet {
        CapabilitySet::new(Protocol::W3C)
            .with("platformName", "Fake")
            .with("deviceName", "Fake")
            .with("app", "/tmp/fake.app")
    }

    #[tokio::test]
    async fn test_context_lifecycle() {
        let driver = FakeDriver::new();
        let ctx = driver.create_context(&caps()).await.unwrap();
        assert_eq!(driver.live_contexts().await, 1);

        driver.release_context(ctx).await.unwrap();
        assert_eq!(driver.live_contexts().await, 0);
        assert_eq!(driver.contexts_created(), 1);
        assert_eq!(driver.contexts_released(), 1);
    }

    #[tokio::test]
    async fn test_navigation_state() {
        let driver = FakeDriver::new();
        let ctx = driver.create_context(&caps()).await.unwrap();

        assert_eq!(driver.execute(&ctx, "getUrl", json!({})).await.unwrap(), Value::Null);
        driver
            .execute(&ctx, "setUrl", json!({"url": "https://example.com"}))
            .await
            .unwrap();
        assert_eq!(
            driver.execute(&ctx, "getUrl", json!({})).await.unwrap(),
            json!("https://example.com")
        );
        assert_eq!(
            driver.execute(&ctx, "getPageSource", json!({})).await.unwrap(),
            json!("<app name=\"/tmp/fake.app\"><window/></app>")
        );
    }

    #[tokio::test]
    async fn test_elements() {
        let driver = FakeDriver::new();
        let ctx = driver.create_context(&caps()).await.unwrap();

        let found = driver
            .execute(&ctx, "findElement", json!({"using": "id", "value": "login"}))
            .await
            .unwrap();
        let id = found[ELEMENT_KEY].as_str().unwrap().to_string();

        let text = driver
            .execute(&ctx, "getText", json!({"elementId": id}))
            .await
            .unwrap();
        assert_eq!(text, json!("id=login"));

        let err = driver
            .execute(&ctx, "click", json!({"elementId": "element-99"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, "no such element");
        assert!(!err.fatal);
    }

    #[tokio::test]
    async fn test_crash_drops_context() {
        let driver = FakeDriver::new();
        let ctx = driver.create_context(&caps()).await.unwrap();

        let err = driver
            .execute(&ctx, "execute", json!({"script": CRASH_SCRIPT, "args": []}))
            .await
            .unwrap_err();
        assert!(err.fatal);
        assert_eq!(driver.live_contexts().await, 0);
    }

    #[tokio::test]
    async fn test_failing_creates() {
        let driver = FakeDriver::new().failing_creates();
        let err = driver.create_context(&caps()).await.unwrap_err();
        assert_eq!(err.code, "session not created");
        assert_eq!(driver.contexts_created(), 0);
    }

    #[test]
    fn test_vocabulary() {
        let driver = FakeDriver::new();
        assert!(driver.implements("getUrl"));
        assert!(!driver.implements("getScreenshot"));
    }
}
