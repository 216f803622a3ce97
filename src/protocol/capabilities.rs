//! Capability sets requested by clients.
//!
//! A [`CapabilitySet`] is a flat, ordered mapping from capability name to a
//! scalar [`CapValue`], tagged with the [`Protocol`] it arrived in. Vendor
//! aliases (`autod:app` and `app`) are resolved once, at ingestion, so the
//! matcher and the session manager only ever see canonical names.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::error::{AutodError, Result};

/// Vendor prefix treated as an alias of the unprefixed capability name.
pub const VENDOR_PREFIX: &str = "autod:";

/// Wire protocol governing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// JSON Wire Protocol (`desiredCapabilities`, top-level `status`).
    #[serde(rename = "JSONWP")]
    Legacy,
    /// W3C WebDriver (`alwaysMatch`/`firstMatch`, responses under `value`).
    #[serde(rename = "W3C")]
    W3C,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Legacy => write!(f, "JSONWP"),
            Protocol::W3C => write!(f, "W3C"),
        }
    }
}

/// Kind of a capability value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapKind {
    /// UTF-8 string
    String,
    /// `true` / `false`
    Boolean,
    /// Any JSON number
    Number,
}

impl fmt::Display for CapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapKind::String => write!(f, "string"),
            CapKind::Boolean => write!(f, "boolean"),
            CapKind::Number => write!(f, "number"),
        }
    }
}

/// A single capability value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapValue {
    /// Boolean value
    Bool(bool),
    /// Numeric value, kept as the client sent it
    Number(Number),
    /// String value
    String(String),
}

impl CapValue {
    /// Convert a JSON value. `null` maps to `None`; arrays and objects are
    /// rejected.
    pub fn from_json(name: &str, value: &Value) -> Result<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(CapValue::Bool(*b))),
            Value::Number(n) => Ok(Some(CapValue::Number(n.clone()))),
            Value::String(s) => Ok(Some(CapValue::String(s.clone()))),
            Value::Array(_) | Value::Object(_) => Err(AutodError::InvalidCapabilities(format!(
                "capability '{name}' must be a string, boolean or number"
            ))),
        }
    }

    /// Value kind
    pub fn kind(&self) -> CapKind {
        match self {
            CapValue::Bool(_) => CapKind::Boolean,
            CapValue::Number(_) => CapKind::Number,
            CapValue::String(_) => CapKind::String,
        }
    }

    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CapValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean contents, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CapValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric contents. Numeric strings are accepted since legacy clients
    /// frequently stringify numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CapValue::Number(n) => n.as_f64(),
            CapValue::String(s) => s.trim().parse().ok(),
            CapValue::Bool(_) => None,
        }
    }

    /// Whether the value satisfies a declared kind. Numeric strings count
    /// as numbers.
    pub fn matches_kind(&self, kind: CapKind) -> bool {
        match kind {
            CapKind::Number => self.as_f64().is_some(),
            _ => self.kind() == kind,
        }
    }

    /// Same value, comparing JSON numbers numerically (`60` equals `60.0`)
    pub fn same_as(&self, other: &CapValue) -> bool {
        match (self, other) {
            (CapValue::Number(a), CapValue::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => a == b,
            },
            _ => self == other,
        }
    }

    /// Empty or whitespace-only string
    pub fn is_blank(&self) -> bool {
        matches!(self, CapValue::String(s) if s.trim().is_empty())
    }

    /// Convert back to JSON
    pub fn to_json(&self) -> Value {
        match self {
            CapValue::Bool(b) => Value::Bool(*b),
            CapValue::Number(n) => Value::Number(n.clone()),
            CapValue::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for CapValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapValue::Bool(b) => write!(f, "{b}"),
            CapValue::Number(n) => write!(f, "{n}"),
            CapValue::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for CapValue {
    fn from(s: &str) -> Self {
        CapValue::String(s.to_string())
    }
}

impl From<String> for CapValue {
    fn from(s: String) -> Self {
        CapValue::String(s)
    }
}

impl From<bool> for CapValue {
    fn from(b: bool) -> Self {
        CapValue::Bool(b)
    }
}

impl From<i32> for CapValue {
    fn from(n: i32) -> Self {
        CapValue::Number(n.into())
    }
}

impl From<i64> for CapValue {
    fn from(n: i64) -> Self {
        CapValue::Number(n.into())
    }
}

impl From<f64> for CapValue {
    fn from(n: f64) -> Self {
        // JSON has no representation for NaN or infinities
        Number::from_f64(n).map_or_else(|| CapValue::String(n.to_string()), CapValue::Number)
    }
}

/// Strip the vendor prefix from a capability name.
pub fn canonical_name(key: &str) -> &str {
    key.strip_prefix(VENDOR_PREFIX).unwrap_or(key)
}

/// A resolved capability bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySet {
    protocol: Protocol,
    entries: BTreeMap<String, CapValue>,
}

impl CapabilitySet {
    /// Create an empty set
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            entries: BTreeMap::new(),
        }
    }

    /// Ingest a flat JSON object, resolving vendor aliases. When both
    /// `autod:x` and `x` are present, `x` wins.
    pub fn from_json(object: &Map<String, Value>, protocol: Protocol) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (key, value) in object {
            let name = canonical_name(key);
            if name != key && object.get(name).is_some_and(|v| !v.is_null()) {
                continue;
            }
            if name.is_empty() {
                return Err(AutodError::InvalidCapabilities(
                    "capability names can't be blank".to_string(),
                ));
            }
            if let Some(value) = CapValue::from_json(name, value)? {
                entries.insert(name.to_string(), value);
            }
        }

        Ok(Self { protocol, entries })
    }

    /// Ingest any JSON value, which must be an object.
    pub fn from_value(value: &Value, protocol: Protocol) -> Result<Self> {
        match value {
            Value::Object(object) => Self::from_json(object, protocol),
            Value::Null => Ok(Self::new(protocol)),
            other => Err(AutodError::InvalidArgument(format!(
                "capabilities must be a JSON object, got {other}"
            ))),
        }
    }

    /// Add a capability (builder style)
    pub fn with(mut self, key: &str, value: impl Into<CapValue>) -> Self {
        self.entries
            .insert(canonical_name(key).to_string(), value.into());
        self
    }

    /// Retag the set with another protocol
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merged_with(&self, other: &CapabilitySet) -> CapabilitySet {
        let mut entries = self.entries.clone();
        for (key, value) in &other.entries {
            entries.insert(key.clone(), value.clone());
        }
        Self {
            protocol: self.protocol,
            entries,
        }
    }

    /// Originating protocol
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Look up a capability by name (prefixed or not)
    pub fn get(&self, key: &str) -> Option<&CapValue> {
        self.entries.get(canonical_name(key))
    }

    /// String capability
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(CapValue::as_str)
    }

    /// Boolean capability
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(CapValue::as_bool)
    }

    /// Check presence
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(canonical_name(key))
    }

    /// Iterate in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CapValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of capabilities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no capability is set
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every entry of `self` appears with the same value in `other`.
    pub fn is_covered_by(&self, other: &CapabilitySet) -> bool {
        self.entries
            .iter()
            .all(|(key, value)| other.entries.get(key).is_some_and(|v| v.same_as(value)))
    }

    /// Render as a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_vendor_prefix_is_an_alias() {
        let caps = CapabilitySet::from_json(
            &object(json!({"autod:deviceName": "Fake", "platformName": "Fake"})),
            Protocol::W3C,
        )
        .unwrap();

        assert_eq!(caps.get_str("deviceName"), Some("Fake"));
        assert_eq!(caps.get_str("autod:deviceName"), Some("Fake"));
        assert_eq!(caps.len(), 2);
    }

    #[test]
    fn test_unprefixed_key_wins() {
        let caps = CapabilitySet::from_json(
            &object(json!({"autod:app": "/prefixed.apk", "app": "/plain.apk"})),
            Protocol::Legacy,
        )
        .unwrap();

        assert_eq!(caps.get_str("app"), Some("/plain.apk"));
        assert_eq!(caps.len(), 1);
    }

    #[test]
    fn test_foreign_vendor_keys_kept_verbatim() {
        let caps = CapabilitySet::from_json(
            &object(json!({"goog:loggingPrefs": "ALL"})),
            Protocol::W3C,
        )
        .unwrap();
        assert!(caps.contains("goog:loggingPrefs"));
    }

    #[test]
    fn test_null_values_are_absent() {
        let caps = CapabilitySet::from_json(
            &object(json!({"app": null, "platformName": "Fake"})),
            Protocol::W3C,
        )
        .unwrap();
        assert!(!caps.contains("app"));
    }

    #[test]
    fn test_nested_values_rejected() {
        let err = CapabilitySet::from_json(
            &object(json!({"chromeOptions": {"args": []}})),
            Protocol::W3C,
        )
        .unwrap_err();
        assert!(err.to_string().contains("chromeOptions"));
    }

    #[test]
    fn test_numbers_serialize_as_sent() {
        let caps = CapabilitySet::new(Protocol::W3C)
            .with("newCommandTimeout", 60)
            .with("ratio", 0.25);
        assert_eq!(
            serde_json::to_value(&caps).unwrap(),
            json!({"newCommandTimeout": 60, "ratio": 0.25})
        );
    }

    #[test]
    fn test_merge_overrides_for_that_merge_only() {
        let always = CapabilitySet::new(Protocol::W3C).with("platformName", "Fake");
        let first = CapabilitySet::new(Protocol::W3C).with("platformName", "Other");

        let merged = always.merged_with(&first);
        assert_eq!(merged.get_str("platformName"), Some("Other"));
        assert_eq!(always.get_str("platformName"), Some("Fake"));
    }

    #[test]
    fn test_coverage_ignores_protocol_and_alias() {
        let legacy = CapabilitySet::new(Protocol::Legacy).with("autod:app", "/a.apk");
        let w3c = CapabilitySet::new(Protocol::W3C)
            .with("app", "/a.apk")
            .with("platformName", "Fake");
        assert!(legacy.is_covered_by(&w3c));
        assert!(!w3c.is_covered_by(&legacy));
        assert_ne!(legacy, w3c);
    }

    #[test]
    fn test_coverage_compares_numbers_numerically() {
        let legacy = CapabilitySet::from_value(&json!({"newCommandTimeout": 60}), Protocol::Legacy)
            .unwrap();
        let w3c = CapabilitySet::from_value(&json!({"newCommandTimeout": 60.0}), Protocol::W3C)
            .unwrap();
        assert!(legacy.is_covered_by(&w3c));

        let other = CapabilitySet::from_value(&json!({"newCommandTimeout": 61}), Protocol::W3C)
            .unwrap();
        assert!(!legacy.is_covered_by(&other));
        assert!(!CapValue::from("60").same_as(&CapValue::from(60)));
    }

    #[test]
    fn test_prefixed_key_used_when_plain_key_is_null() {
        let caps = CapabilitySet::from_json(
            &object(json!({"autod:app": "/a.apk", "app": null})),
            Protocol::W3C,
        )
        .unwrap();
        assert_eq!(caps.get_str("app"), Some("/a.apk"));
        assert_eq!(caps.len(), 1);
    }

    #[test]
    fn test_numeric_strings_parse() {
        assert_eq!(CapValue::from("0.25").as_f64(), Some(0.25));
        assert_eq!(CapValue::from(true).as_f64(), None);
        assert!(CapValue::from("2").matches_kind(CapKind::Number));
        assert!(!CapValue::from("soon").matches_kind(CapKind::Number));
        assert!(!CapValue::from(2).matches_kind(CapKind::String));
    }

    proptest! {
        #[test]
        fn prop_ingestion_is_idempotent(
            entries in prop::collection::btree_map("(autod:)?[a-zA-Z]{1,8}", "[a-z0-9]{0,6}", 0..8)
        ) {
            let raw: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            let once = CapabilitySet::from_json(&raw, Protocol::W3C).unwrap();
            let again = CapabilitySet::from_value(&once.to_json(), Protocol::W3C).unwrap();

            prop_assert_eq!(&once, &again);
            prop_assert!(once.iter().all(|(k, _)| !k.starts_with(VENDOR_PREFIX)));
        }
    }
}
