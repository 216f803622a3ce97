//! Driver-declared capability constraints.
//!
//! A driver declares its [`ConstraintSet`] once; the matcher validates every
//! merged W3C entry against it and the session manager derives uniqueness
//! keys from its [`UniquenessRule`].

use std::collections::{BTreeMap, BTreeSet};

use super::capabilities::{canonical_name, CapKind, CapabilitySet, Protocol};

/// Standard W3C capability names, always recognized.
pub const STANDARD_CAPABILITIES: &[&str] = &[
    "acceptInsecureCerts",
    "browserName",
    "browserVersion",
    "pageLoadStrategy",
    "platformName",
    "proxy",
    "setWindowRect",
    "strictFileInteractability",
    "timeouts",
    "unhandledPromptBehavior",
];

/// Constraint on a single capability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraint {
    /// Must be present and non-blank
    pub presence: bool,
    /// Permitted values, compared against the value's string form
    pub allowed: Option<Vec<String>>,
    /// Required value kind
    pub kind: Option<CapKind>,
}

/// Capability pair that makes sessions mutually exclusive.
///
/// When `flag` is `true` in a session's capabilities, the value of `key`
/// becomes that session's uniqueness key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniquenessRule {
    /// Boolean capability requesting exclusive access
    pub flag: String,
    /// Capability whose value identifies the exclusive resource
    pub key: String,
}

impl UniquenessRule {
    /// Derive the uniqueness key for a capability set, if it asks for one.
    pub fn key_for(&self, capabilities: &CapabilitySet) -> Option<String> {
        if capabilities.get_bool(&self.flag) != Some(true) {
            return None;
        }
        capabilities
            .get(&self.key)
            .filter(|value| !value.is_blank())
            .map(|value| format!("{}={value}", self.key))
    }
}

/// Full set of constraints declared by a driver
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    constraints: BTreeMap<String, Constraint>,
    extra_keys: BTreeSet<String>,
    unknown_allowed: BTreeSet<Protocol>,
    uniqueness: Option<UniquenessRule>,
}

impl ConstraintSet {
    /// Empty constraint set: nothing required, only standard keys known
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, name: &str) -> &mut Constraint {
        self.constraints
            .entry(canonical_name(name).to_string())
            .or_default()
    }

    /// Declare a capability without restricting it
    pub fn declare(mut self, name: &str) -> Self {
        self.entry(name);
        self
    }

    /// Mark a capability as required
    pub fn require(mut self, name: &str) -> Self {
        self.entry(name).presence = true;
        self
    }

    /// Restrict a capability to a set of values
    pub fn allow_values(mut self, name: &str, values: &[&str]) -> Self {
        self.entry(name).allowed = Some(values.iter().map(ToString::to_string).collect());
        self
    }

    /// Require a value kind
    pub fn with_kind(mut self, name: &str, kind: CapKind) -> Self {
        self.entry(name).kind = Some(kind);
        self
    }

    /// Allow-list an extra (usually vendor-specific) key
    pub fn allow_key(mut self, name: &str) -> Self {
        self.extra_keys.insert(canonical_name(name).to_string());
        self
    }

    /// Accept arbitrary unknown keys for a protocol
    pub fn allow_unknown(mut self, protocol: Protocol) -> Self {
        self.unknown_allowed.insert(protocol);
        self
    }

    /// Declare the uniqueness rule
    pub fn unique_by(mut self, flag: &str, key: &str) -> Self {
        self.uniqueness = Some(UniquenessRule {
            flag: canonical_name(flag).to_string(),
            key: canonical_name(key).to_string(),
        });
        self
    }

    /// Declared constraints in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Constraint)> {
        self.constraints.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Constraint for one capability
    pub fn get(&self, name: &str) -> Option<&Constraint> {
        self.constraints.get(canonical_name(name))
    }

    /// Whether a key is declared, allow-listed, or standard
    pub fn is_known(&self, name: &str) -> bool {
        let name = canonical_name(name);
        self.constraints.contains_key(name)
            || self.extra_keys.contains(name)
            || STANDARD_CAPABILITIES.contains(&name)
    }

    /// Whether unknown keys pass for a protocol
    pub fn allows_unknown(&self, protocol: Protocol) -> bool {
        self.unknown_allowed.contains(&protocol)
    }

    /// Uniqueness key for a capability set
    pub fn uniqueness_key(&self, capabilities: &CapabilitySet) -> Option<String> {
        self.uniqueness.as_ref()?.key_for(capabilities)
    }
}
