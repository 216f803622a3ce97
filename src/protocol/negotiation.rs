//! Protocol negotiation for new-session requests.
//!
//! A request body may carry a legacy `desiredCapabilities` object, a W3C
//! `capabilities` object, or both. [`negotiate`] decides which protocol
//! governs the session and returns the single resolved capability set.
//!
//! | W3C match | Legacy present | Outcome                                   |
//! |-----------|----------------|-------------------------------------------|
//! | ok        | no             | W3C, matched set                          |
//! | ok        | covered        | W3C, matched set                          |
//! | ok        | diverges       | Legacy, legacy object verbatim            |
//! | failed    | yes            | Legacy, legacy object verbatim            |
//! | failed    | no             | the matching error                        |
//! | absent    | yes            | Legacy, legacy object verbatim            |
//! | absent    | no             | `NoMatchingCapabilities`                  |
//!
//! "Covered" means every legacy key appears in the W3C match with the same
//! value, after alias resolution.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::capabilities::{CapabilitySet, Protocol};
use super::constraints::ConstraintSet;
use super::matcher::{match_capabilities, merge_entry};
use crate::error::{AutodError, Result};

/// Outcome of a successful negotiation
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// Governing protocol
    pub protocol: Protocol,
    /// Resolved capabilities, tagged with `protocol`
    pub capabilities: CapabilitySet,
    /// Index of the winning `firstMatch` entry (W3C only)
    pub first_match_index: Option<usize>,
}

/// A parsed new-session request body
#[derive(Debug, Clone, Default)]
pub struct NewSessionRequest {
    desired: Option<Map<String, Value>>,
    required: Option<Map<String, Value>>,
    always_match: Option<Map<String, Value>>,
    first_match: Option<Vec<Value>>,
    has_w3c: bool,
}

fn object_field(
    parent: &Map<String, Value>,
    field: &str,
) -> Result<Option<Map<String, Value>>> {
    match parent.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(other) => Err(AutodError::InvalidArgument(format!(
            "'{field}' must be a JSON object, got {other}"
        ))),
    }
}

impl NewSessionRequest {
    /// Parse the raw body of a new-session request.
    pub fn from_body(body: &Value) -> Result<Self> {
        let Value::Object(body) = body else {
            return Err(AutodError::InvalidArgument(
                "new session request body must be a JSON object".to_string(),
            ));
        };

        let mut request = Self {
            desired: object_field(body, "desiredCapabilities")?,
            required: object_field(body, "requiredCapabilities")?,
            ..Self::default()
        };

        if let Some(capabilities) = object_field(body, "capabilities")? {
            request.has_w3c = true;
            request.always_match = object_field(&capabilities, "alwaysMatch")?;
            request.first_match = match capabilities.get("firstMatch") {
                None | Some(Value::Null) => None,
                Some(Value::Array(entries)) => Some(entries.clone()),
                Some(other) => {
                    return Err(AutodError::InvalidArgument(format!(
                        "'firstMatch' must be a JSON array, got {other}"
                    )))
                },
            };
        }

        Ok(request)
    }

    /// Whether a W3C `capabilities` object was supplied
    pub fn has_w3c(&self) -> bool {
        self.has_w3c
    }

    /// Legacy capabilities, with `requiredCapabilities` merged over
    /// `desiredCapabilities`.
    pub fn legacy_capabilities(&self) -> Result<Option<CapabilitySet>> {
        let Some(desired) = &self.desired else {
            return Ok(None);
        };
        let mut caps = CapabilitySet::from_json(desired, Protocol::Legacy)?;
        if let Some(required) = &self.required {
            caps = caps.merged_with(&CapabilitySet::from_json(required, Protocol::Legacy)?);
        }
        Ok(Some(caps))
    }

    /// Run W3C matching over every `firstMatch` entry in order. The first
    /// entry that validates wins; `None` when no W3C payload was sent.
    pub fn match_w3c(
        &self,
        constraints: &ConstraintSet,
    ) -> Option<Result<(usize, CapabilitySet)>> {
        if !self.has_w3c {
            return None;
        }

        let always_match = match &self.always_match {
            Some(map) => match CapabilitySet::from_json(map, Protocol::W3C) {
                Ok(caps) => caps,
                Err(err) => return Some(Err(err)),
            },
            None => CapabilitySet::new(Protocol::W3C),
        };

        let entries = match &self.first_match {
            Some(entries) if !entries.is_empty() => entries.clone(),
            _ => vec![Value::Object(Map::new())],
        };

        let mut failures = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let outcome = CapabilitySet::from_value(entry, Protocol::W3C)
                .and_then(|first| match_capabilities(merge_entry(&always_match, &first), constraints));

            match outcome {
                Ok(matched) => {
                    debug!(index, "firstMatch entry accepted");
                    return Some(Ok((index, matched)));
                },
                Err(err) => {
                    warn!(index, error = %err, "firstMatch entry skipped");
                    failures.push(err);
                },
            }
        }

        Some(Err(combine_failures(failures)))
    }

    /// Decide the governing protocol and resolve capabilities.
    pub fn negotiate(&self, constraints: &ConstraintSet) -> Result<Negotiated> {
        let legacy = self.legacy_capabilities()?;

        match (self.match_w3c(constraints), legacy) {
            (Some(Ok((index, matched))), Some(legacy)) => {
                if legacy.is_covered_by(&matched) {
                    Ok(Negotiated {
                        protocol: Protocol::W3C,
                        capabilities: matched,
                        first_match_index: Some(index),
                    })
                } else {
                    debug!("legacy capabilities diverge from the W3C match, using JSONWP");
                    Ok(legacy_outcome(legacy))
                }
            },
            (Some(Ok((index, matched))), None) => Ok(Negotiated {
                protocol: Protocol::W3C,
                capabilities: matched,
                first_match_index: Some(index),
            }),
            (Some(Err(err)), Some(legacy)) => {
                warn!(error = %err, "W3C capabilities did not match, falling back to JSONWP");
                Ok(legacy_outcome(legacy))
            },
            (Some(Err(err)), None) => Err(err),
            (None, Some(legacy)) => Ok(legacy_outcome(legacy)),
            (None, None) => Err(AutodError::NoMatchingCapabilities(
                "neither 'capabilities' nor 'desiredCapabilities' were provided".to_string(),
            )),
        }
    }
}

fn legacy_outcome(capabilities: CapabilitySet) -> Negotiated {
    Negotiated {
        protocol: Protocol::Legacy,
        capabilities,
        first_match_index: None,
    }
}

fn combine_failures(mut failures: Vec<AutodError>) -> AutodError {
    if failures.len() == 1 {
        return failures.remove(0);
    }
    let messages: Vec<String> = failures.iter().map(ToString::to_string).collect();
    AutodError::NoMatchingCapabilities(messages.join("; "))
}

/// Negotiate a raw new-session body against a driver's constraints.
pub fn negotiate(body: &Value, constraints: &ConstraintSet) -> Result<Negotiated> {
    NewSessionRequest::from_body(body)?.negotiate(constraints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constraints() -> ConstraintSet {
        ConstraintSet::new()
            .require("platformName")
            .require("deviceName")
            .declare("app")
            .allow_values("automationName", &["Fake"])
            .allow_unknown(Protocol::Legacy)
    }

    #[test]
    fn test_w3c_only() {
        let body = json!({
            "capabilities": {
                "alwaysMatch": {"platformName": "Fake"},
                "firstMatch": [{"deviceName": "Fake", "app": "/a.apk"}]
            }
        });
        let negotiated = negotiate(&body, &constraints()).unwrap();

        assert_eq!(negotiated.protocol, Protocol::W3C);
        assert_eq!(negotiated.first_match_index, Some(0));
        assert_eq!(
            negotiated.capabilities.to_json(),
            json!({"platformName": "Fake", "deviceName": "Fake", "app": "/a.apk"})
        );
    }

    #[test]
    fn test_missing_first_match_is_single_empty_entry() {
        let body = json!({"capabilities": {"alwaysMatch": {"platformName": "Fake", "deviceName": "Fake"}}});
        let negotiated = negotiate(&body, &constraints()).unwrap();
        assert_eq!(negotiated.first_match_index, Some(0));
    }

    #[test]
    fn test_failed_entries_are_skipped() {
        let body = json!({
            "capabilities": {
                "alwaysMatch": {},
                "firstMatch": [{}, {"platformName": "Fake", "deviceName": "Fake", "app": "/a.apk"}]
            }
        });
        let negotiated = negotiate(&body, &constraints()).unwrap();
        assert_eq!(negotiated.first_match_index, Some(1));
        assert_eq!(negotiated.capabilities.len(), 3);
    }

    #[test]
    fn test_single_failure_surfaces_matching_error() {
        let body = json!({"capabilities": {"alwaysMatch": {}}});
        let err = negotiate(&body, &constraints()).unwrap_err();
        assert!(matches!(err, AutodError::InvalidCapabilities(_)));
        assert!(err.to_string().contains("can't be blank"));
    }

    #[test]
    fn test_all_entries_failing_reports_every_reason() {
        let body = json!({
            "capabilities": {
                "alwaysMatch": {"platformName": "Fake", "deviceName": "Fake"},
                "firstMatch": [{"automationName": "Bad"}, {"automationName": "Worse"}]
            }
        });
        let err = negotiate(&body, &constraints()).unwrap_err();
        assert!(matches!(err, AutodError::NoMatchingCapabilities(_)));
        assert!(err.to_string().contains("Bad not part of"));
        assert!(err.to_string().contains("Worse not part of"));
    }

    #[test]
    fn test_failed_w3c_falls_back_to_legacy() {
        let body = json!({
            "desiredCapabilities": {"platformName": "Fake", "custom": 1},
            "capabilities": {"alwaysMatch": {}}
        });
        let negotiated = negotiate(&body, &constraints()).unwrap();
        assert_eq!(negotiated.protocol, Protocol::Legacy);
        assert_eq!(negotiated.capabilities.to_json(), json!({"platformName": "Fake", "custom": 1}));
    }

    #[test]
    fn test_equivalent_legacy_keeps_w3c() {
        let body = json!({
            "desiredCapabilities": {"platformName": "Fake", "deviceName": "Fake", "app": "/a.apk"},
            "capabilities": {
                "alwaysMatch": {"platformName": "Fake"},
                "firstMatch": [{"autod:deviceName": "Fake", "app": "/a.apk"}]
            }
        });
        let negotiated = negotiate(&body, &constraints()).unwrap();
        assert_eq!(negotiated.protocol, Protocol::W3C);
    }

    #[test]
    fn test_divergent_legacy_wins() {
        let body = json!({
            "desiredCapabilities": {
                "platformName": "Fake",
                "deviceName": "Fake",
                "app": "/a.apk",
                "extraLegacyKey": "yes"
            },
            "capabilities": {
                "alwaysMatch": {"platformName": "Fake", "browserName": "none"},
                "firstMatch": [{"deviceName": "Fake", "app": "/a.apk"}]
            }
        });
        let negotiated = negotiate(&body, &constraints()).unwrap();
        assert_eq!(negotiated.protocol, Protocol::Legacy);
        assert_eq!(
            negotiated.capabilities.to_json(),
            json!({"platformName": "Fake", "deviceName": "Fake", "app": "/a.apk", "extraLegacyKey": "yes"})
        );
    }

    #[test]
    fn test_required_capabilities_merge_over_desired() {
        let body = json!({
            "desiredCapabilities": {"platformName": "Fake", "app": "/a.apk"},
            "requiredCapabilities": {"app": "/b.apk"}
        });
        let negotiated = negotiate(&body, &constraints()).unwrap();
        assert_eq!(negotiated.capabilities.get_str("app"), Some("/b.apk"));
    }

    #[test]
    fn test_nothing_supplied() {
        let err = negotiate(&json!({}), &constraints()).unwrap_err();
        assert!(matches!(err, AutodError::NoMatchingCapabilities(_)));
    }

    #[test]
    fn test_malformed_shapes_are_invalid_arguments() {
        assert!(matches!(
            negotiate(&json!([]), &constraints()),
            Err(AutodError::InvalidArgument(_))
        ));
        assert!(matches!(
            negotiate(&json!({"capabilities": {"firstMatch": {}}}), &constraints()),
            Err(AutodError::InvalidArgument(_))
        ));
    }
}
