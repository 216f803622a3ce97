//! Capability matching for W3C `alwaysMatch`/`firstMatch` entries.
//!
//! Each `firstMatch` entry is merged on top of `alwaysMatch` and validated
//! against the driver's [`ConstraintSet`]. Rules run in a fixed order and the
//! first violation wins:
//!
//! 1. required capabilities present and non-blank
//! 2. restricted capabilities hold an allowed value
//! 3. declared value kinds match
//! 4. no unknown keys, unless the protocol permits them

use super::capabilities::CapabilitySet;
use super::constraints::ConstraintSet;
use crate::error::{AutodError, Result};

/// Merge one `firstMatch` entry over `alwaysMatch`. Keys in the entry win
/// for this merge only.
pub fn merge_entry(always_match: &CapabilitySet, first_match: &CapabilitySet) -> CapabilitySet {
    always_match.merged_with(first_match)
}

/// Validate a merged entry, returning it unchanged on success.
pub fn match_capabilities(
    merged: CapabilitySet,
    constraints: &ConstraintSet,
) -> Result<CapabilitySet> {
    for (name, constraint) in constraints.iter() {
        if !constraint.presence {
            continue;
        }
        match merged.get(name) {
            Some(value) if !value.is_blank() => {},
            _ => {
                return Err(AutodError::InvalidCapabilities(format!(
                    "'{name}' can't be blank"
                )))
            },
        }
    }

    for (name, constraint) in constraints.iter() {
        let (Some(allowed), Some(value)) = (&constraint.allowed, merged.get(name)) else {
            continue;
        };
        let rendered = value.to_string();
        if !allowed.iter().any(|candidate| *candidate == rendered) {
            return Err(AutodError::InvalidCapabilities(format!(
                "{name}: {rendered} not part of [{}]",
                allowed.join(", ")
            )));
        }
    }

    for (name, constraint) in constraints.iter() {
        let (Some(kind), Some(value)) = (constraint.kind, merged.get(name)) else {
            continue;
        };
        if !value.matches_kind(kind) {
            return Err(AutodError::InvalidCapabilities(format!(
                "'{name}' must be of type {kind}"
            )));
        }
    }

    if !constraints.allows_unknown(merged.protocol()) {
        if let Some((name, _)) = merged.iter().find(|(name, _)| !constraints.is_known(name)) {
            return Err(AutodError::InvalidCapabilities(format!(
                "'{name}' is not a recognized capability"
            )));
        }
    }

    Ok(merged)
}
