//! # Interlock validator
//!
//! A minimal registry of named boolean interlock flags, used as the fast-path gate before any
//! motion is issued. It is deliberately separate from the [`SafetyInterlock`] records kept in the
//! robot state, the trigger manager keeps the two in step.
//!
//! [`SafetyInterlock`]: crate::state::SafetyInterlock

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use parking_lot::Mutex;
use std::collections::BTreeMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InterlockValidator {
    flags: Mutex<BTreeMap<String, bool>>,
}

/// Raised by [`InterlockValidator::assert_safe_to_move`] while any flag is set.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Motion is blocked by active interlocks: {}", .active.join(", "))]
pub struct InterlockActiveError {
    pub active: Vec<String>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl InterlockValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a named flag.
    pub fn set_interlock(&self, name: &str, active: bool) {
        self.flags.lock().insert(name.to_string(), active);
    }

    pub fn is_any_active(&self) -> bool {
        self.flags.lock().values().any(|a| *a)
    }

    /// Names of the flags currently set, sorted.
    pub fn active_names(&self) -> Vec<String> {
        self.flags
            .lock()
            .iter()
            .filter(|(_, a)| **a)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Guard called before issuing any motion, has no side effects.
    pub fn assert_safe_to_move(&self) -> Result<(), InterlockActiveError> {
        let active = self.active_names();
        if active.is_empty() {
            Ok(())
        } else {
            Err(InterlockActiveError { active })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_gating() {
        let validator = InterlockValidator::new();
        assert!(validator.assert_safe_to_move().is_ok());

        validator.set_interlock("tilt_detected", true);
        validator.set_interlock("low_battery", true);
        validator.set_interlock("obstacle_detected", false);

        let err = validator.assert_safe_to_move().unwrap_err();
        assert_eq!(err.active, vec!["low_battery", "tilt_detected"]);
        assert!(err.to_string().contains("low_battery, tilt_detected"));

        validator.set_interlock("tilt_detected", false);
        assert!(validator.is_any_active());
        validator.set_interlock("low_battery", false);
        assert!(!validator.is_any_active());
        assert!(validator.assert_safe_to_move().is_ok());
    }
}
