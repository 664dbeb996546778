//! # Safety interlock records
//!
//! A [`SafetyInterlock`] is the audit-trail entity stored in the robot state. It follows the
//! monotonic lifecycle `Active -> ClearedPendingAck -> Acknowledged`, a cleared interlock can only
//! become active again through a brand new trigger.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyInterlock {
    pub interlock_id: String,
    pub interlock_type: InterlockType,
    pub triggered_at_us: i64,
    pub cleared_at_us: Option<i64>,
    pub acknowledged_at_us: Option<i64>,
    pub state: InterlockState,

    /// Measured value which caused the trigger (degrees, meters, volts...)
    pub trigger_value: Option<f64>,

    pub description: String,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The kinds of interlock the mower knows about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterlockType {
    EmergencyStop,
    TiltDetected,
    LowBattery,
    GeofenceViolation,
    WatchdogTimeout,
    HighTemperature,
    ObstacleDetected,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterlockState {
    Active,
    ClearedPendingAck,
    Acknowledged,
}

#[derive(Debug, Error, PartialEq)]
pub enum InterlockError {
    #[error("Cannot {action} the {interlock_type} interlock while it is {from:?}")]
    InvalidTransition {
        interlock_type: InterlockType,
        from: InterlockState,
        action: &'static str,
    },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SafetyInterlock {
    /// Create a new active interlock triggered now.
    pub fn new(interlock_type: InterlockType, trigger_value: Option<f64>, description: &str) -> Self {
        Self {
            interlock_id: uuid::Uuid::new_v4().to_string(),
            interlock_type,
            triggered_at_us: util::time::now_us(),
            cleared_at_us: None,
            acknowledged_at_us: None,
            state: InterlockState::Active,
            trigger_value,
            description: description.to_string(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == InterlockState::Active
    }

    /// Move an active interlock to `ClearedPendingAck`.
    pub fn clear(&mut self) -> Result<(), InterlockError> {
        self.check_transition(InterlockState::Active, "clear")?;

        // Clock steps backwards must not produce a clear before the trigger
        self.cleared_at_us = Some(util::time::now_us().max(self.triggered_at_us));
        self.state = InterlockState::ClearedPendingAck;

        Ok(())
    }

    /// Move a cleared interlock to `Acknowledged`.
    pub fn acknowledge(&mut self) -> Result<(), InterlockError> {
        self.check_transition(InterlockState::ClearedPendingAck, "acknowledge")?;

        let cleared_at_us = self.cleared_at_us.unwrap_or(self.triggered_at_us);
        self.acknowledged_at_us = Some(util::time::now_us().max(cleared_at_us));
        self.state = InterlockState::Acknowledged;

        Ok(())
    }

    fn check_transition(
        &self,
        expected: InterlockState,
        action: &'static str,
    ) -> Result<(), InterlockError> {
        if self.state != expected {
            return Err(InterlockError::InvalidTransition {
                interlock_type: self.interlock_type,
                from: self.state,
                action,
            });
        }
        Ok(())
    }
}

impl InterlockType {
    /// Name used for the interlock validator flag and in bus payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            InterlockType::EmergencyStop => "emergency_stop",
            InterlockType::TiltDetected => "tilt_detected",
            InterlockType::LowBattery => "low_battery",
            InterlockType::GeofenceViolation => "geofence_violation",
            InterlockType::WatchdogTimeout => "watchdog_timeout",
            InterlockType::HighTemperature => "high_temperature",
            InterlockType::ObstacleDetected => "obstacle_detected",
        }
    }
}

impl std::fmt::Display for InterlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
