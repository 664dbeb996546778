//! # Safety trigger manager
//!
//! Turns sensor readings into safety interlocks. Every activation is applied to the robot state and
//! mirrored into the [`InterlockValidator`] flag of the same name before anything is published, so
//! motion is blocked as soon as a trigger function returns.
//!
//! Re-triggering an interlock type which is already active only updates its trigger value, there is
//! never more than one entry per type.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::{EstopHandler, InterlockValidator, SafetyLimits};
use crate::bus::MessageBus;
use crate::state::{InterlockType, RobotStateManager, SafetyInterlock, StateError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Topic on which interlock changes are announced.
pub const INTERLOCK_TOPIC: &str = "safety.interlock";

/// Topic on which geofence violations are announced.
pub const GEOFENCE_VIOLATION_TOPIC: &str = "nav.geofence_violation";

/// Reason given to the emergency stop when the battery is critical.
pub const BATTERY_CRITICAL_REASON: &str = "battery_critical";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct SafetyTriggerManager {
    state: RobotStateManager,
    validator: Arc<InterlockValidator>,
    estop: Arc<EstopHandler>,
    limits: SafetyLimits,
    bus: Option<Arc<MessageBus>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum TriggerError {
    #[error("Cannot change the {0} interlock: {1}")]
    State(InterlockType, StateError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SafetyTriggerManager {
    pub fn new(
        state: RobotStateManager,
        validator: Arc<InterlockValidator>,
        estop: Arc<EstopHandler>,
        limits: SafetyLimits,
    ) -> Self {
        Self {
            state,
            validator,
            estop,
            limits,
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Raise the tilt interlock if `max(|roll|, |pitch|)` exceeds the threshold.
    ///
    /// Returns true if the threshold was exceeded.
    pub fn trigger_tilt(&self, roll_deg: f64, pitch_deg: f64, threshold_deg: f64) -> bool {
        let tilt_deg = roll_deg.abs().max(pitch_deg.abs());

        if tilt_deg > threshold_deg {
            self.activate(
                InterlockType::TiltDetected,
                Some(tilt_deg),
                &format!("Tilt of {:.1} deg exceeds {:.1} deg", tilt_deg, threshold_deg),
            );
            true
        } else {
            false
        }
    }

    /// Raise the obstacle interlock if the obstacle is at or inside the threshold distance.
    ///
    /// Returns true if the obstacle is too close.
    pub fn trigger_obstacle(&self, distance_m: f64, threshold_m: f64) -> bool {
        if distance_m <= threshold_m {
            self.activate(
                InterlockType::ObstacleDetected,
                Some(distance_m),
                &format!("Obstacle at {:.2} m, limit {:.2} m", distance_m, threshold_m),
            );
            true
        } else {
            false
        }
    }

    /// Check the attitude against the configured threshold, clearing the interlock once level.
    pub fn evaluate_tilt(&self, roll_deg: f64, pitch_deg: f64) -> bool {
        let tilted = self.trigger_tilt(roll_deg, pitch_deg, self.limits.tilt_threshold_degrees);
        if !tilted {
            self.clear_if_active(InterlockType::TiltDetected);
        }
        tilted
    }

    /// Check an obstacle range against the configured distance, clearing the interlock once clear.
    pub fn evaluate_obstacle(&self, distance_m: f64) -> bool {
        let blocked =
            self.trigger_obstacle(distance_m, self.limits.tof_obstacle_distance_meters);
        if !blocked {
            self.clear_if_active(InterlockType::ObstacleDetected);
        }
        blocked
    }

    /// Check the battery voltage.
    ///
    /// Below the low threshold the low battery interlock is raised, below the critical threshold an
    /// emergency stop is triggered as well. Returns true while the battery is low.
    pub fn evaluate_battery(&self, voltage_v: f64) -> bool {
        if voltage_v < self.limits.battery_critical_voltage {
            self.activate(
                InterlockType::LowBattery,
                Some(voltage_v),
                &format!("Battery critical at {:.2} V", voltage_v),
            );
            self.estop.trigger_estop(BATTERY_CRITICAL_REASON);
            true
        } else if voltage_v < self.limits.battery_low_voltage {
            self.activate(
                InterlockType::LowBattery,
                Some(voltage_v),
                &format!("Battery low at {:.2} V", voltage_v),
            );
            true
        } else {
            self.clear_if_active(InterlockType::LowBattery);
            false
        }
    }

    /// Check a motor or electronics temperature.
    pub fn evaluate_temperature(&self, celsius: f64) -> bool {
        if celsius > self.limits.high_temperature_celsius {
            self.activate(
                InterlockType::HighTemperature,
                Some(celsius),
                &format!("Temperature {:.1} C exceeds {:.1} C", celsius, self.limits.high_temperature_celsius),
            );
            true
        } else {
            self.clear_if_active(InterlockType::HighTemperature);
            false
        }
    }

    /// Raise the geofence violation interlock.
    ///
    /// `distance_outside_m` is how far the robot is past the safe boundary (fence minus buffer).
    pub fn trigger_geofence_violation(&self, distance_outside_m: f64) {
        self.state.get_state().write().inside_geofence = Some(false);

        self.activate(
            InterlockType::GeofenceViolation,
            Some(distance_outside_m),
            &format!("Geofence violated by {:.2} m", distance_outside_m),
        );

        if let Some(bus) = &self.bus {
            let mut payload = comms_if::bus::Payload::new();
            payload.insert("distance_outside_m".into(), json!(distance_outside_m));
            bus.publish_detached(GEOFENCE_VIOLATION_TOPIC, payload, true);
        }
    }

    pub fn clear_geofence_violation(&self) {
        self.state.get_state().write().inside_geofence = Some(true);
        self.clear_if_active(InterlockType::GeofenceViolation);
    }

    /// Record that the watchdog fired.
    pub fn trigger_watchdog_timeout(&self, silence: Duration) {
        self.activate(
            InterlockType::WatchdogTimeout,
            Some(silence.as_millis() as f64),
            &format!("No heartbeat for {} ms", silence.as_millis()),
        );
    }

    /// Clear an active interlock, it then waits for acknowledgement.
    pub fn clear(&self, interlock_type: InterlockType) -> Result<(), TriggerError> {
        self.state
            .get_state()
            .write()
            .clear_interlock(interlock_type)
            .map_err(|e| TriggerError::State(interlock_type, e))?;

        self.validator.set_interlock(interlock_type.as_str(), false);
        info!("Interlock {} cleared, awaiting acknowledgement", interlock_type);

        self.publish(interlock_type, "cleared", None);
        Ok(())
    }

    /// Acknowledge a cleared interlock, removing it from the robot state.
    pub fn acknowledge(
        &self,
        interlock_type: InterlockType,
    ) -> Result<SafetyInterlock, TriggerError> {
        let record = self
            .state
            .get_state()
            .write()
            .acknowledge_interlock(interlock_type)
            .map_err(|e| TriggerError::State(interlock_type, e))?;

        info!("Interlock {} acknowledged", interlock_type);

        self.publish(interlock_type, "acknowledged", record.trigger_value);
        Ok(record)
    }

    fn activate(&self, interlock_type: InterlockType, trigger_value: Option<f64>, description: &str) {
        let added = self
            .state
            .get_state()
            .write()
            .activate_interlock(interlock_type, trigger_value, description);

        self.validator.set_interlock(interlock_type.as_str(), true);

        if added {
            warn!("Interlock {} raised: {}", interlock_type, description);
            self.publish(interlock_type, "active", trigger_value);
        }
    }

    fn clear_if_active(&self, interlock_type: InterlockType) {
        let active = self
            .state
            .get_state()
            .read()
            .interlock(interlock_type)
            .map(|i| i.is_active())
            .unwrap_or(false);

        if active {
            if let Err(e) = self.clear(interlock_type) {
                warn!("{}", e);
            }
        }
    }

    fn publish(&self, interlock_type: InterlockType, state: &str, trigger_value: Option<f64>) {
        if let Some(bus) = &self.bus {
            let mut payload = comms_if::bus::Payload::new();
            payload.insert("interlock_type".into(), json!(interlock_type.as_str()));
            payload.insert("state".into(), json!(state));
            payload.insert("trigger_value".into(), json!(trigger_value));
            bus.publish_detached(INTERLOCK_TOPIC, payload, true);
        }
    }
}
