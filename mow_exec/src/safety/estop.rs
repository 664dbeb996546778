//! # Emergency stop handler
//!
//! [`EstopHandler::trigger_estop`] sits on the critical path bounded by the configured emergency
//! stop latency. It revokes motor authorization first, with no I/O and no blocking beyond the
//! short gate locks, then latches the robot state and finally hands the bus publication off to a
//! background task.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{error, info, warn};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use super::{InterlockValidator, MotorAuthorization};
use crate::bus::MessageBus;
use crate::state::{InterlockType, RobotStateManager, StateError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Topic on which emergency stops are announced.
pub const ESTOP_TOPIC: &str = "safety.estop";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct EstopHandler {
    motor_auth: Arc<MotorAuthorization>,
    last_reason: Mutex<Option<String>>,

    /// Robot state to latch and the validator to flag, if attached
    latch: Option<(RobotStateManager, Arc<InterlockValidator>)>,

    bus: Option<Arc<MessageBus>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl EstopHandler {
    /// Create a handler which only acts on the motor gate.
    pub fn new(motor_auth: Arc<MotorAuthorization>) -> Self {
        Self {
            motor_auth,
            last_reason: Mutex::new(None),
            latch: None,
            bus: None,
        }
    }

    /// Also latch the robot state into `EmergencyStop` and raise the `emergency_stop` interlock.
    pub fn with_state(mut self, state: RobotStateManager, validator: Arc<InterlockValidator>) -> Self {
        self.latch = Some((state, validator));
        self
    }

    /// Announce emergency stops on the bus.
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Stop the motors.
    ///
    /// Idempotent, a repeated call overwrites the stored reason and revokes again.
    pub fn trigger_estop(&self, reason: &str) {
        self.motor_auth.revoke();
        *self.last_reason.lock() = Some(reason.to_string());

        if let Some((state, validator)) = &self.latch {
            {
                let handle = state.get_state();
                let mut s = handle.write();
                s.enter_emergency_stop();
                s.activate_interlock(InterlockType::EmergencyStop, None, reason);
            }
            validator.set_interlock(InterlockType::EmergencyStop.as_str(), true);
        }

        error!("EMERGENCY STOP: {}", reason);

        if let Some(bus) = &self.bus {
            let mut payload = comms_if::bus::Payload::new();
            payload.insert("reason".into(), json!(reason));
            payload.insert("latched".into(), json!(self.latch.is_some()));
            bus.publish_detached(ESTOP_TOPIC, payload, true);
        }
    }

    /// The reason given to the most recent emergency stop.
    pub fn last_reason(&self) -> Option<String> {
        self.last_reason.lock().clone()
    }

    /// Release the emergency stop latch after an explicit external decision.
    ///
    /// Motors stay revoked, authorization must be granted again separately.
    pub fn reset(&self) -> Result<(), StateError> {
        if let Some((state, validator)) = &self.latch {
            let handle = state.get_state();
            let mut s = handle.write();

            if !s.reset_emergency_stop() {
                warn!("Emergency stop reset requested but no stop was latched");
            }

            match s.clear_interlock(InterlockType::EmergencyStop) {
                Ok(()) | Err(StateError::NoSuchInterlock(..)) => (),
                Err(e) => return Err(e),
            }
            validator.set_interlock(InterlockType::EmergencyStop.as_str(), false);
        }

        info!("Emergency stop reset");
        Ok(())
    }
}
