//! # Safety gate
//!
//! Everything that can stop the mower: the motor authorization gate, the interlock validator, the
//! emergency stop handler, the watchdog and the trigger manager which converts sensor readings into
//! interlocks.
//!
//! Motion is only allowed when the motor gate is enabled AND no interlock flag is set.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod estop;
pub mod limits;
pub mod motor_auth;
pub mod triggers;
pub mod validator;
pub mod watchdog;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use estop::EstopHandler;
pub use limits::{LimitsError, SafetyLimits};
pub use motor_auth::MotorAuthorization;
pub use triggers::{SafetyTriggerManager, TriggerError};
pub use validator::{InterlockActiveError, InterlockValidator};
pub use watchdog::{Watchdog, WatchdogError};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Duration;

use crate::bus::MessageBus;
use crate::state::RobotStateManager;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The safety components wired together around one robot state.
#[derive(Clone)]
pub struct SafetyGate {
    pub motor_auth: Arc<MotorAuthorization>,
    pub validator: Arc<InterlockValidator>,
    pub estop: Arc<EstopHandler>,
    pub triggers: Arc<SafetyTriggerManager>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SafetyGate {
    /// Build the safety components. The limits must already be validated.
    pub fn new(state: RobotStateManager, limits: SafetyLimits, bus: Option<Arc<MessageBus>>) -> Self {
        let motor_auth = Arc::new(MotorAuthorization::new());
        let validator = Arc::new(InterlockValidator::new());

        let mut estop =
            EstopHandler::new(motor_auth.clone()).with_state(state.clone(), validator.clone());
        if let Some(bus) = &bus {
            estop = estop.with_bus(bus.clone());
        }
        let estop = Arc::new(estop);

        let mut triggers =
            SafetyTriggerManager::new(state, validator.clone(), estop.clone(), limits);
        if let Some(bus) = bus {
            triggers = triggers.with_bus(bus);
        }

        Self {
            motor_auth,
            validator,
            estop,
            triggers: Arc::new(triggers),
        }
    }

    /// Build a watchdog using the configured timeout, recording its interlock on timeout.
    pub fn watchdog(&self) -> Watchdog {
        let timeout = Duration::from_millis(self.triggers.limits().watchdog_timeout_ms);
        Watchdog::new(timeout, self.estop.clone()).with_triggers(self.triggers.clone())
    }

    /// True if the motor gate is enabled and no interlock is set.
    pub fn motion_permitted(&self) -> bool {
        self.motor_auth.is_enabled() && !self.validator.is_any_active()
    }
}
