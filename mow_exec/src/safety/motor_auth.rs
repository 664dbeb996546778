//! # Motor authorization
//!
//! The motor authorization gate is the single boolean every motion command must pass. It is
//! disabled at construction, only an explicit [`MotorAuthorization::authorize`] enables it.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::info;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Motor enable gate, safe to use from OS threads as well as async tasks.
#[derive(Debug, Default)]
pub struct MotorAuthorization {
    enabled: Mutex<bool>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MotorAuthorization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authorize(&self) {
        let mut enabled = self.enabled.lock();
        if !*enabled {
            info!("Motors authorized");
        }
        *enabled = true;
    }

    pub fn revoke(&self) {
        *self.enabled.lock() = false;
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock()
    }
}
