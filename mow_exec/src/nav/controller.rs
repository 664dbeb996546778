//! # Heading controller
//!
//! Proportional heading controller for a differential drive. The heading error is turned into a
//! turn effort, which is added to the left wheel and subtracted from the right.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use super::params::NavParams;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HeadingController {
    /// Heading error at which the turn effort saturates
    full_turn_error_deg: f64,

    /// Heading error above which forward speed is halved
    slow_down_error_deg: f64,

    /// Wheel speed limit
    max_speed_mps: f64,
}

/// Left and right wheel speed demands in meters per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WheelSpeeds {
    pub left: f64,
    pub right: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl HeadingController {
    pub fn new(params: &NavParams) -> Self {
        Self {
            full_turn_error_deg: params.full_turn_error_deg,
            slow_down_error_deg: params.slow_down_error_deg,
            max_speed_mps: params.max_speed_mps,
        }
    }

    pub fn max_speed_mps(&self) -> f64 {
        self.max_speed_mps
    }

    /// Get the wheel speeds for a heading error and a desired forward speed.
    ///
    /// A positive error means the target is clockwise of the current heading.
    pub fn get(&self, heading_error_deg: f64, forward_mps: f64) -> WheelSpeeds {
        let turn = (heading_error_deg / self.full_turn_error_deg).clamp(-1.0, 1.0);

        let forward = if heading_error_deg.abs() > self.slow_down_error_deg {
            forward_mps * 0.5
        } else {
            forward_mps
        };

        let max = self.max_speed_mps;
        WheelSpeeds {
            left: (forward + turn * max).clamp(-max, max),
            right: (forward - turn * max).clamp(-max, max),
        }
    }
}

impl WheelSpeeds {
    pub const STOP: WheelSpeeds = WheelSpeeds {
        left: 0.0,
        right: 0.0,
    };
}
