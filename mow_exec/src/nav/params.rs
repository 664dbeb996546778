//! # Navigation parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::params::{non_negative, percentage, period, positive, ParamsError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavParams {
    /// Distance at which a waypoint counts as reached
    pub waypoint_tolerance_m: f64,

    /// Period of the waypoint control loop
    pub control_period_s: f64,

    /// Wheel speed limit, also the speed commanded at 100%
    pub max_speed_mps: f64,

    /// Heading error giving a full turn effort
    pub full_turn_error_deg: f64,

    /// Above this heading error the forward speed is halved
    pub slow_down_error_deg: f64,

    /// Separation of the points of a return path
    pub return_path_separation_m: f64,

    /// Speed used when returning home, as a percentage
    pub return_home_speed_pct: f64,

    /// Dead reckoning drift model
    pub drift: DriftParams,
}

/// Dead reckoning drift: `base + per_meter * distance + per_second * seconds_since_fix`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftParams {
    pub base_m: f64,
    pub per_meter: f64,
    pub per_second: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsMonitorParams {
    pub check_interval_s: f64,
    pub max_accuracy_m: f64,
    pub max_fix_age_s: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NavParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        positive("nav.waypoint_tolerance_m", self.waypoint_tolerance_m)?;
        self.control_period()?;
        positive("nav.max_speed_mps", self.max_speed_mps)?;
        positive("nav.full_turn_error_deg", self.full_turn_error_deg)?;
        non_negative("nav.slow_down_error_deg", self.slow_down_error_deg)?;
        positive("nav.return_path_separation_m", self.return_path_separation_m)?;
        percentage("nav.return_home_speed_pct", self.return_home_speed_pct)?;

        non_negative("nav.drift.base_m", self.drift.base_m)?;
        non_negative("nav.drift.per_meter", self.drift.per_meter)?;
        non_negative("nav.drift.per_second", self.drift.per_second)?;
        Ok(())
    }

    /// Period of the control loop.
    pub fn control_period(&self) -> Result<Duration, ParamsError> {
        period("nav.control_period_s", self.control_period_s)
    }
}

impl GpsMonitorParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        self.check_interval()?;
        positive("gps_monitor.max_accuracy_m", self.max_accuracy_m)?;
        positive("gps_monitor.max_fix_age_s", self.max_fix_age_s)?;
        Ok(())
    }

    pub fn check_interval(&self) -> Result<Duration, ParamsError> {
        period("gps_monitor.check_interval_s", self.check_interval_s)
    }
}

impl Default for NavParams {
    fn default() -> Self {
        Self {
            waypoint_tolerance_m: 0.5,
            control_period_s: 0.1,
            max_speed_mps: 0.5,
            full_turn_error_deg: 45.0,
            slow_down_error_deg: 30.0,
            return_path_separation_m: 2.0,
            return_home_speed_pct: 60.0,
            drift: DriftParams::default(),
        }
    }
}

impl Default for DriftParams {
    fn default() -> Self {
        Self {
            base_m: 0.5,
            per_meter: 0.02,
            per_second: 0.01,
        }
    }
}

impl Default for GpsMonitorParams {
    fn default() -> Self {
        Self {
            check_interval_s: 1.0,
            max_accuracy_m: 5.0,
            max_fix_age_s: 10.0,
        }
    }
}
