//! # Safety limits
//!
//! Safety limits are loaded once at startup from `safety_limits.toml` and are immutable afterwards.
//! Any violation of the limits' own invariants is a fatal configuration error.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use util::params::{self, LoadError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Upper bound on the configured emergency stop latency.
pub const MAX_ESTOP_LATENCY_MS: u64 = 100;

/// Upper bound on the configured tilt cutoff latency.
pub const MAX_TILT_CUTOFF_LATENCY_MS: u64 = 200;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    pub estop_latency_ms: u64,
    pub tilt_threshold_degrees: f64,
    pub tilt_cutoff_latency_ms: u64,
    pub battery_low_voltage: f64,
    pub battery_critical_voltage: f64,
    pub motor_current_max_amps: f64,
    pub watchdog_timeout_ms: u64,
    pub geofence_buffer_meters: f64,
    pub high_temperature_celsius: f64,
    pub tof_obstacle_distance_meters: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LimitsError {
    #[error("estop_latency_ms = {0} exceeds the 100 ms ceiling")]
    EstopLatencyExceeded(u64),

    #[error("tilt_cutoff_latency_ms = {0} exceeds the 200 ms ceiling")]
    TiltLatencyExceeded(u64),

    #[error("battery_critical_voltage ({critical} V) must be below battery_low_voltage ({low} V)")]
    BatteryThresholdsInverted { low: f64, critical: f64 },

    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),

    #[error("{0} must not be negative")]
    Negative(&'static str),

    #[error("Could not load the safety limits: {0}")]
    LoadError(#[from] LoadError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            estop_latency_ms: 50,
            tilt_threshold_degrees: 30.0,
            tilt_cutoff_latency_ms: 200,
            battery_low_voltage: 22.0,
            battery_critical_voltage: 20.0,
            motor_current_max_amps: 15.0,
            watchdog_timeout_ms: 1000,
            geofence_buffer_meters: 1.0,
            high_temperature_celsius: 70.0,
            tof_obstacle_distance_meters: 0.3,
        }
    }
}

impl SafetyLimits {
    /// Load the limits from a file in the parameters directory and validate them.
    pub fn load(file: &str) -> Result<Self, LimitsError> {
        let limits: Self = params::load(file)?;
        limits.validate()?;
        Ok(limits)
    }

    /// Load the limits from an explicit path and validate them.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, LimitsError> {
        let limits: Self = params::load_from_path(path)?;
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.estop_latency_ms == 0 {
            return Err(LimitsError::NonPositive("estop_latency_ms"));
        }
        if self.estop_latency_ms > MAX_ESTOP_LATENCY_MS {
            return Err(LimitsError::EstopLatencyExceeded(self.estop_latency_ms));
        }

        if self.tilt_cutoff_latency_ms == 0 {
            return Err(LimitsError::NonPositive("tilt_cutoff_latency_ms"));
        }
        if self.tilt_cutoff_latency_ms > MAX_TILT_CUTOFF_LATENCY_MS {
            return Err(LimitsError::TiltLatencyExceeded(self.tilt_cutoff_latency_ms));
        }

        if self.watchdog_timeout_ms == 0 {
            return Err(LimitsError::NonPositive("watchdog_timeout_ms"));
        }

        let positive = [
            ("tilt_threshold_degrees", self.tilt_threshold_degrees),
            ("battery_low_voltage", self.battery_low_voltage),
            ("battery_critical_voltage", self.battery_critical_voltage),
            ("motor_current_max_amps", self.motor_current_max_amps),
            ("high_temperature_celsius", self.high_temperature_celsius),
            ("tof_obstacle_distance_meters", self.tof_obstacle_distance_meters),
        ];
        for (name, value) in positive {
            // NaN fails this check too
            if !(value > 0.0) {
                return Err(LimitsError::NonPositive(name));
            }
        }

        if !(self.geofence_buffer_meters >= 0.0) {
            return Err(LimitsError::Negative("geofence_buffer_meters"));
        }

        if self.battery_critical_voltage >= self.battery_low_voltage {
            return Err(LimitsError::BatteryThresholdsInverted {
                low: self.battery_low_voltage,
                critical: self.battery_critical_voltage,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() -> Result<(), LimitsError> {
        SafetyLimits::default().validate()
    }

    #[test]
    fn test_latency_ceilings() {
        let limits = SafetyLimits {
            estop_latency_ms: 101,
            ..Default::default()
        };
        assert!(matches!(
            limits.validate(),
            Err(LimitsError::EstopLatencyExceeded(101))
        ));

        let limits = SafetyLimits {
            tilt_cutoff_latency_ms: 250,
            ..Default::default()
        };
        assert!(matches!(
            limits.validate(),
            Err(LimitsError::TiltLatencyExceeded(250))
        ));
    }

    #[test]
    fn test_battery_inverted() {
        let limits = SafetyLimits {
            battery_low_voltage: 20.0,
            battery_critical_voltage: 20.0,
            ..Default::default()
        };
        assert!(matches!(
            limits.validate(),
            Err(LimitsError::BatteryThresholdsInverted { .. })
        ));
    }

    #[test]
    fn test_non_positive() {
        let limits = SafetyLimits {
            tof_obstacle_distance_meters: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            limits.validate(),
            Err(LimitsError::NonPositive("tof_obstacle_distance_meters"))
        ));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            estop_latency_ms = 80
            tilt_threshold_degrees = 25.0
            tilt_cutoff_latency_ms = 150
            battery_low_voltage = 11.5
            battery_critical_voltage = 12.0
            motor_current_max_amps = 10.0
            watchdog_timeout_ms = 500
            geofence_buffer_meters = 0.5
            high_temperature_celsius = 60.0
            tof_obstacle_distance_meters = 0.25
            "#
        )
        .unwrap();

        // Inverted battery thresholds are fatal at load
        assert!(matches!(
            SafetyLimits::load_from_path(file.path()),
            Err(LimitsError::BatteryThresholdsInverted { .. })
        ));
    }
}
