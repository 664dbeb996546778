//! # Mower Executable Parameters
//!
//! This module provides the parameters of the mower executable, loaded from `mow_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use util::params::LoadError;

use crate::bus::persistence::DEFAULT_MAX_RECORDS_PER_TOPIC;
use crate::nav::{GeoPoint, GpsMonitorParams, NavParams};
use crate::sim::SimParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MowExecParams {
    /// Home position, the return home target
    pub home: GeoPoint,

    /// Geofence polygon, no geofence is enforced when empty
    #[serde(default)]
    pub geofence: Vec<GeoPoint>,

    #[serde(default)]
    pub nav: NavParams,

    #[serde(default)]
    pub gps_monitor: GpsMonitorParams,

    #[serde(default)]
    pub bus: BusParams,

    #[serde(default)]
    pub sim: SimParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusParams {
    /// Records kept per topic by the bus archive
    pub max_records_per_topic: usize,

    /// Critical topics replayed at startup
    pub replay_topics: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("{0} must be finite and greater than zero, got {1}")]
    NotPositive(&'static str, f64),

    #[error("{0} must be finite and not negative, got {1}")]
    Negative(&'static str, f64),

    #[error("{0} must be in [0, 100], got {1}")]
    NotPercentage(&'static str, f64),

    #[error("{0} must not be zero")]
    Zero(&'static str),
}

#[derive(Debug, Error)]
pub enum MowExecParamsError {
    #[error("Could not load the parameters: {0}")]
    LoadError(#[from] LoadError),

    #[error("Invalid parameter: {0}")]
    Invalid(#[from] ParamsError),
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl MowExecParams {
    /// Load the parameters from a file in the params directory and validate them.
    pub fn load(file: &str) -> Result<Self, MowExecParamsError> {
        let params: Self = util::params::load(file)?;
        params.validate()?;
        Ok(params)
    }

    /// Check every section, so that no later conversion of a period or speed can fail.
    pub fn validate(&self) -> Result<(), ParamsError> {
        self.nav.validate()?;
        self.gps_monitor.validate()?;
        self.sim.validate()?;

        if self.bus.max_records_per_topic == 0 {
            return Err(ParamsError::Zero("bus.max_records_per_topic"));
        }
        Ok(())
    }
}

impl Default for BusParams {
    fn default() -> Self {
        Self {
            max_records_per_topic: DEFAULT_MAX_RECORDS_PER_TOPIC,
            replay_topics: vec!["safety.estop".into(), "safety.interlock".into()],
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Require a finite value greater than zero.
pub fn positive(name: &'static str, value: f64) -> Result<f64, ParamsError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ParamsError::NotPositive(name, value))
    }
}

/// Require a finite value of at least zero.
pub fn non_negative(name: &'static str, value: f64) -> Result<f64, ParamsError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ParamsError::Negative(name, value))
    }
}

/// Require a percentage.
pub fn percentage(name: &'static str, value: f64) -> Result<f64, ParamsError> {
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(ParamsError::NotPercentage(name, value))
    }
}

/// Convert a period in seconds, rejecting anything [`Duration`] cannot hold or which is not
/// positive.
pub fn period(name: &'static str, seconds: f64) -> Result<Duration, ParamsError> {
    positive(name, seconds)?;
    Duration::try_from_secs_f64(seconds).map_err(|_| ParamsError::NotPositive(name, seconds))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_minimal_params() -> Result<(), util::params::LoadError> {
        let params: MowExecParams = util::params::from_str(
            r#"
            home = { lat = 52.0, lon = 4.0 }

            [nav]
            max_speed_mps = 0.8
            "#,
        )?;

        assert_eq!(params.home, GeoPoint::new(52.0, 4.0));
        assert!(params.geofence.is_empty());
        assert_eq!(params.nav.max_speed_mps, 0.8);
        assert_eq!(params.nav.waypoint_tolerance_m, 0.5);
        assert_eq!(params.gps_monitor.max_accuracy_m, 5.0);
        assert_eq!(params.bus.max_records_per_topic, 10_000);
        Ok(())
    }

    #[test]
    fn test_negative_control_period_rejected() -> Result<(), LoadError> {
        let params: MowExecParams = util::params::from_str(
            r#"
            home = { lat = 52.0, lon = 4.0 }

            [nav]
            control_period_s = -0.1
            "#,
        )?;

        assert_eq!(
            params.validate(),
            Err(ParamsError::NotPositive("nav.control_period_s", -0.1))
        );
        Ok(())
    }

    #[test]
    fn test_unusable_values_rejected() {
        let mut params = MowExecParams {
            home: GeoPoint::new(52.0, 4.0),
            geofence: Vec::new(),
            nav: NavParams::default(),
            gps_monitor: GpsMonitorParams::default(),
            bus: BusParams::default(),
            sim: SimParams::default(),
        };
        assert_eq!(params.validate(), Ok(()));

        params.gps_monitor.check_interval_s = f64::INFINITY;
        assert_eq!(
            params.validate(),
            Err(ParamsError::NotPositive(
                "gps_monitor.check_interval_s",
                f64::INFINITY
            ))
        );

        params.gps_monitor = GpsMonitorParams::default();
        params.nav.return_home_speed_pct = 150.0;
        assert!(matches!(
            params.validate(),
            Err(ParamsError::NotPercentage(..))
        ));

        params.nav = NavParams::default();
        params.sim.step_period_s = 0.0;
        assert!(params.validate().is_err());

        params.sim = SimParams::default();
        params.bus.max_records_per_topic = 0;
        assert_eq!(
            params.validate(),
            Err(ParamsError::Zero("bus.max_records_per_topic"))
        );
    }

    #[test]
    fn test_period_conversion() {
        assert_eq!(period("p", 0.25), Ok(Duration::from_millis(250)));
        assert!(period("p", f64::NAN).is_err());
        assert!(period("p", 1e30).is_err());
        assert!(period("p", -1.0).is_err());
    }
}
