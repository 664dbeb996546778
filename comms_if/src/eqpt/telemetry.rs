//! # Telemetry
//!
//! Telemetry is the sensor payload ingested by the robot state. Every group and every leaf field
//! is optional: a missing field means "no data", never a default value.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

/// A single telemetry sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    pub position: Option<PositionTm>,
    pub battery: Option<BatteryTm>,
    pub imu: Option<ImuTm>,
}

/// GNSS position telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionTm {
    /// Latitude in degrees
    pub latitude: Option<f64>,

    /// Longitude in degrees
    pub longitude: Option<f64>,

    /// Altitude in meters
    pub altitude: Option<f64>,

    /// Horizontal accuracy of the fix in meters
    pub accuracy: Option<f64>,
}

/// Battery telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryTm {
    pub percentage: Option<f64>,
    pub voltage: Option<f64>,
}

/// Inertial telemetry, all angles in degrees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuTm {
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_missing_keys_are_none() -> Result<(), serde_json::Error> {
        let tm: Telemetry = serde_json::from_str(
            r#"{"position": {"latitude": 51.5, "longitude": -0.1}, "imu": {"roll": 2.0}}"#,
        )?;

        let pos = tm.position.unwrap_or_default();
        assert_eq!(pos.latitude, Some(51.5));
        assert_eq!(pos.altitude, None);
        assert_eq!(pos.accuracy, None);

        assert!(tm.battery.is_none());
        assert_eq!(tm.imu.and_then(|i| i.pitch), None);

        let empty: Telemetry = serde_json::from_str("{}")?;
        assert_eq!(empty, Telemetry::default());

        Ok(())
    }
}
