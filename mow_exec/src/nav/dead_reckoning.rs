//! # Dead reckoning
//!
//! Estimates the position from the last GPS fix plus the displacement integrated from velocity and
//! heading since then. The estimate's drift grows with the distance travelled and the time since
//! the fix.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::Serialize;
use std::time::Instant;

use super::{params::DriftParams, GeoPoint};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeadReckoning {
    params: DriftParams,

    /// Last GPS fix and when it was received
    reference: Option<(GeoPoint, Instant)>,

    /// East/north displacement since the fix in meters
    displacement_m: Vector2<f64>,

    /// Path length travelled since the fix
    distance_m: f64,
}

/// A dead reckoning position estimate.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DrEstimate {
    pub position: GeoPoint,

    /// Expected position error in meters
    pub drift_m: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DeadReckoning {
    pub fn new(params: DriftParams) -> Self {
        Self {
            params,
            reference: None,
            displacement_m: Vector2::zeros(),
            distance_m: 0.0,
        }
    }

    /// Reset the estimate onto a new GPS fix.
    pub fn set_fix(&mut self, fix: GeoPoint) {
        self.reference = Some((fix, Instant::now()));
        self.displacement_m = Vector2::zeros();
        self.distance_m = 0.0;
    }

    pub fn has_fix(&self) -> bool {
        self.reference.is_some()
    }

    /// Integrate motion at `velocity_mps` along compass `heading_deg` for `dt_s` seconds.
    pub fn update(&mut self, velocity_mps: f64, heading_deg: f64, dt_s: f64) {
        if self.reference.is_none() || dt_s <= 0.0 {
            return;
        }

        let heading_rad = heading_deg.to_radians();
        let step = velocity_mps * dt_s;

        // Compass heading: x is east, y is north
        self.displacement_m += Vector2::new(heading_rad.sin(), heading_rad.cos()) * step;
        self.distance_m += step.abs();
    }

    /// Current estimate, `None` before the first fix.
    pub fn estimate(&self) -> Option<DrEstimate> {
        let (fix, fix_time) = self.reference?;

        let position = fix.offset(self.displacement_m.x, self.displacement_m.y);
        let drift_m = self.params.base_m
            + self.params.per_meter * self.distance_m
            + self.params.per_second * fix_time.elapsed().as_secs_f64();

        Some(DrEstimate { position, drift_m })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn params() -> DriftParams {
        DriftParams {
            base_m: 0.5,
            per_meter: 0.1,
            per_second: 0.0,
        }
    }

    #[test]
    fn test_no_estimate_without_fix() {
        let mut dr = DeadReckoning::new(params());
        dr.update(1.0, 0.0, 1.0);
        assert!(dr.estimate().is_none());
    }

    #[test]
    fn test_integrates_displacement() {
        let origin = GeoPoint::new(52.0, 4.0);
        let mut dr = DeadReckoning::new(params());
        dr.set_fix(origin);

        // 10 m north then 10 m east
        for _ in 0..10 {
            dr.update(1.0, 0.0, 1.0);
        }
        for _ in 0..10 {
            dr.update(1.0, 90.0, 1.0);
        }

        let est = dr.estimate().unwrap();
        let (e, n) = origin.enu_to(&est.position);
        assert!((e - 10.0).abs() < 1e-2);
        assert!((n - 10.0).abs() < 1e-2);
        assert!((est.drift_m - 2.5).abs() < 1e-9);

        // A new fix resets the drift
        dr.set_fix(est.position);
        assert!((dr.estimate().unwrap().drift_m - 0.5).abs() < 1e-9);
    }
}
