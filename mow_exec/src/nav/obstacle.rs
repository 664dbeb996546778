//! # Obstacle detector
//!
//! Takes time of flight range scans and raises or clears the obstacle interlock.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::trace;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::safety::SafetyTriggerManager;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct ObstacleDetector {
    triggers: Arc<SafetyTriggerManager>,
    latest_min_range: Mutex<Option<f64>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ObstacleDetector {
    pub fn new(triggers: Arc<SafetyTriggerManager>) -> Self {
        Self {
            triggers,
            latest_min_range: Mutex::new(None),
        }
    }

    /// Process one scan of ranges in meters.
    ///
    /// Non finite and negative ranges are ignored. Returns true if an obstacle is within the
    /// configured distance.
    pub fn process_ranges(&self, ranges_m: &[f64]) -> bool {
        let min = ranges_m
            .iter()
            .copied()
            .filter(|r| r.is_finite() && *r >= 0.0)
            .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.min(r))));

        *self.latest_min_range.lock() = min;

        match min {
            Some(range) => {
                trace!("ToF minimum range {:.3} m", range);
                self.triggers.evaluate_obstacle(range)
            }
            None => false,
        }
    }

    /// The minimum range of the last scan, `None` if it had no valid ranges.
    pub fn latest_min_range(&self) -> Option<f64> {
        *self.latest_min_range.lock()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::safety::{EstopHandler, InterlockValidator, MotorAuthorization, SafetyLimits};
    use crate::state::{InterlockType, RobotStateManager};

    #[test]
    fn test_obstacle_raised_and_cleared() {
        let state = RobotStateManager::new();
        let validator = Arc::new(InterlockValidator::new());
        let estop = Arc::new(EstopHandler::new(Arc::new(MotorAuthorization::new())));
        let triggers = Arc::new(SafetyTriggerManager::new(
            state.clone(),
            validator.clone(),
            estop,
            SafetyLimits::default(),
        ));
        let detector = ObstacleDetector::new(triggers);

        assert!(!detector.process_ranges(&[2.0, f64::NAN, 1.5]));
        assert_eq!(detector.latest_min_range(), Some(1.5));
        assert!(!validator.is_any_active());

        assert!(detector.process_ranges(&[2.0, 0.2, -1.0]));
        assert_eq!(
            state.snapshot().active_interlock_types(),
            vec![InterlockType::ObstacleDetected]
        );

        // Clearing leaves the entry pending acknowledgement
        assert!(!detector.process_ranges(&[1.0]));
        assert!(!validator.is_any_active());
        assert!(!state.snapshot().has_active_interlock());

        assert!(!detector.process_ranges(&[]));
        assert_eq!(detector.latest_min_range(), None);
    }
}
