//! # Robot state
//!
//! The [`RobotState`] is the single piece of shared mutable state in the mower core. It is owned by
//! the [`RobotStateManager`], every other component holds a handle obtained from
//! [`RobotStateManager::get_state`] and never keeps its own copy as a source of truth.
//!
//! ## Emergency stop discipline
//!
//! All writes to the navigation mode go through [`RobotState::set_navigation_mode`], which is only
//! callable while the state's write lock is held. It refuses to leave
//! [`NavigationMode::EmergencyStop`], so an emergency transition always wins over a concurrent
//! non-emergency write. The latch is only released by [`RobotState::reset_emergency_stop`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod interlock;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::telemetry::Telemetry;
use conquer_once::Lazy;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub use interlock::{InterlockError, InterlockState, InterlockType, SafetyInterlock};

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static GLOBAL_STATE: Lazy<RobotStateManager> = Lazy::new(RobotStateManager::new);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Position of the robot, every field is unknown until the first fix.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Position {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_m: Option<f64>,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Orientation {
    pub roll_deg: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub yaw_deg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatteryState {
    pub percentage: Option<f64>,
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
}

/// Snapshot of everything the core knows about the robot.
#[derive(Debug, Clone, Serialize)]
pub struct RobotState {
    pub position: Position,
    pub orientation: Orientation,

    /// Compass heading, 0 is north and 90 is east
    pub heading_deg: f64,
    pub velocity_mps: f64,
    pub angular_velocity_dps: f64,

    navigation_mode: NavigationMode,

    /// Interlocks in the order they were triggered
    pub active_interlocks: Vec<SafetyInterlock>,

    pub battery: BatteryState,

    pub current_waypoint_id: Option<u32>,
    pub distance_to_waypoint_m: Option<f64>,
    pub inside_geofence: Option<bool>,

    /// True while the position comes from dead reckoning rather than GPS
    pub dead_reckoning_active: bool,

    /// When a GPS fix was last written, not moved by other updates
    pub last_fix_at: Option<DateTime<Utc>>,

    pub last_updated: DateTime<Utc>,
}

/// Owner of the shared robot state.
///
/// Cloning the manager clones the handle, not the state.
#[derive(Debug, Clone)]
pub struct RobotStateManager {
    state: Arc<RwLock<RobotState>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationMode {
    Idle,
    Manual,
    Autonomous,
    EmergencyStop,
    ReturnHome,
}

#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("Latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("Longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("Position accuracy {0} m is negative")]
    NegativeAccuracy(f64),

    #[error("Battery percentage {0} is outside [0, 100]")]
    BatteryPercentageOutOfRange(f64),

    #[error("Cannot switch to {0:?}, the emergency stop is latched")]
    EmergencyStopLatched(NavigationMode),

    #[error("There is no {1:?} {0} interlock")]
    NoSuchInterlock(InterlockType, InterlockState),

    #[error(transparent)]
    Interlock(#[from] InterlockError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Position {
    /// Build a validated position.
    pub fn new(
        latitude: Option<f64>,
        longitude: Option<f64>,
        altitude_m: Option<f64>,
        accuracy_m: Option<f64>,
    ) -> Result<Self, StateError> {
        if let Some(lat) = latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(StateError::LatitudeOutOfRange(lat));
            }
        }
        if let Some(lon) = longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(StateError::LongitudeOutOfRange(lon));
            }
        }
        if let Some(acc) = accuracy_m {
            if acc < 0.0 || acc.is_nan() {
                return Err(StateError::NegativeAccuracy(acc));
            }
        }

        Ok(Self {
            latitude,
            longitude,
            altitude_m,
            accuracy_m,
        })
    }

    /// The (latitude, longitude) pair, if both are known.
    pub fn fix(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

impl BatteryState {
    pub fn new(
        percentage: Option<f64>,
        voltage_v: Option<f64>,
        current_a: Option<f64>,
    ) -> Result<Self, StateError> {
        if let Some(pc) = percentage {
            if !(0.0..=100.0).contains(&pc) {
                return Err(StateError::BatteryPercentageOutOfRange(pc));
            }
        }

        Ok(Self {
            percentage,
            voltage_v,
            current_a,
        })
    }
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            position: Position::default(),
            orientation: Orientation::default(),
            heading_deg: 0.0,
            velocity_mps: 0.0,
            angular_velocity_dps: 0.0,
            navigation_mode: NavigationMode::Idle,
            active_interlocks: Vec::new(),
            battery: BatteryState::default(),
            current_waypoint_id: None,
            distance_to_waypoint_m: None,
            inside_geofence: None,
            dead_reckoning_active: false,
            last_fix_at: None,
            last_updated: Utc::now(),
        }
    }
}

impl RobotState {
    /// Refresh the last updated timestamp, call after every mutation.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Record that the position was just written from a GPS fix.
    pub fn mark_fix(&mut self) {
        let now = Utc::now();
        self.last_fix_at = Some(now);
        self.last_updated = now;
    }

    /// Age of the GPS fix, falling back to the last update when no fix was ever recorded.
    pub fn fix_age(&self) -> chrono::Duration {
        Utc::now() - self.last_fix_at.unwrap_or(self.last_updated)
    }

    pub fn navigation_mode(&self) -> NavigationMode {
        self.navigation_mode
    }

    /// Request a navigation mode change.
    ///
    /// Entering `EmergencyStop` always succeeds. Leaving it is refused with
    /// [`StateError::EmergencyStopLatched`], use [`RobotState::reset_emergency_stop`].
    pub fn set_navigation_mode(&mut self, mode: NavigationMode) -> Result<(), StateError> {
        if self.navigation_mode == NavigationMode::EmergencyStop
            && mode != NavigationMode::EmergencyStop
        {
            return Err(StateError::EmergencyStopLatched(mode));
        }

        if self.navigation_mode != mode {
            debug!("Navigation mode {:?} -> {:?}", self.navigation_mode, mode);
        }

        self.navigation_mode = mode;
        self.touch();
        Ok(())
    }

    /// Latch the emergency stop.
    pub fn enter_emergency_stop(&mut self) {
        self.navigation_mode = NavigationMode::EmergencyStop;
        self.touch();
    }

    /// Release the emergency stop latch, returning to `Idle`.
    ///
    /// Returns false if the latch was not set.
    pub fn reset_emergency_stop(&mut self) -> bool {
        if self.navigation_mode != NavigationMode::EmergencyStop {
            return false;
        }

        self.navigation_mode = NavigationMode::Idle;
        self.touch();
        true
    }

    /// Find the interlock entry of the given type which has not yet been acknowledged.
    pub fn interlock(&self, interlock_type: InterlockType) -> Option<&SafetyInterlock> {
        self.active_interlocks
            .iter()
            .find(|i| i.interlock_type == interlock_type)
    }

    /// True if any interlock entry is still active.
    pub fn has_active_interlock(&self) -> bool {
        self.active_interlocks.iter().any(|i| i.is_active())
    }

    /// Types of the interlocks which are still active, in trigger order.
    pub fn active_interlock_types(&self) -> Vec<InterlockType> {
        self.active_interlocks
            .iter()
            .filter(|i| i.is_active())
            .map(|i| i.interlock_type)
            .collect()
    }

    /// Activate an interlock of the given type.
    ///
    /// An active entry of the same type only has its trigger value updated, so there is at most one
    /// entry per type. An entry still pending acknowledgement is replaced by the new trigger.
    ///
    /// Returns true if a new entry was added.
    pub fn activate_interlock(
        &mut self,
        interlock_type: InterlockType,
        trigger_value: Option<f64>,
        description: &str,
    ) -> bool {
        let existing = self
            .active_interlocks
            .iter()
            .position(|i| i.interlock_type == interlock_type);

        let added = match existing {
            Some(idx) if self.active_interlocks[idx].is_active() => {
                self.active_interlocks[idx].trigger_value = trigger_value;
                false
            }
            Some(idx) => {
                self.active_interlocks.remove(idx);
                self.active_interlocks.push(SafetyInterlock::new(
                    interlock_type,
                    trigger_value,
                    description,
                ));
                true
            }
            None => {
                self.active_interlocks.push(SafetyInterlock::new(
                    interlock_type,
                    trigger_value,
                    description,
                ));
                true
            }
        };

        self.touch();
        added
    }

    /// Clear the active interlock of the given type, leaving it pending acknowledgement.
    pub fn clear_interlock(&mut self, interlock_type: InterlockType) -> Result<(), StateError> {
        let il = self
            .active_interlocks
            .iter_mut()
            .find(|i| i.interlock_type == interlock_type && i.is_active())
            .ok_or(StateError::NoSuchInterlock(
                interlock_type,
                InterlockState::Active,
            ))?;

        il.clear()?;
        self.touch();
        Ok(())
    }

    /// Acknowledge a cleared interlock, removing it from the active list.
    ///
    /// The acknowledged record is returned for auditing.
    pub fn acknowledge_interlock(
        &mut self,
        interlock_type: InterlockType,
    ) -> Result<SafetyInterlock, StateError> {
        let idx = self
            .active_interlocks
            .iter()
            .position(|i| {
                i.interlock_type == interlock_type && i.state == InterlockState::ClearedPendingAck
            })
            .ok_or(StateError::NoSuchInterlock(
                interlock_type,
                InterlockState::ClearedPendingAck,
            ))?;

        self.active_interlocks[idx].acknowledge()?;
        let record = self.active_interlocks.remove(idx);
        self.touch();
        Ok(record)
    }

    /// Overwrite position, battery and orientation from a telemetry sample.
    ///
    /// Missing telemetry fields become `None`. The sample is fully validated before anything is
    /// written, a rejected sample leaves the state untouched.
    pub fn update_from_telemetry(&mut self, tm: &Telemetry) -> Result<(), StateError> {
        let pos_tm = tm.position.clone().unwrap_or_default();
        let position = Position::new(
            pos_tm.latitude,
            pos_tm.longitude,
            pos_tm.altitude,
            pos_tm.accuracy,
        )?;

        let batt_tm = tm.battery.clone().unwrap_or_default();
        let battery = BatteryState::new(batt_tm.percentage, batt_tm.voltage, None)?;

        let imu_tm = tm.imu.clone().unwrap_or_default();
        let orientation = Orientation {
            roll_deg: imu_tm.roll,
            pitch_deg: imu_tm.pitch,
            yaw_deg: imu_tm.yaw,
        };

        let has_fix = position.fix().is_some();
        self.position = position;
        self.battery = battery;
        self.orientation = orientation;

        if has_fix {
            self.mark_fix();
        } else {
            self.touch();
        }

        Ok(())
    }
}

impl RobotStateManager {
    /// Create a manager owning a fresh default state.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RobotState::default())),
        }
    }

    /// The process wide manager, constructed on first access.
    pub fn global() -> &'static RobotStateManager {
        &GLOBAL_STATE
    }

    /// Get the live shared state handle.
    pub fn get_state(&self) -> Arc<RwLock<RobotState>> {
        self.state.clone()
    }

    /// Ingest a telemetry sample.
    pub fn update_from_telemetry(&self, tm: &Telemetry) -> Result<(), StateError> {
        let result = self.state.write().update_from_telemetry(tm);
        if let Err(ref e) = result {
            warn!("Rejected telemetry sample: {}", e);
        }
        result
    }

    /// Copy of the current state for diagnostics.
    pub fn snapshot(&self) -> RobotState {
        self.state.read().clone()
    }

    pub fn navigation_mode(&self) -> NavigationMode {
        self.state.read().navigation_mode()
    }

    pub fn set_navigation_mode(&self, mode: NavigationMode) -> Result<(), StateError> {
        self.state.write().set_navigation_mode(mode)
    }

    pub fn reset_emergency_stop(&self) -> bool {
        self.state.write().reset_emergency_stop()
    }
}

impl Default for RobotStateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::telemetry::{BatteryTm, ImuTm, PositionTm};

    fn telemetry(lat: f64, lon: f64, pc: f64) -> Telemetry {
        Telemetry {
            position: Some(PositionTm {
                latitude: Some(lat),
                longitude: Some(lon),
                altitude: None,
                accuracy: Some(1.2),
            }),
            battery: Some(BatteryTm {
                percentage: Some(pc),
                voltage: Some(25.1),
            }),
            imu: Some(ImuTm {
                roll: Some(1.0),
                pitch: None,
                yaw: Some(90.0),
            }),
        }
    }

    #[test]
    fn test_get_state_is_live() {
        let mgr = RobotStateManager::new();
        let handle = mgr.get_state();

        handle.write().velocity_mps = 0.4;
        assert_eq!(mgr.get_state().read().velocity_mps, 0.4);

        // The global manager is a single instance
        assert!(Arc::ptr_eq(
            &RobotStateManager::global().get_state(),
            &RobotStateManager::global().get_state()
        ));
    }

    #[test]
    fn test_update_from_telemetry() -> Result<(), StateError> {
        let mgr = RobotStateManager::new();
        let before = mgr.snapshot().last_updated;

        mgr.update_from_telemetry(&telemetry(51.5, -0.1, 80.0))?;

        let state = mgr.snapshot();
        assert_eq!(state.position.fix(), Some((51.5, -0.1)));
        assert_eq!(state.position.altitude_m, None);
        assert_eq!(state.battery.percentage, Some(80.0));
        assert_eq!(state.orientation.pitch_deg, None);
        assert!(state.last_updated >= before);

        let fix_at = state.last_fix_at.expect("fix time recorded");
        assert!(fix_at >= before);

        // Missing groups overwrite with nothing, and are not a new fix
        mgr.update_from_telemetry(&Telemetry::default())?;
        assert_eq!(mgr.snapshot().position, Position::default());
        assert_eq!(mgr.snapshot().last_fix_at, Some(fix_at));

        Ok(())
    }

    #[test]
    fn test_telemetry_rejected_not_clamped() {
        let mgr = RobotStateManager::new();

        assert_eq!(
            mgr.update_from_telemetry(&telemetry(91.0, 0.0, 50.0)),
            Err(StateError::LatitudeOutOfRange(91.0))
        );
        assert_eq!(
            mgr.update_from_telemetry(&telemetry(0.0, -180.5, 50.0)),
            Err(StateError::LongitudeOutOfRange(-180.5))
        );
        assert_eq!(
            mgr.update_from_telemetry(&telemetry(0.0, 0.0, 101.0)),
            Err(StateError::BatteryPercentageOutOfRange(101.0))
        );

        // Nothing was written
        assert_eq!(mgr.snapshot().position, Position::default());
    }

    #[test]
    fn test_emergency_stop_latch() -> Result<(), StateError> {
        let mgr = RobotStateManager::new();
        mgr.set_navigation_mode(NavigationMode::Autonomous)?;

        mgr.get_state().write().enter_emergency_stop();

        assert_eq!(
            mgr.set_navigation_mode(NavigationMode::Autonomous),
            Err(StateError::EmergencyStopLatched(NavigationMode::Autonomous))
        );
        assert_eq!(mgr.navigation_mode(), NavigationMode::EmergencyStop);

        assert!(mgr.reset_emergency_stop());
        assert_eq!(mgr.navigation_mode(), NavigationMode::Idle);
        assert!(!mgr.reset_emergency_stop());

        mgr.set_navigation_mode(NavigationMode::Manual)
    }

    #[test]
    fn test_interlock_entries() -> Result<(), StateError> {
        let mut state = RobotState::default();

        assert!(state.activate_interlock(InterlockType::TiltDetected, Some(31.0), "tilt"));
        assert!(state.activate_interlock(InterlockType::ObstacleDetected, Some(0.2), "obstacle"));
        assert!(!state.activate_interlock(InterlockType::TiltDetected, Some(40.0), "tilt"));

        assert_eq!(state.active_interlocks.len(), 2);
        assert_eq!(
            state.interlock(InterlockType::TiltDetected).and_then(|i| i.trigger_value),
            Some(40.0)
        );

        state.clear_interlock(InterlockType::TiltDetected)?;
        assert_eq!(
            state.active_interlock_types(),
            vec![InterlockType::ObstacleDetected]
        );

        let record = state.acknowledge_interlock(InterlockType::TiltDetected)?;
        assert_eq!(record.state, InterlockState::Acknowledged);
        assert_eq!(state.active_interlocks.len(), 1);

        assert!(matches!(
            state.acknowledge_interlock(InterlockType::ObstacleDetected),
            Err(StateError::NoSuchInterlock(_, InterlockState::ClearedPendingAck))
        ));

        Ok(())
    }
}
