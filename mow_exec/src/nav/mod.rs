//! # Navigation
//!
//! The navigation service drives the mower along waypoints while keeping it inside the geofence
//! and within the safety gate.
//!
//! Each control period of [`NavigationService::go_to_waypoint`]:
//!
//! 1. Stops with [`WaypointOutcome::Interrupted`] if the owning mission is no longer running.
//! 2. Refuses motion if the motor gate is disabled, an interlock is set, or the navigation mode
//!    does not allow it.
//! 3. Resolves the position from GPS, falling back to dead reckoning.
//! 4. Checks the geofence.
//! 5. Checks for arrival.
//! 6. Computes wheel speeds from the heading error and commands them.
//!
//! Any drive fault results in a single zero speed command and the waypoint is abandoned.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod controller;
pub mod dead_reckoning;
pub mod drive;
pub mod geo;
pub mod geofence;
pub mod gps_monitor;
pub mod obstacle;
pub mod params;
pub mod path_planner;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use controller::{HeadingController, WheelSpeeds};
pub use dead_reckoning::{DeadReckoning, DrEstimate};
pub use drive::{AlwaysProceed, DriveError, MotorDriver, WeatherAdvice, WeatherAdvisor, WeatherError};
pub use geo::GeoPoint;
pub use geofence::{Geofence, GeofenceError};
pub use gps_monitor::{GpsDegradationMonitor, GpsMonitorError};
pub use obstacle::ObstacleDetector;
pub use params::{DriftParams, GpsMonitorParams, NavParams};
pub use path_planner::{PathPlanner, PlanError};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::tc::mission::{MissionState, MissionStatus};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use util::maths::heading_error_deg;

use crate::params::ParamsError;
use crate::safety::{InterlockActiveError, SafetyGate};
use crate::state::{NavigationMode, RobotStateManager, StateError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct NavigationService {
    state: RobotStateManager,
    safety: SafetyGate,
    driver: Arc<dyn MotorDriver>,
    weather: Option<Arc<dyn WeatherAdvisor>>,
    geofence: Option<Geofence>,
    params: NavParams,

    path: Mutex<Vec<GeoPoint>>,
    home: Mutex<Option<GeoPoint>>,
    dead_reckoning: Mutex<DeadReckoning>,

    controller: HeadingController,
    planner: PathPlanner,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How a waypoint traverse ended without error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaypointOutcome {
    /// Within tolerance of the waypoint
    Arrived,

    /// The owning mission stopped running (paused or aborted)
    Interrupted,
}

#[derive(Debug, Error)]
pub enum NavError {
    #[error("No path has been planned")]
    NoPath,

    #[error("The robot position is unknown")]
    NoPosition,

    #[error("No home position has been set")]
    NoHome,

    #[error("Cannot navigate with active interlocks: {0}")]
    InterlockActive(#[from] InterlockActiveError),

    #[error("Weather advice is to avoid operating")]
    WeatherAvoid,

    #[error("Motion refused by the safety gate: {0}")]
    SafetyBlocked(String),

    #[error("Geofence violated by {distance_m:.2} m")]
    GeofenceViolation { distance_m: f64 },

    #[error("Drive fault: {0}")]
    DriveFault(#[from] DriveError),

    #[error("Invalid state change: {0}")]
    State(#[from] StateError),

    #[error("Cannot plan the path: {0}")]
    Plan(#[from] PlanError),

    #[error("Invalid navigation parameters: {0}")]
    Params(#[from] ParamsError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NavigationService {
    pub fn new(
        state: RobotStateManager,
        safety: SafetyGate,
        driver: Arc<dyn MotorDriver>,
        params: NavParams,
    ) -> Self {
        Self {
            dead_reckoning: Mutex::new(DeadReckoning::new(params.drift)),
            controller: HeadingController::new(&params),
            planner: PathPlanner::new(),
            state,
            safety,
            driver,
            weather: None,
            geofence: None,
            params,
            path: Mutex::new(Vec::new()),
            home: Mutex::new(None),
        }
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherAdvisor>) -> Self {
        self.weather = Some(weather);
        self
    }

    pub fn with_geofence(mut self, geofence: Geofence) -> Self {
        self.geofence = Some(geofence);
        self
    }

    pub fn state(&self) -> &RobotStateManager {
        &self.state
    }

    pub fn safety(&self) -> &SafetyGate {
        &self.safety
    }

    pub fn params(&self) -> &NavParams {
        &self.params
    }

    /// Period of the waypoint control loop.
    pub fn control_period(&self) -> Result<Duration, NavError> {
        Ok(self.params.control_period()?)
    }

    pub fn set_path(&self, path: Vec<GeoPoint>) {
        debug!("New path with {} points", path.len());
        *self.path.lock() = path;
    }

    pub fn current_path(&self) -> Vec<GeoPoint> {
        self.path.lock().clone()
    }

    pub fn set_home(&self, home: GeoPoint) {
        info!("Home set to ({:.7}, {:.7})", home.lat, home.lon);
        *self.home.lock() = Some(home);
    }

    pub fn home(&self) -> Option<GeoPoint> {
        *self.home.lock()
    }

    /// Plan a coverage path and make it the current path.
    ///
    /// Returns the number of points planned.
    pub fn plan_coverage(
        &self,
        boundary: &[GeoPoint],
        exclusions: &[Vec<GeoPoint>],
        spacing_m: f64,
        angle_deg: f64,
    ) -> usize {
        let path = self
            .planner
            .plan_coverage(boundary, exclusions, spacing_m, angle_deg);
        let len = path.len();
        self.set_path(path);
        len
    }

    /// Enter autonomous mode.
    ///
    /// Requires a planned path, a known position and no active interlock. If a weather advisor is
    /// set, advice to avoid operating refuses the request. A failing weather service does not
    /// block.
    pub async fn start_autonomous_navigation(&self) -> Result<(), NavError> {
        if self.path.lock().is_empty() {
            return Err(NavError::NoPath);
        }

        if self.state.get_state().read().position.fix().is_none() {
            return Err(NavError::NoPosition);
        }

        self.safety.validator.assert_safe_to_move()?;

        if let Some(weather) = &self.weather {
            match weather.get_current().await {
                Ok(WeatherAdvice::Avoid) => return Err(NavError::WeatherAvoid),
                Ok(WeatherAdvice::Caution) => warn!("Weather advice is caution, proceeding"),
                Ok(WeatherAdvice::Proceed) => (),
                Err(e) => warn!("Weather unavailable, proceeding: {}", e),
            }
        }

        self.state.set_navigation_mode(NavigationMode::Autonomous)?;
        info!("Autonomous navigation started");
        Ok(())
    }

    /// Drive to a waypoint at a percentage of the maximum speed.
    ///
    /// If `mission_status` is given the traverse is interrupted as soon as that mission is no
    /// longer running.
    pub async fn go_to_waypoint(
        &self,
        target: GeoPoint,
        speed_pct: f64,
        mission_status: Option<&Mutex<MissionStatus>>,
    ) -> Result<WaypointOutcome, NavError> {
        let period = self.control_period()?;
        let forward_mps = speed_pct.clamp(0.0, 100.0) / 100.0 * self.controller.max_speed_mps();
        let mut last_tick = Instant::now();

        debug!(
            "Going to ({:.7}, {:.7}) at {:.0}%",
            target.lat, target.lon, speed_pct
        );

        loop {
            if !mission_running(mission_status) {
                debug!("Mission no longer running, waypoint interrupted");
                self.command_stop().await;
                return Ok(WaypointOutcome::Interrupted);
            }

            if let Some(reason) = self.motion_refusal() {
                self.command_stop().await;

                // A pause changes the mode just after the status, that is not a refusal
                if !mission_running(mission_status) {
                    return Ok(WaypointOutcome::Interrupted);
                }

                warn!("Motion refused: {}", reason);
                return Err(NavError::SafetyBlocked(reason));
            }

            let dt_s = last_tick.elapsed().as_secs_f64();
            last_tick = Instant::now();
            let position = self.resolve_position(dt_s)?;

            if let Some(fence) = &self.geofence {
                let buffer_m = self.safety.triggers.limits().geofence_buffer_meters;
                if !fence.is_safely_inside(&position, buffer_m) {
                    let distance_m = fence.violation_m(&position, buffer_m);
                    self.safety.triggers.trigger_geofence_violation(distance_m);
                    self.command_stop().await;
                    return Err(NavError::GeofenceViolation { distance_m });
                }
            }

            let distance_m = position.distance_m(&target);
            let heading_deg = {
                let state_lock = self.state.get_state();
                let mut state = state_lock.write();
                state.distance_to_waypoint_m = Some(distance_m);
                if self.geofence.is_some() {
                    state.inside_geofence = Some(true);
                }
                state.touch();
                state.heading_deg
            };

            if distance_m <= self.params.waypoint_tolerance_m {
                debug!("Waypoint reached ({:.2} m)", distance_m);
                return Ok(WaypointOutcome::Arrived);
            }

            let error_deg = heading_error_deg(heading_deg, position.bearing_deg(&target));
            let speeds = self.controller.get(error_deg, forward_mps);
            trace!(
                "dist {:.2} m, heading err {:.1} deg, speeds ({:.2}, {:.2})",
                distance_m,
                error_deg,
                speeds.left,
                speeds.right
            );

            if let Err(e) = self.driver.set_speed(speeds.left, speeds.right).await {
                error!("Speed command failed, stopping: {}", e);
                self.command_stop().await;
                return Err(NavError::DriveFault(e));
            }

            tokio::time::sleep(period).await;
        }
    }

    /// Drive the current path from its first point at the given speed.
    ///
    /// Returns the number of points reached.
    pub async fn follow_path(&self, speed_pct: f64) -> Result<usize, NavError> {
        let path = self.current_path();
        if path.is_empty() {
            return Err(NavError::NoPath);
        }

        for (idx, point) in path.iter().enumerate() {
            self.state.get_state().write().current_waypoint_id = Some(idx as u32);
            self.go_to_waypoint(*point, speed_pct, None).await?;
        }

        info!("Path of {} points complete", path.len());
        self.stop().await?;
        Ok(path.len())
    }

    /// Stop the wheels and go idle. An emergency stop stays latched.
    pub async fn stop(&self) -> Result<(), NavError> {
        let result = self.driver.set_speed(0.0, 0.0).await;
        self.leave_motion(NavigationMode::Idle);
        result.map_err(NavError::from)
    }

    /// Stop the wheels and hand over to manual control. An emergency stop stays latched.
    pub async fn pause(&self) -> Result<(), NavError> {
        let result = self.driver.set_speed(0.0, 0.0).await;
        self.leave_motion(NavigationMode::Manual);
        result.map_err(NavError::from)
    }

    pub async fn set_blade(&self, on: bool) -> Result<(), NavError> {
        self.driver.set_blade(on).await?;
        debug!("Blade {}", if on { "on" } else { "off" });
        Ok(())
    }

    /// Drive straight back to the home position, then stop.
    pub async fn return_home(&self) -> Result<(), NavError> {
        let home = self.home().ok_or(NavError::NoHome)?;
        let from = self
            .state
            .get_state()
            .read()
            .position
            .fix()
            .map(GeoPoint::from)
            .ok_or(NavError::NoPosition)?;

        let path =
            self.planner
                .plan_return_path(from, home, self.params.return_path_separation_m)?;

        self.state.set_navigation_mode(NavigationMode::ReturnHome)?;
        info!("Returning home over {} points", path.len());

        // Blade off before leaving the mowing area
        self.set_blade(false).await?;

        for point in path {
            if let Err(e) = self
                .go_to_waypoint(point, self.params.return_home_speed_pct, None)
                .await
            {
                self.command_stop().await;
                return Err(e);
            }
        }

        info!("Arrived home");
        self.stop().await
    }

    /// Why motion is currently not allowed, if it is not.
    fn motion_refusal(&self) -> Option<String> {
        if !self.safety.motor_auth.is_enabled() {
            return Some("motors are not authorized".into());
        }

        if let Err(e) = self.safety.validator.assert_safe_to_move() {
            return Some(e.to_string());
        }

        match self.state.navigation_mode() {
            NavigationMode::Autonomous | NavigationMode::ReturnHome => None,
            mode => Some(format!("navigation mode is {:?}", mode)),
        }
    }

    /// Get the current position from GPS, or from dead reckoning without a fix.
    fn resolve_position(&self, dt_s: f64) -> Result<GeoPoint, NavError> {
        let state_lock = self.state.get_state();
        let mut state = state_lock.write();
        let mut dr = self.dead_reckoning.lock();

        match state.position.fix() {
            Some(fix) => {
                let point = GeoPoint::from(fix);
                dr.set_fix(point);
                if state.dead_reckoning_active {
                    info!("GPS fix regained, dead reckoning off");
                    state.dead_reckoning_active = false;
                    state.touch();
                }
                Ok(point)
            }
            None => {
                dr.update(state.velocity_mps, state.heading_deg, dt_s);
                let estimate = dr.estimate().ok_or(NavError::NoPosition)?;
                if !state.dead_reckoning_active {
                    warn!("GPS fix lost, navigating on dead reckoning");
                    state.dead_reckoning_active = true;
                    state.touch();
                }
                trace!("Dead reckoning drift {:.2} m", estimate.drift_m);
                Ok(estimate.position)
            }
        }
    }

    /// Command zero speed once, logging a failure.
    async fn command_stop(&self) {
        if let Err(e) = self.driver.set_speed(0.0, 0.0).await {
            error!("Zero speed command failed: {}", e);
        }
    }

    fn leave_motion(&self, mode: NavigationMode) {
        match self.state.set_navigation_mode(mode) {
            Ok(()) => debug!("Navigation now {:?}", mode),
            Err(StateError::EmergencyStopLatched(_)) => {
                debug!("Emergency stop latched, staying in EmergencyStop")
            }
            Err(e) => warn!("Could not change mode to {:?}: {}", mode, e),
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// True if there is no owning mission or it is running.
fn mission_running(mission_status: Option<&Mutex<MissionStatus>>) -> bool {
    mission_status
        .map(|s| s.lock().status == MissionState::Running)
        .unwrap_or(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::safety::SafetyLimits;
    use async_trait::async_trait;

    /// Records commands, fails when asked to.
    #[derive(Default)]
    struct RecordingDriver {
        commands: Mutex<Vec<(f64, f64)>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl MotorDriver for RecordingDriver {
        async fn set_speed(&self, left: f64, right: f64) -> Result<(), DriveError> {
            self.commands.lock().push((left, right));
            if *self.fail.lock() {
                Err(DriveError::NotResponding)
            } else {
                Ok(())
            }
        }

        async fn set_blade(&self, _on: bool) -> Result<(), DriveError> {
            Ok(())
        }
    }

    struct AvoidWeather;

    #[async_trait]
    impl WeatherAdvisor for AvoidWeather {
        async fn get_current(&self) -> Result<WeatherAdvice, WeatherError> {
            Ok(WeatherAdvice::Avoid)
        }
    }

    struct BrokenWeather;

    #[async_trait]
    impl WeatherAdvisor for BrokenWeather {
        async fn get_current(&self) -> Result<WeatherAdvice, WeatherError> {
            Err(WeatherError::Unavailable("offline".into()))
        }
    }

    fn service(driver: Arc<RecordingDriver>) -> NavigationService {
        let state = RobotStateManager::new();
        {
            let s = state.get_state();
            let mut s = s.write();
            s.position.latitude = Some(52.0);
            s.position.longitude = Some(4.0);
            s.position.accuracy_m = Some(0.5);
        }
        let gate = SafetyGate::new(state.clone(), SafetyLimits::default(), None);
        gate.motor_auth.authorize();

        let params = NavParams {
            control_period_s: 0.005,
            ..Default::default()
        };
        NavigationService::new(state, gate, driver, params)
    }

    #[tokio::test]
    async fn test_autonomous_preconditions() -> Result<(), NavError> {
        let nav = service(Arc::new(RecordingDriver::default()));

        assert!(matches!(
            nav.start_autonomous_navigation().await,
            Err(NavError::NoPath)
        ));

        nav.set_path(vec![GeoPoint::new(52.0, 4.0001)]);

        nav.safety().validator.set_interlock("tilt_detected", true);
        assert!(matches!(
            nav.start_autonomous_navigation().await,
            Err(NavError::InterlockActive(_))
        ));
        nav.safety().validator.set_interlock("tilt_detected", false);

        nav.start_autonomous_navigation().await?;
        assert_eq!(nav.state().navigation_mode(), NavigationMode::Autonomous);
        Ok(())
    }

    #[tokio::test]
    async fn test_weather() -> Result<(), NavError> {
        let nav = service(Arc::new(RecordingDriver::default())).with_weather(Arc::new(AvoidWeather));
        nav.set_path(vec![GeoPoint::new(52.0, 4.0001)]);
        assert!(matches!(
            nav.start_autonomous_navigation().await,
            Err(NavError::WeatherAvoid)
        ));

        // A broken weather service does not block
        let nav = service(Arc::new(RecordingDriver::default())).with_weather(Arc::new(BrokenWeather));
        nav.set_path(vec![GeoPoint::new(52.0, 4.0001)]);
        nav.start_autonomous_navigation().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_blocked_when_not_autonomous() {
        let driver = Arc::new(RecordingDriver::default());
        let nav = service(driver.clone());

        let result = nav
            .go_to_waypoint(GeoPoint::new(52.0, 4.001), 50.0, None)
            .await;
        assert!(matches!(result, Err(NavError::SafetyBlocked(_))));

        // Only the zero speed command was sent
        assert_eq!(*driver.commands.lock(), vec![(0.0, 0.0)]);
    }

    #[tokio::test]
    async fn test_arrival_within_tolerance() -> Result<(), NavError> {
        let nav = service(Arc::new(RecordingDriver::default()));
        nav.set_path(vec![GeoPoint::new(52.0, 4.0)]);
        nav.start_autonomous_navigation().await?;

        let target = GeoPoint::new(52.0, 4.0).offset(0.3, 0.0);
        assert_eq!(
            nav.go_to_waypoint(target, 50.0, None).await?,
            WaypointOutcome::Arrived
        );
        let d = nav.state().snapshot().distance_to_waypoint_m.unwrap();
        assert!((d - 0.3).abs() < 1e-3);
        Ok(())
    }

    #[tokio::test]
    async fn test_drive_fault_stops_once() -> Result<(), NavError> {
        let driver = Arc::new(RecordingDriver::default());
        let nav = service(driver.clone());
        nav.set_path(vec![GeoPoint::new(52.0, 4.0)]);
        nav.start_autonomous_navigation().await?;
        *driver.fail.lock() = true;

        let result = nav
            .go_to_waypoint(GeoPoint::new(52.0, 4.001), 50.0, None)
            .await;
        assert!(matches!(result, Err(NavError::DriveFault(_))));

        let commands = driver.commands.lock();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1], (0.0, 0.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_interrupted_by_mission_status() -> Result<(), NavError> {
        let driver = Arc::new(RecordingDriver::default());
        let nav = service(driver.clone());
        nav.set_path(vec![GeoPoint::new(52.0, 4.0)]);
        nav.start_autonomous_navigation().await?;

        let mut status = MissionStatus::idle("m");
        status.status = MissionState::Paused;
        let status = Mutex::new(status);

        assert_eq!(
            nav.go_to_waypoint(GeoPoint::new(52.0, 4.001), 50.0, Some(&status))
                .await?,
            WaypointOutcome::Interrupted
        );
        assert_eq!(*driver.commands.lock(), vec![(0.0, 0.0)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_geofence_violation() -> Result<(), NavError> {
        let driver = Arc::new(RecordingDriver::default());
        let origin = GeoPoint::new(52.0, 4.0);

        // Robot sits 0.5 m inside the west edge, inside the 1 m buffer
        let fence = Geofence::new(vec![
            origin.offset(-0.5, -10.0),
            origin.offset(20.0, -10.0),
            origin.offset(20.0, 10.0),
            origin.offset(-0.5, 10.0),
        ])
        .unwrap();
        let nav = service(driver.clone()).with_geofence(fence);
        nav.set_path(vec![origin]);
        nav.start_autonomous_navigation().await?;

        let result = nav.go_to_waypoint(origin.offset(10.0, 0.0), 50.0, None).await;
        match result {
            Err(NavError::GeofenceViolation { distance_m }) => {
                assert!((distance_m - 0.5).abs() < 1e-2)
            }
            other => panic!("Expected a geofence violation, got {:?}", other),
        }

        let snap = nav.state().snapshot();
        assert_eq!(snap.inside_geofence, Some(false));
        assert!(nav.safety().validator.assert_safe_to_move().is_err());
        assert_eq!(*driver.commands.lock(), vec![(0.0, 0.0)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_dead_reckoning_fallback() -> Result<(), NavError> {
        let nav = service(Arc::new(RecordingDriver::default()));
        nav.set_path(vec![GeoPoint::new(52.0, 4.0)]);
        nav.start_autonomous_navigation().await?;

        // Establish the reference fix
        let here = GeoPoint::new(52.0, 4.0);
        nav.go_to_waypoint(here, 50.0, None).await?;

        {
            let s = nav.state().get_state();
            let mut s = s.write();
            s.position.latitude = None;
            s.position.longitude = None;
        }

        assert_eq!(
            nav.go_to_waypoint(here, 50.0, None).await?,
            WaypointOutcome::Arrived
        );
        assert!(nav.state().snapshot().dead_reckoning_active);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_keeps_estop_latched() -> Result<(), NavError> {
        let nav = service(Arc::new(RecordingDriver::default()));
        nav.state().get_state().write().enter_emergency_stop();

        nav.stop().await?;
        assert_eq!(nav.state().navigation_mode(), NavigationMode::EmergencyStop);

        nav.state().reset_emergency_stop();
        nav.pause().await?;
        assert_eq!(nav.state().navigation_mode(), NavigationMode::Manual);
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_control_period_refused() {
        let driver = Arc::new(RecordingDriver::default());
        let mut nav = service(driver.clone());
        nav.params.control_period_s = -0.1;

        nav.set_path(vec![GeoPoint::new(52.0, 4.0001)]);
        nav.start_autonomous_navigation().await.unwrap();

        let result = nav
            .go_to_waypoint(GeoPoint::new(52.0, 4.0001), 50.0, None)
            .await;
        assert!(matches!(
            result,
            Err(NavError::Params(ParamsError::NotPositive(
                "nav.control_period_s",
                _
            )))
        ));
        assert!(driver.commands.lock().is_empty());
    }
}
