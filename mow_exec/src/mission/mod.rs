//! # Mission service
//!
//! Runs missions, ordered lists of waypoints, on top of the navigation service.
//!
//! A started mission executes as a spawned task, watched by a supervisor task which records how it
//! ended:
//!
//! - `completed` when every waypoint was reached,
//! - `failed` when navigation returned an error,
//! - `aborted` when the mission was aborted.
//!
//! Pausing only changes the mission status, the execution task notices it through
//! [`NavigationService::go_to_waypoint`] and waits. Resuming continues towards the same waypoint.
//!
//! Aborting marks the status, cancels the execution task and waits for it to terminate before
//! commanding zero speed, so no motion command can follow the abort.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::Utc;
use comms_if::tc::mission::{Mission, MissionState, MissionStatus, MissionWaypoint};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};

use crate::bus::MessageBus;
use crate::nav::{GeoPoint, NavError, NavigationService, WaypointOutcome};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Topic on which mission status changes are announced.
pub const MISSION_STATUS_TOPIC: &str = "mission.status";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct MissionService {
    nav: Arc<NavigationService>,
    bus: Option<Arc<MessageBus>>,

    /// Missions in creation order
    missions: Mutex<Vec<Mission>>,
    statuses: Mutex<HashMap<String, Arc<Mutex<MissionStatus>>>>,

    active: Mutex<Option<ActiveMission>>,
}

/// The mission holding the single execution slot.
struct ActiveMission {
    mission_id: String,

    /// `None` while the mission is still starting
    tasks: Option<MissionTasks>,
}

struct MissionTasks {
    execution: AbortHandle,
    supervisor: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MissionError {
    #[error("No mission with ID {0}")]
    NotFound(String),

    #[error("Mission {0} is not running")]
    NotRunning(String),

    #[error("Mission {0} is not paused")]
    NotPaused(String),

    #[error("Mission {0} is already in progress")]
    AlreadyActive(String),

    #[error("Waypoint {id} is invalid: {reason}")]
    InvalidWaypoint { id: u32, reason: String },

    #[error("A mission needs at least one waypoint")]
    EmptyMission,

    #[error("Navigation error: {0}")]
    Navigation(#[from] NavError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MissionService {
    pub fn new(nav: Arc<NavigationService>) -> Self {
        Self {
            nav,
            bus: None,
            missions: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        }
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Create a mission from its waypoints. The mission starts `idle`.
    pub fn create_mission(
        &self,
        name: &str,
        waypoints: Vec<MissionWaypoint>,
    ) -> Result<Mission, MissionError> {
        if waypoints.is_empty() {
            return Err(MissionError::EmptyMission);
        }
        for wp in &waypoints {
            validate_waypoint(wp)?;
        }

        let mission = Mission {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            waypoints,
            created_at: Utc::now(),
        };

        self.statuses.lock().insert(
            mission.id.clone(),
            Arc::new(Mutex::new(MissionStatus::idle(&mission.id))),
        );
        self.missions.lock().push(mission.clone());

        info!(
            "Mission \"{}\" created ({}, {} waypoints)",
            mission.name,
            mission.id,
            mission.waypoints.len()
        );
        Ok(mission)
    }

    /// Start executing a mission.
    ///
    /// Only one mission can be in progress at a time, a mission counts as in progress from the
    /// moment its start is accepted. A mission which has ended can be started again from its first
    /// waypoint.
    pub async fn start_mission(&self, mission_id: &str) -> Result<MissionStatus, MissionError> {
        let mission = self.mission(mission_id)?;
        let status = self.status_handle(mission_id)?;

        if let Some(previous) = self.reserve(mission_id)? {
            // The previous mission has ended, let its supervisor issue its last commands first
            if let Err(e) = previous.supervisor.await {
                error!("Mission supervisor ended abnormally: {}", e);
            }
        }

        match self.launch(mission, status).await {
            Ok(snapshot) => {
                info!("Mission {} started", mission_id);
                Ok(snapshot)
            }
            Err(e) => {
                let mut active = self.active.lock();
                let still_reserved = active
                    .as_ref()
                    .map(|a| a.mission_id == mission_id && a.tasks.is_none())
                    .unwrap_or(false);
                if still_reserved {
                    *active = None;
                }
                Err(e)
            }
        }
    }

    /// Pause a running mission, stopping the wheels.
    pub async fn pause_mission(&self, mission_id: &str) -> Result<MissionStatus, MissionError> {
        let status = self.status_handle(mission_id)?;

        let snapshot = {
            let mut s = status.lock();
            if s.status != MissionState::Running {
                return Err(MissionError::NotRunning(mission_id.to_string()));
            }
            s.status = MissionState::Paused;
            s.clone()
        };

        self.nav.pause().await?;
        self.publish_status(&snapshot);

        info!("Mission {} paused", mission_id);
        Ok(snapshot)
    }

    /// Resume a paused mission towards the waypoint it was heading for.
    pub async fn resume_mission(&self, mission_id: &str) -> Result<MissionStatus, MissionError> {
        let status = self.status_handle(mission_id)?;

        if status.lock().status != MissionState::Paused {
            return Err(MissionError::NotPaused(mission_id.to_string()));
        }

        // Autonomous before running, the execution task resumes as soon as it sees running
        self.nav.start_autonomous_navigation().await?;

        let snapshot = {
            let mut s = status.lock();
            if s.status != MissionState::Paused {
                return Err(MissionError::NotPaused(mission_id.to_string()));
            }
            s.status = MissionState::Running;
            s.clone()
        };
        self.publish_status(&snapshot);

        info!("Mission {} resumed", mission_id);
        Ok(snapshot)
    }

    /// Abort a running or paused mission.
    pub async fn abort_mission(&self, mission_id: &str) -> Result<MissionStatus, MissionError> {
        let status = self.status_handle(mission_id)?;

        let snapshot = {
            let mut s = status.lock();
            if !s.status.is_active() {
                return Err(MissionError::NotRunning(mission_id.to_string()));
            }
            s.status = MissionState::Aborted;
            s.clone()
        };

        let tasks = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(a) if a.mission_id == mission_id => active.take().and_then(|a| a.tasks),
                _ => None,
            }
        };

        if let Some(t) = tasks {
            t.execution.abort();
            if let Err(e) = t.supervisor.await {
                error!("Mission supervisor ended abnormally: {}", e);
            }
        }

        // The execution task has terminated, these are the last commands of the mission
        if let Err(e) = self.nav.stop().await {
            error!("Could not stop after aborting mission {}: {}", mission_id, e);
        }
        if let Err(e) = self.nav.set_blade(false).await {
            error!("Could not stop the blade: {}", e);
        }

        self.publish_status(&snapshot);
        warn!("Mission {} aborted", mission_id);
        Ok(snapshot)
    }

    pub fn get_mission_status(&self, mission_id: &str) -> Result<MissionStatus, MissionError> {
        Ok(self.status_handle(mission_id)?.lock().clone())
    }

    /// All missions in creation order.
    pub fn list_missions(&self) -> Vec<Mission> {
        self.missions.lock().clone()
    }

    /// Wait until the mission reaches a terminal status, polling at `poll`.
    pub async fn wait_for_terminal(
        &self,
        mission_id: &str,
        poll: Duration,
    ) -> Result<MissionStatus, MissionError> {
        let status = self.status_handle(mission_id)?;
        loop {
            let s = status.lock().clone();
            if s.status.is_terminal() {
                return Ok(s);
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn mission(&self, mission_id: &str) -> Result<Mission, MissionError> {
        self.missions
            .lock()
            .iter()
            .find(|m| m.id == mission_id)
            .cloned()
            .ok_or_else(|| MissionError::NotFound(mission_id.to_string()))
    }

    fn status_handle(&self, mission_id: &str) -> Result<Arc<Mutex<MissionStatus>>, MissionError> {
        self.statuses
            .lock()
            .get(mission_id)
            .cloned()
            .ok_or_else(|| MissionError::NotFound(mission_id.to_string()))
    }

    fn status_of(&self, mission_id: &str) -> Option<MissionState> {
        self.statuses
            .lock()
            .get(mission_id)
            .map(|s| s.lock().status)
    }

    /// Claim the execution slot for a mission.
    ///
    /// Returns the tasks of the ended mission which held the slot before.
    fn reserve(&self, mission_id: &str) -> Result<Option<MissionTasks>, MissionError> {
        let mut active = self.active.lock();

        if let Some(current) = active.as_ref() {
            let in_progress = match current.tasks {
                None => true,
                Some(_) => self
                    .status_of(&current.mission_id)
                    .map(|s| s.is_active())
                    .unwrap_or(false),
            };
            if in_progress {
                return Err(MissionError::AlreadyActive(current.mission_id.clone()));
            }
        }

        let previous = active.replace(ActiveMission {
            mission_id: mission_id.to_string(),
            tasks: None,
        });
        Ok(previous.and_then(|a| a.tasks))
    }

    /// Put the robot in autonomous mode and spawn the execution of a reserved mission.
    async fn launch(
        &self,
        mission: Mission,
        status: Arc<Mutex<MissionStatus>>,
    ) -> Result<MissionStatus, MissionError> {
        let pause_poll = self.nav.control_period()?;

        let path = mission
            .waypoints
            .iter()
            .map(|wp| GeoPoint::new(wp.lat, wp.lon))
            .collect();
        self.nav.set_path(path);
        self.nav.start_autonomous_navigation().await?;

        let mission_id = mission.id.clone();

        // Running and the tasks become visible together, an abort sees both or neither
        let mut active = self.active.lock();

        let snapshot = {
            let mut s = status.lock();
            *s = MissionStatus::idle(&mission_id);
            s.status = MissionState::Running;
            s.current_waypoint_index = Some(0);
            s.clone()
        };
        self.publish_status(&snapshot);

        let execution = tokio::spawn(execute(
            self.nav.clone(),
            mission,
            status.clone(),
            self.bus.clone(),
            pause_poll,
        ));
        let execution_abort = execution.abort_handle();

        let supervisor = tokio::spawn(supervise(
            execution,
            self.nav.clone(),
            status,
            self.bus.clone(),
        ));

        *active = Some(ActiveMission {
            mission_id,
            tasks: Some(MissionTasks {
                execution: execution_abort,
                supervisor,
            }),
        });

        Ok(snapshot)
    }

    fn publish_status(&self, status: &MissionStatus) {
        publish_status(self.bus.as_ref(), status);
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn validate_waypoint(wp: &MissionWaypoint) -> Result<(), MissionError> {
    let invalid = |reason: String| MissionError::InvalidWaypoint { id: wp.id, reason };

    if !(-90.0..=90.0).contains(&wp.lat) {
        return Err(invalid(format!("latitude {} out of range", wp.lat)));
    }
    if !(-180.0..=180.0).contains(&wp.lon) {
        return Err(invalid(format!("longitude {} out of range", wp.lon)));
    }
    if !(0.0..=100.0).contains(&wp.speed) {
        return Err(invalid(format!("speed {} not in [0, 100]", wp.speed)));
    }

    Ok(())
}

/// Drive the mission's waypoints in order.
///
/// Returns early without error if the mission leaves the running and paused states.
async fn execute(
    nav: Arc<NavigationService>,
    mission: Mission,
    status: Arc<Mutex<MissionStatus>>,
    bus: Option<Arc<MessageBus>>,
    pause_poll: Duration,
) -> Result<(), NavError> {
    let total = mission.waypoints.len();

    for (idx, wp) in mission.waypoints.iter().enumerate() {
        let snapshot = {
            let mut s = status.lock();
            s.current_waypoint_index = Some(idx);
            s.clone()
        };
        nav.state().get_state().write().current_waypoint_id = Some(wp.id);
        publish_status(bus.as_ref(), &snapshot);

        nav.set_blade(wp.blade_on).await?;

        let target = GeoPoint::new(wp.lat, wp.lon);
        loop {
            match nav
                .go_to_waypoint(target, wp.speed, Some(status.as_ref()))
                .await?
            {
                WaypointOutcome::Arrived => break,
                WaypointOutcome::Interrupted => loop {
                    let current = status.lock().status;
                    match current {
                        MissionState::Running => break,
                        MissionState::Paused => tokio::time::sleep(pause_poll).await,
                        _ => return Ok(()),
                    }
                },
            }
        }

        let snapshot = {
            let mut s = status.lock();
            s.completion_percentage = 100.0 * (idx + 1) as f64 / total as f64;
            s.clone()
        };
        debug!(
            "Mission {} waypoint {} reached ({:.0}%)",
            mission.id, wp.id, snapshot.completion_percentage
        );
        publish_status(bus.as_ref(), &snapshot);
    }

    nav.set_blade(false).await?;
    nav.stop().await?;
    Ok(())
}

/// Wait for the execution task and record how it ended.
///
/// Only a mission which is still running or paused has its status changed, so an abort is never
/// overwritten.
async fn supervise(
    execution: JoinHandle<Result<(), NavError>>,
    nav: Arc<NavigationService>,
    status: Arc<Mutex<MissionStatus>>,
    bus: Option<Arc<MessageBus>>,
) {
    let (outcome, error) = match execution.await {
        Ok(Ok(())) => (MissionState::Completed, None),
        Ok(Err(e)) => (MissionState::Failed, Some(e.to_string())),
        Err(e) if e.is_cancelled() => (MissionState::Aborted, None),
        Err(e) => (MissionState::Failed, Some(format!("mission task panicked: {}", e))),
    };

    let snapshot = {
        let mut s = status.lock();
        if !s.status.is_active() {
            return;
        }
        s.status = outcome;
        s.error = error;
        s.clone()
    };

    match outcome {
        MissionState::Completed => info!("Mission {} completed", snapshot.mission_id),
        _ => {
            error!(
                "Mission {} {}: {}",
                snapshot.mission_id,
                outcome,
                snapshot.error.as_deref().unwrap_or("cancelled")
            );
            if let Err(e) = nav.stop().await {
                error!("Could not stop after mission failure: {}", e);
            }
        }
    }

    publish_status(bus.as_ref(), &snapshot);
}

fn publish_status(bus: Option<&Arc<MessageBus>>, status: &MissionStatus) {
    let bus = match bus {
        Some(b) => b,
        None => return,
    };

    match serde_json::to_value(status) {
        Ok(Value::Object(payload)) => bus.publish_detached(MISSION_STATUS_TOPIC, payload, false),
        Ok(_) => warn!("Mission status did not serialise to an object"),
        Err(e) => warn!("Cannot serialise the mission status: {}", e),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nav::NavParams;
    use crate::safety::{SafetyGate, SafetyLimits};
    use crate::sim::{SimDrive, SimParams};
    use crate::state::RobotStateManager;

    fn service() -> MissionService {
        let state = RobotStateManager::new();
        let sim = Arc::new(SimDrive::new(state.clone(), SimParams::default()));
        let gate = SafetyGate::new(state.clone(), SafetyLimits::default(), None);
        let nav = NavigationService::new(state, gate, sim, NavParams::default());
        MissionService::new(Arc::new(nav))
    }

    fn waypoint(id: u32, speed: f64) -> MissionWaypoint {
        MissionWaypoint {
            id,
            lat: 52.0,
            lon: 4.0,
            blade_on: false,
            speed,
        }
    }

    #[test]
    fn test_create_validation() {
        let svc = service();

        assert!(matches!(
            svc.create_mission("empty", vec![]),
            Err(MissionError::EmptyMission)
        ));
        assert!(matches!(
            svc.create_mission("fast", vec![waypoint(1, 50.0), waypoint(2, 120.0)]),
            Err(MissionError::InvalidWaypoint { id: 2, .. })
        ));

        let mut far = waypoint(3, 10.0);
        far.lat = 91.0;
        assert!(matches!(
            svc.create_mission("far", vec![far]),
            Err(MissionError::InvalidWaypoint { id: 3, .. })
        ));
        assert!(svc.list_missions().is_empty());
    }

    #[test]
    fn test_created_missions_are_idle_and_listed() -> Result<(), MissionError> {
        let svc = service();
        let a = svc.create_mission("a", vec![waypoint(1, 50.0)])?;
        let b = svc.create_mission("b", vec![waypoint(1, 50.0)])?;

        assert_ne!(a.id, b.id);
        let names: Vec<String> = svc.list_missions().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        let status = svc.get_mission_status(&a.id)?;
        assert_eq!(status.status, MissionState::Idle);
        assert_eq!(status.completion_percentage, 0.0);

        assert!(matches!(
            svc.get_mission_status("nope"),
            Err(MissionError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_lifecycle_errors() -> Result<(), MissionError> {
        let svc = service();
        let m = svc.create_mission("a", vec![waypoint(1, 50.0)])?;

        assert!(matches!(
            svc.pause_mission(&m.id).await,
            Err(MissionError::NotRunning(_))
        ));
        assert!(matches!(
            svc.resume_mission(&m.id).await,
            Err(MissionError::NotPaused(_))
        ));
        assert!(matches!(
            svc.abort_mission(&m.id).await,
            Err(MissionError::NotRunning(_))
        ));

        // No position known yet
        assert!(matches!(
            svc.start_mission(&m.id).await,
            Err(MissionError::Navigation(NavError::NoPosition))
        ));
        assert_eq!(svc.get_mission_status(&m.id)?.status, MissionState::Idle);
        Ok(())
    }
}
