//! # Mission Telecommands
//!
//! Types exchanged with the command layer to create and follow missions.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A named, ordered list of waypoints. The waypoint list is immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub name: String,
    pub waypoints: Vec<MissionWaypoint>,
    pub created_at: DateTime<Utc>,
}

/// A point the mower shall drive to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionWaypoint {
    pub id: u32,

    /// Latitude in degrees
    pub lat: f64,

    /// Longitude in degrees
    pub lon: f64,

    /// Whether the cutting blade runs while driving to this waypoint
    #[serde(default)]
    pub blade_on: bool,

    /// Drive speed as a percentage of the maximum speed, in [0, 100]
    pub speed: f64,
}

/// Progress of a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionStatus {
    pub mission_id: String,
    pub status: MissionState,

    /// Index of the waypoint currently being driven to
    pub current_waypoint_index: Option<usize>,

    /// Percentage of waypoints reached, in [0, 100]
    pub completion_percentage: f64,

    /// Description of the failure when `status` is `Failed`
    #[serde(default)]
    pub error: Option<String>,
}

/// A mission request as it is written in a mission file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionSpec {
    pub name: String,
    pub waypoints: Vec<MissionWaypoint>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Lifecycle state of a mission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionState {
    Idle,
    Running,
    Paused,
    Completed,
    Aborted,
    Failed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MissionStatus {
    /// Status of a freshly created mission.
    pub fn idle(mission_id: &str) -> Self {
        Self {
            mission_id: mission_id.to_string(),
            status: MissionState::Idle,
            current_waypoint_index: None,
            completion_percentage: 0.0,
            error: None,
        }
    }
}

impl MissionState {
    /// The status string reported to the command layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionState::Idle => "idle",
            MissionState::Running => "running",
            MissionState::Paused => "paused",
            MissionState::Completed => "completed",
            MissionState::Aborted => "aborted",
            MissionState::Failed => "failed",
        }
    }

    /// True once the mission can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MissionState::Completed | MissionState::Aborted | MissionState::Failed
        )
    }

    /// True while the mission owns the navigation service.
    pub fn is_active(&self) -> bool {
        matches!(self, MissionState::Running | MissionState::Paused)
    }
}

impl std::fmt::Display for MissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
