//! # Drive and weather collaborators
//!
//! Interfaces to the parts of the mower outside this crate: the motor driver and the weather
//! service.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Drive motor and blade actuation.
#[async_trait]
pub trait MotorDriver: Send + Sync {
    /// Command the left and right wheel speeds in meters per second.
    async fn set_speed(&self, left_mps: f64, right_mps: f64) -> Result<(), DriveError>;

    async fn set_blade(&self, on: bool) -> Result<(), DriveError>;
}

/// Source of weather advice for autonomous operation.
#[async_trait]
pub trait WeatherAdvisor: Send + Sync {
    async fn get_current(&self) -> Result<WeatherAdvice, WeatherError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Advisor used when no weather service is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysProceed;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherAdvice {
    Proceed,
    Caution,
    Avoid,
}

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("Motor driver rejected the command: {0}")]
    CommandRejected(String),

    #[error("Motor driver is not responding")]
    NotResponding,
}

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Weather service unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

#[async_trait]
impl WeatherAdvisor for AlwaysProceed {
    async fn get_current(&self) -> Result<WeatherAdvice, WeatherError> {
        Ok(WeatherAdvice::Proceed)
    }
}
