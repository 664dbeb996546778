//! # Mower library.
//!
//! The safety and navigation core of the autonomous mower. The executable and the integration
//! tests build the core from these modules.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Message bus - in-process publish/subscribe with durable replay of critical events
pub mod bus;

/// Mission service - runs waypoint missions on top of navigation
pub mod mission;

/// Navigation - waypoint control, dead reckoning, geofence, path planning, GPS monitoring
pub mod nav;

/// Executable parameters
pub mod params;

/// Safety gate - motor authorization, interlocks, emergency stop and watchdog
pub mod safety;

/// Simulated differential drive
pub mod sim;

/// Robot state - the single shared snapshot of the mower
pub mod state;

/// Supervised background loops
pub mod task;
