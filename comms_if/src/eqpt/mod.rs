//! # Equipment Interface
//!
//! This module defines the interface structures which are received from the mower's equipment.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod telemetry;
