//! # Communications interface crate.
//!
//! Provides the interface types shared between the mower core and the services around it: bus
//! events and the topic naming contract, the telemetry ingest payload, and mission telecommands.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Message bus event definitions and the topic naming contract
pub mod bus;

/// Data produced by equipment (sensors) and ingested by the core
pub mod eqpt;

pub mod tc;
