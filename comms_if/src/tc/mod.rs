//! # Telecommand module
//!
//! Telecommands are instructions sent to the mower by the command layer. Only mission
//! orchestration is exposed at this interface.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod mission;
