//! # Communications interface crate.
//!
//! Provides the message types exchanged between the meta planner and the outside world: obstacle
//! observations coming in from the sensor, control demands going out to the vehicle, and markers
//! published on the visualisation channels. The transport itself is left to the integrator, every
//! message is serde-serialisable.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Message definitions
pub mod msg;

pub use msg::*;
