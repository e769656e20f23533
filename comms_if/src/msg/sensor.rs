//! # Sensor Messages

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single spherical obstacle observation.
///
/// Each observation is an independent event, the sensor may report the same obstacle many times.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct ObstacleObs {
    /// Centre of the obstacle in the fixed frame, in meters.
    pub centre_m: [f64; 3],

    /// Radius of the obstacle in meters.
    pub radius_m: f64,
}
