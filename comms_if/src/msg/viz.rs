//! # Visualisation Markers
//!
//! Markers are published on one of three independent channels. Publishing is fire-and-forget,
//! there is no acknowledgement from the display.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// RGBA colour with components in [0, 1].
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Colour {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// A single display marker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Marker {
    /// Namespace of the marker, markers with the same namespace and id replace each other.
    pub ns: String,

    /// Id of the marker within its namespace.
    pub id: usize,

    /// Frame the marker is expressed in.
    pub frame_id: String,

    /// Time the marker was produced at, in seconds.
    pub time_s: f64,

    pub shape: MarkerShape,

    pub colour: Colour,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The visualisation channels.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VizChannel {
    /// The known environment, bounds and obstacles.
    Environment,

    /// The current trajectory.
    Trajectory,

    /// The current tracking bound around the vehicle.
    TrackingBound,
}

/// Geometry of a marker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MarkerShape {
    /// Axis aligned box given by its centre and full side lengths.
    Cube { centre: [f64; 3], scale: [f64; 3] },

    /// Sphere given by its centre and radius.
    Sphere { centre: [f64; 3], radius: f64 },

    /// Polyline through the given points.
    LineStrip { points: Vec<[f64; 3]> },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Colour {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}
