//! # Message definitions

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Control demands sent to the vehicle
pub mod ctrl;

/// Obstacle observations from the sensor
pub mod sensor;

/// Tracker telemetry
pub mod tm;

/// Visualisation markers
pub mod viz;

pub use ctrl::ControlDemand;
pub use sensor::ObstacleObs;
pub use tm::TrackerTm;
pub use viz::{Colour, Marker, MarkerShape, VizChannel};
