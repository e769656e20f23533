//! # Tracker Telemetry

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One telemetry frame from the tracker, produced every control tick.
///
/// The frame is flat so that it can be archived directly as a CSV row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TrackerTm {
    pub time_s: f64,

    /// Name of the tracker mode at the end of the tick.
    pub mode: String,

    /// True if a control demand was produced this tick.
    pub demand_valid: bool,
    pub pitch_rad: f64,
    pub roll_rad: f64,
    pub thrust_ms2: f64,

    /// Position of the vehicle in the fixed frame.
    pub pos_x_m: f64,
    pub pos_y_m: f64,
    pub pos_z_m: f64,

    /// Position of the reference (planner frame origin) in the fixed frame.
    pub ref_x_m: f64,
    pub ref_y_m: f64,
    pub ref_z_m: f64,

    pub value: f64,
    pub priority: f64,
    pub value_fn_id: u32,

    pub bound_x_m: f64,
    pub bound_y_m: f64,
    pub bound_z_m: f64,

    pub num_replans: u64,
    pub num_obstacles: usize,

    pub traj_stale: bool,
    pub loc_unavailable: bool,
}
