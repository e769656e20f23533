//! Value function parameters

use serde::Deserialize;

/// Parameters of one point mass value function, and so of one planner fidelity level.
#[derive(Debug, Clone, Deserialize)]
pub struct PointMassParams {
    /// Identifier of the fidelity level
    pub id: u32,

    /// Maximum planner speed along each axis
    pub max_planner_speed_ms: [f64; 3],

    /// Velocity margin used to expand the tube along each axis
    pub expansion_vel_ms: [f64; 3],

    /// Bound on the velocity disturbance along each axis
    pub max_vel_disturbance_ms: [f64; 3],

    /// Bound on the acceleration disturbance along each axis
    pub max_acc_disturbance_ms2: [f64; 3],
}
