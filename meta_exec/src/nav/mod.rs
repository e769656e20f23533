//! # Navigation
//!
//! Planning happens at two levels:
//! - A [`Planner`] plans a whole trajectory for one fidelity level. The only implementation is
//!   the [`GeometricPlanner`], which runs an [`RrtConnect`] search through the collision space
//!   inflated by its value function's tracking bound, then times and lifts the resulting path.
//! - The [`MetaPlanner`] sequences several planners, in priority order, into one trajectory,
//!   checking the switching bound wherever control passes from one planner to another.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod geometric;
mod meta_planner;
mod rrt;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;
use std::{fmt::Debug, sync::Arc};

use crate::{
    traj::{TrajError, Trajectory},
    value_fn::ValueFunction,
};

pub use geometric::*;
pub use meta_planner::*;
pub use rrt::*;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A planner for one fidelity level.
pub trait Planner: Debug + Send + Sync {
    /// The value function of this planner's fidelity level.
    fn value_function(&self) -> &Arc<dyn ValueFunction>;

    /// Plan a collision free trajectory from `start` to `goal`, with the first sample at
    /// `start_time_s`.
    ///
    /// The returned trajectory is always valid. If no trajectory can be found an error is
    /// returned instead.
    fn plan(
        &self,
        start: &Vector3<f64>,
        goal: &Vector3<f64>,
        start_time_s: f64,
    ) -> Result<Trajectory, NavError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NavError {
    #[error("The start position {0:?} is not valid")]
    StartInvalid([f64; 3]),

    #[error("The goal position {0:?} is not valid")]
    GoalInvalid([f64; 3]),

    #[error("Start and goal differ on axis {0}, which is outside the planner's subspace")]
    OutsideSubspace(usize),

    #[error("No path found after {0} iterations")]
    NoPathFound(usize),

    #[error("No planners were given to the meta planner")]
    NoPlanners,

    #[error("The meta planner found no trajectory after {0} iterations")]
    MetaPlanFailed(usize),

    #[error("The plan was cancelled before it completed")]
    Cancelled,

    #[error("Could not build the trajectory: {0}")]
    TrajError(TrajError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl From<TrajError> for NavError {
    fn from(e: TrajError) -> Self {
        NavError::TrajError(e)
    }
}
