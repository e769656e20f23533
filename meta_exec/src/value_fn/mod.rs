//! # Value functions
//!
//! A value function solves, for one planner fidelity level, the pursuit problem between the
//! tracking vehicle and the planner's simplified model. It is evaluated on the *relative* state
//! (tracker minus planner reference) and provides:
//!
//! - the safety value (negative inside the tracking tube),
//! - its gradient,
//! - the optimal tracking control,
//! - a priority for blending safety and performance control,
//! - the per-axis tracking error bound, and the bound to use while switching from another value
//!   function.
//!
//! Value functions are immutable after construction and are shared between planners and
//! trajectories through `Arc`.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod params;
mod point_mass;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};

use crate::dynamics::{Control, Dynamics, State, NUM_SPATIAL_AXES};

pub use params::PointMassParams;
pub use point_mass::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Opaque identifier of a value function, and therefore of the planner fidelity level it belongs
/// to.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ValueFunctionId(pub u32);

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ValueFunctionError {
    #[error("Expected a {expected} dimensional {what} but the dynamics has {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(
        "Axis {axis} has no control authority left: max acceleration {a_max} m/s^2 does not \
        exceed the disturbance bound {d_a} m/s^2"
    )]
    InsufficientControlAuthority { axis: usize, a_max: f64, d_a: f64 },

    #[error("Invalid value function parameter: {0}")]
    InvalidParam(String),
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

pub trait ValueFunction: Debug + Send + Sync {
    fn id(&self) -> ValueFunctionId;

    /// The dynamics of the tracking vehicle.
    fn dynamics(&self) -> &Arc<dyn Dynamics>;

    /// Safety value of the relative state. Negative inside the tracking tube.
    fn value(&self, relative_state: &State) -> f64;

    /// Per-axis gradient of the value.
    ///
    /// Each axis contributes the partials of whichever of its own surfaces is larger, regardless
    /// of which axis dominates the overall value.
    fn gradient(&self, relative_state: &State) -> State;

    /// Optimal tracking control for the relative state.
    fn optimal_control(&self, relative_state: &State) -> Control;

    /// Blending priority in `[0, 1]`, 1 meaning the safety control should be used as is.
    fn priority(&self, relative_state: &State) -> f64;

    /// Half width of the tracking tube along `axis`.
    fn tracking_bound(&self, axis: usize) -> f64;

    /// Half width of the tube along `axis` while switching into this value function from
    /// `incoming`.
    fn switching_tracking_bound(&self, axis: usize, incoming: &dyn ValueFunction) -> f64;

    /// Maximum speed the planner may command along `axis`.
    fn max_planner_speed(&self, axis: usize) -> f64;

    /// Tracking bounds on all spatial axes.
    fn tracking_bounds(&self) -> Vector3<f64> {
        Vector3::from_fn(|axis, _| self.tracking_bound(axis))
    }

    /// Switching bounds on all spatial axes.
    fn switching_tracking_bounds(&self, incoming: &dyn ValueFunction) -> Vector3<f64> {
        let mut bounds = Vector3::zeros();
        for axis in 0..NUM_SPATIAL_AXES {
            bounds[axis] = self.switching_tracking_bound(axis, incoming);
        }
        bounds
    }
}
