//! # Dynamics models
//!
//! A dynamics model describes how the full state of the vehicle evolves under a control input. It
//! also knows how to move between the full state and the geometric (position only) space that the
//! planners work in:
//!
//! - *puncturing* takes a full state down to a 3D position,
//! - *lifting* takes a timed sequence of positions up to full states.
//!
//! Because the layout of the state vector is a property of the model, value functions and the
//! collision space always go through `spatial_dimension` and `velocity_dimension` rather than
//! assuming where positions and velocities live.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod near_hover_quad;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DVector, Vector3};
use std::fmt::Debug;

pub use near_hover_quad::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Acceleration due to gravity
pub const G_MS2: f64 = 9.81;

/// Number of geometric (spatial) axes
pub const NUM_SPATIAL_AXES: usize = 3;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A full state vector, layout defined by the dynamics model.
pub type State = DVector<f64>;

/// A control vector, layout defined by the dynamics model.
pub type Control = DVector<f64>;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DynamicsError {
    #[error("Expected {expected} control bounds but got {found}")]
    ControlDimMismatch { expected: usize, found: usize },

    #[error("Control bound {0} has lower > upper or is not finite")]
    InvalidControlBound(usize),
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A model of the vehicle's dynamics.
pub trait Dynamics: Debug + Send + Sync {
    /// Dimension of the full state.
    fn state_dim(&self) -> usize;

    /// Dimension of the control input.
    fn control_dim(&self) -> usize;

    /// Lower bound of the control input.
    fn control_lower(&self) -> &Control;

    /// Upper bound of the control input.
    fn control_upper(&self) -> &Control;

    /// Time derivative of `state` under the control `control`.
    fn evaluate(&self, state: &State, control: &Control) -> State;

    /// The geometric position of a full state.
    fn puncture(&self, state: &State) -> Vector3<f64>;

    /// Index in the state vector of the position along the given spatial axis.
    fn spatial_dimension(&self, axis: usize) -> usize;

    /// Index in the state vector of the velocity along the given spatial axis.
    fn velocity_dimension(&self, axis: usize) -> usize;

    /// Lift a timed sequence of positions into full states.
    fn lift_geometric_trajectory(
        &self,
        positions: &[Vector3<f64>],
        times_s: &[f64],
    ) -> Vec<State>;

    /// The all zero state.
    fn zero_state(&self) -> State {
        State::zeros(self.state_dim())
    }

    /// Build a state at rest at the given position.
    fn state_at_rest(&self, position: &Vector3<f64>) -> State {
        let mut state = self.zero_state();
        for axis in 0..NUM_SPATIAL_AXES {
            state[self.spatial_dimension(axis)] = position[axis];
        }
        state
    }

    /// Advance `state` by `dt_s` under a constant control using a single Euler step.
    fn integrate(&self, state: &State, control: &Control, dt_s: f64) -> State {
        state + self.evaluate(state, control) * dt_s
    }
}
