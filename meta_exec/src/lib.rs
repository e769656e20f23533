//! # Meta planner library.
//!
//! Hybrid planning and tracking for an aerial vehicle in a partially known environment. Several
//! planners of different fidelity are sequenced by the meta planner to produce a single reference
//! trajectory, and the tracker keeps the true vehicle inside a bounded error tube around that
//! reference using closed-form reachability value functions.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Dynamics models - state derivatives, puncturing and lifting of geometric paths
pub mod dynamics;

/// Value functions - safety value, optimal tracking control and tracking error bounds
pub mod value_fn;

/// Collision space - bounded environment of spherical obstacles
pub mod space;

/// Trajectory - time annotated sequence of states with their active value functions
pub mod traj;

/// Navigation - single fidelity planners and the meta planner which sequences them
pub mod nav;

/// Tracker - the real time control loop
pub mod tracker;

/// Visualisation sinks
pub mod viz;

/// Simulation of the vehicle and its obstacle sensor
pub mod sim;
