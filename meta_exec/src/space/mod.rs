//! # Collision space
//!
//! A bounded region containing spherical obstacles. Validity queries are inflated by the tracking
//! bound of the value functions involved, so that a position is only valid if the whole tracking
//! tube around it is free.
//!
//! Obstacles are only ever added, never removed. Implementations must be safe to share between
//! the control loop, the sensing path and a background planning worker.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod balls_in_box;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{value_fn::ValueFunction, viz::VizSink};

pub use balls_in_box::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Smallest radius an obstacle may have.
pub const MIN_OBSTACLE_RADIUS_M: f64 = 1e-8;

/// Tolerance on centre and radius under which two obstacles are considered the same.
pub const OBSTACLE_MATCH_TOLERANCE_M: f64 = 1e-8;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A spherical obstacle.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub centre_m: Vector3<f64>,
    pub radius_m: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    #[error("Invalid bounds on axis {axis}: lower = {lower}, upper = {upper}")]
    InvalidBounds { axis: usize, lower: f64, upper: f64 },
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

pub trait CollisionSpace: Debug + Send + Sync {
    /// Set the box bounds. Must be done before the space is shared.
    fn set_bounds(&mut self, lower: Vector3<f64>, upper: Vector3<f64>) -> Result<(), SpaceError>;

    /// The `(lower, upper)` box bounds.
    fn bounds(&self) -> (Vector3<f64>, Vector3<f64>);

    /// Check whether the tracking tube around `position` is free, while switching from the
    /// `incoming` to the `outgoing` value function. Pass the same value function twice when not
    /// switching.
    fn is_valid(
        &self,
        position: &Vector3<f64>,
        incoming: &dyn ValueFunction,
        outgoing: &dyn ValueFunction,
    ) -> bool;

    /// Check the straight segment from `start` to `end`, sampled every `resolution_m` including
    /// both ends.
    fn is_segment_valid(
        &self,
        start: &Vector3<f64>,
        end: &Vector3<f64>,
        incoming: &dyn ValueFunction,
        outgoing: &dyn ValueFunction,
        resolution_m: f64,
    ) -> bool {
        let length = (end - start).norm();
        let num_steps = if resolution_m > 0.0 {
            (length / resolution_m).ceil().max(1.0) as usize
        } else {
            1
        };

        (0..=num_steps).all(|i| {
            let point = start + (end - start) * (i as f64 / num_steps as f64);
            self.is_valid(&point, incoming, outgoing)
        })
    }

    /// Add an obstacle, flooring its radius at `MIN_OBSTACLE_RADIUS_M`.
    fn add_obstacle(&self, centre_m: Vector3<f64>, radius_m: f64);

    /// True if an obstacle with this centre and radius is already known.
    fn is_obstacle(&self, centre_m: &Vector3<f64>, radius_m: f64) -> bool;

    /// Add the obstacle if it isn't already known, as a single atomic operation. Returns true if
    /// the obstacle was added.
    fn insert_if_new(&self, centre_m: Vector3<f64>, radius_m: f64) -> bool;

    /// All known obstacles intersecting the sensing sphere of `sensor_radius_m` around
    /// `position`.
    fn sense_obstacles(&self, position: &Vector3<f64>, sensor_radius_m: f64) -> Vec<Obstacle>;

    /// All known obstacles, in insertion order.
    fn obstacles(&self) -> Vec<Obstacle>;

    fn num_obstacles(&self) -> usize;

    /// Publish the bounds and obstacles to the environment channel of `sink`.
    fn visualize(&self, sink: &dyn VizSink, frame_id: &str, time_s: f64);
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Obstacle {
    pub fn new(centre_m: Vector3<f64>, radius_m: f64) -> Self {
        Self {
            centre_m,
            radius_m: radius_m.max(MIN_OBSTACLE_RADIUS_M),
        }
    }

    /// True if the given centre and radius match this obstacle within
    /// `OBSTACLE_MATCH_TOLERANCE_M`. The radius is floored the same way as on insertion.
    pub fn matches(&self, centre_m: &Vector3<f64>, radius_m: f64) -> bool {
        (self.centre_m - centre_m).norm() < OBSTACLE_MATCH_TOLERANCE_M
            && (self.radius_m - radius_m.max(MIN_OBSTACLE_RADIUS_M)).abs()
                < OBSTACLE_MATCH_TOLERANCE_M
    }
}

impl From<&comms_if::ObstacleObs> for Obstacle {
    fn from(obs: &comms_if::ObstacleObs) -> Self {
        Obstacle::new(Vector3::from(obs.centre_m), obs.radius_m)
    }
}
