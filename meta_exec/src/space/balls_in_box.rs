//! Axis aligned box containing spherical obstacles.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{Marker, MarkerShape, VizChannel};
use log::{debug, warn};
use nalgebra::Vector3;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::*;
use crate::viz::{ENVIRONMENT_BOX_COLOUR, OBSTACLE_COLOUR};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct BallsInBox {
    lower: Vector3<f64>,
    upper: Vector3<f64>,

    /// Known obstacles, append only
    obstacles: RwLock<Vec<Obstacle>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl BallsInBox {
    /// Create an empty box with the given bounds.
    pub fn new(lower: Vector3<f64>, upper: Vector3<f64>) -> Result<Self, SpaceError> {
        let mut space = Self {
            lower: Vector3::zeros(),
            upper: Vector3::zeros(),
            obstacles: RwLock::new(Vec::new()),
        };
        space.set_bounds(lower, upper)?;

        Ok(space)
    }

    // The obstacle list is append only so it is always consistent, even if a writer panicked.

    fn read(&self) -> RwLockReadGuard<Vec<Obstacle>> {
        self.obstacles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<Vec<Obstacle>> {
        self.obstacles.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CollisionSpace for BallsInBox {
    fn set_bounds(&mut self, lower: Vector3<f64>, upper: Vector3<f64>) -> Result<(), SpaceError> {
        for axis in 0..3 {
            if !lower[axis].is_finite() || !upper[axis].is_finite() || lower[axis] > upper[axis] {
                return Err(SpaceError::InvalidBounds {
                    axis,
                    lower: lower[axis],
                    upper: upper[axis],
                });
            }
        }

        self.lower = lower;
        self.upper = upper;

        Ok(())
    }

    fn bounds(&self) -> (Vector3<f64>, Vector3<f64>) {
        (self.lower, self.upper)
    }

    fn is_valid(
        &self,
        position: &Vector3<f64>,
        incoming: &dyn ValueFunction,
        outgoing: &dyn ValueFunction,
    ) -> bool {
        let bound = outgoing.switching_tracking_bounds(incoming);

        // Box faces
        for axis in 0..3 {
            if position[axis] < self.lower[axis] + bound[axis]
                || position[axis] > self.upper[axis] - bound[axis]
            {
                return false;
            }
        }

        // Obstacles, checking the centre then the nearest corner of the tube
        for obs in self.read().iter() {
            let p = &obs.centre_m;

            if (position - p).norm() <= obs.radius_m {
                return false;
            }

            let corner = Vector3::from_fn(|axis, _| {
                if position[axis] - p[axis] > 0.0 {
                    position[axis] - bound[axis]
                } else {
                    position[axis] + bound[axis]
                }
            });

            if (corner - p).norm() <= obs.radius_m {
                return false;
            }
        }

        true
    }

    fn add_obstacle(&self, centre_m: Vector3<f64>, radius_m: f64) {
        if radius_m < MIN_OBSTACLE_RADIUS_M {
            warn!(
                "Obstacle radius {} is below the minimum, using {}",
                radius_m, MIN_OBSTACLE_RADIUS_M
            );
        }

        self.write().push(Obstacle::new(centre_m, radius_m));
    }

    fn is_obstacle(&self, centre_m: &Vector3<f64>, radius_m: f64) -> bool {
        self.read().iter().any(|o| o.matches(centre_m, radius_m))
    }

    fn insert_if_new(&self, centre_m: Vector3<f64>, radius_m: f64) -> bool {
        let mut obstacles = self.write();

        if obstacles.iter().any(|o| o.matches(&centre_m, radius_m)) {
            return false;
        }

        obstacles.push(Obstacle::new(centre_m, radius_m));
        debug!(
            "New obstacle at {:?} with radius {:.3} m, {} known",
            centre_m.as_slice(),
            radius_m,
            obstacles.len()
        );

        true
    }

    fn sense_obstacles(&self, position: &Vector3<f64>, sensor_radius_m: f64) -> Vec<Obstacle> {
        self.read()
            .iter()
            .filter(|o| (position - o.centre_m).norm() <= o.radius_m + sensor_radius_m)
            .copied()
            .collect()
    }

    fn obstacles(&self) -> Vec<Obstacle> {
        self.read().clone()
    }

    fn num_obstacles(&self) -> usize {
        self.read().len()
    }

    fn visualize(&self, sink: &dyn VizSink, frame_id: &str, time_s: f64) {
        if !sink.has_subscribers(VizChannel::Environment) {
            return;
        }

        let scale = self.upper - self.lower;
        let centre = self.lower + 0.5 * scale;

        sink.publish(
            VizChannel::Environment,
            Marker {
                ns: "box".into(),
                id: 0,
                frame_id: frame_id.into(),
                time_s,
                shape: MarkerShape::Cube {
                    centre: centre.into(),
                    scale: scale.into(),
                },
                colour: ENVIRONMENT_BOX_COLOUR,
            },
        );

        for (i, obs) in self.read().iter().enumerate() {
            sink.publish(
                VizChannel::Environment,
                Marker {
                    ns: "obstacles".into(),
                    id: i,
                    frame_id: frame_id.into(),
                    time_s,
                    shape: MarkerShape::Sphere {
                        centre: obs.centre_m.into(),
                        radius: obs.radius_m,
                    },
                    colour: OBSTACLE_COLOUR,
                },
            );
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
