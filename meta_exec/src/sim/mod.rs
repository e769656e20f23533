//! # Simulation
//!
//! A simulated vehicle and obstacle sensor used to close the loop around the tracker without any
//! hardware. The vehicle integrates the same dynamics the planners use, perturbed by a bounded
//! random acceleration, and publishes its true position through a [`PoseStore`]. The sensor
//! holds the true environment and reports every obstacle within range of the vehicle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;

use comms_if::ObstacleObs;
use nalgebra::Vector3;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;

use crate::{
    dynamics::{Control, Dynamics, State, G_MS2, NUM_SPATIAL_AXES},
    space::{BallsInBox, CollisionSpace, Obstacle, SpaceError},
    tracker::PoseStore,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SimParams {
    /// Length of the simulation
    pub duration_s: f64,

    pub seed: u64,

    /// Obstacles within this distance of their surface are sensed
    pub sensor_range_m: f64,

    /// Bound of the uniform acceleration disturbance on each axis
    pub acc_disturbance_ms2: [f64; 3],

    /// The true obstacles, unknown to the tracker until sensed
    #[serde(default)]
    pub obstacles: Vec<ObstacleObs>,
}

/// The simulated vehicle.
#[derive(Debug)]
pub struct SimVehicle {
    dynamics: Arc<dyn Dynamics>,
    state: State,

    acc_disturbance: Vector3<f64>,
    rng: StdRng,

    /// Where the true position is published
    pose: PoseStore,
}

/// The simulated obstacle sensor.
#[derive(Debug)]
pub struct SimSensor {
    world: BallsInBox,
    range_m: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimVehicle {
    /// Create a vehicle at rest at `start`, publishing its position into `pose`.
    pub fn new(
        dynamics: Arc<dyn Dynamics>,
        start: &Vector3<f64>,
        acc_disturbance_ms2: [f64; 3],
        seed: u64,
        pose: PoseStore,
    ) -> Self {
        let state = dynamics.state_at_rest(start);
        pose.set_position(*start);

        Self {
            dynamics,
            state,
            acc_disturbance: Vector3::from(acc_disturbance_ms2).abs(),
            rng: StdRng::seed_from_u64(seed),
            pose,
        }
    }

    /// The control which holds the vehicle in place, level with thrust balancing gravity.
    pub fn hover_control() -> Control {
        Control::from_column_slice(&[0.0, 0.0, G_MS2])
    }

    /// Advance the vehicle by `dt_s` under `control`, and publish the new position.
    pub fn step(&mut self, control: &Control, dt_s: f64) {
        let mut state_dot = self.dynamics.evaluate(&self.state, control);

        for axis in 0..NUM_SPATIAL_AXES {
            let d = self.acc_disturbance[axis];
            state_dot[self.dynamics.velocity_dimension(axis)] += self.rng.gen_range(-d..=d);
        }

        self.state += state_dot * dt_s;
        self.pose.set_position(self.position());
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn position(&self) -> Vector3<f64> {
        self.dynamics.puncture(&self.state)
    }
}

impl SimSensor {
    pub fn new(
        lower: Vector3<f64>,
        upper: Vector3<f64>,
        obstacles: &[ObstacleObs],
        range_m: f64,
    ) -> Result<Self, SpaceError> {
        let world = BallsInBox::new(lower, upper)?;
        for obs in obstacles {
            let o = Obstacle::from(obs);
            world.add_obstacle(o.centre_m, o.radius_m);
        }

        Ok(Self { world, range_m })
    }

    /// Observe every true obstacle within range of `position`.
    pub fn sense(&self, position: &Vector3<f64>) -> Vec<ObstacleObs> {
        self.world
            .sense_obstacles(position, self.range_m)
            .iter()
            .map(|o| ObstacleObs {
                centre_m: o.centre_m.into(),
                radius_m: o.radius_m,
            })
            .collect()
    }

    /// The true environment.
    pub fn world(&self) -> &BallsInBox {
        &self.world
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::dynamics::NearHoverQuadNoYaw;
    use crate::tracker::PoseSource;
    use approx::assert_relative_eq;

    fn quad() -> Arc<dyn Dynamics> {
        Arc::new(NearHoverQuadNoYaw::new(&[-0.1, -0.1, 7.81], &[0.1, 0.1, 11.81]).unwrap())
    }

    #[test]
    fn test_hover_holds_position() {
        let pose = PoseStore::new();
        let start = Vector3::new(1.0, 2.0, 3.0);
        let mut v = SimVehicle::new(quad(), &start, [0.0; 3], 0, pose.clone());

        assert_eq!(pose.lookup("world", "tracker").unwrap(), start);

        for _ in 0..100 {
            v.step(&SimVehicle::hover_control(), 0.02);
        }

        assert_relative_eq!((v.position() - start).norm(), 0.0, epsilon = 1e-9);
        assert_eq!(pose.get_position().unwrap(), v.position());
    }

    #[test]
    fn test_pitch_accelerates_forward() {
        let mut v = SimVehicle::new(quad(), &Vector3::zeros(), [0.0; 3], 0, PoseStore::new());
        let control = Control::from_column_slice(&[0.1, 0.0, G_MS2]);

        for _ in 0..50 {
            v.step(&control, 0.02);
        }

        let q = quad();
        let vx = v.state()[q.velocity_dimension(0)];
        assert_relative_eq!(vx, G_MS2 * 0.1f64.tan() * 1.0, epsilon = 1e-9);
        assert!(v.position()[0] > 0.0);
        assert_relative_eq!(v.position()[1], 0.0);
    }

    #[test]
    fn test_disturbance_is_bounded() {
        let d = 0.5;
        let mut v = SimVehicle::new(quad(), &Vector3::zeros(), [d; 3], 7, PoseStore::new());

        let dt = 0.02;
        let n = 200;
        for _ in 0..n {
            v.step(&SimVehicle::hover_control(), dt);
        }

        let q = quad();
        let max_speed = d * dt * n as f64;
        for axis in 0..3 {
            assert!(v.state()[q.velocity_dimension(axis)].abs() <= max_speed + 1e-9);
        }
    }

    #[test]
    fn test_sensor_range() {
        let sensor = SimSensor::new(
            Vector3::repeat(-10.0),
            Vector3::repeat(10.0),
            &[
                ObstacleObs {
                    centre_m: [5.0, 0.0, 0.0],
                    radius_m: 1.0,
                },
                ObstacleObs {
                    centre_m: [-5.0, 0.0, 0.0],
                    radius_m: 1.0,
                },
            ],
            2.0,
        )
        .unwrap();

        assert_eq!(sensor.world().num_obstacles(), 2);

        // Exactly at range counts as sensed
        let seen = sensor.sense(&Vector3::new(2.0, 0.0, 0.0));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].centre_m, [5.0, 0.0, 0.0]);

        assert!(sensor.sense(&Vector3::zeros()).is_empty());
    }

    #[test]
    fn test_params() {
        let p: SimParams =
            util::params::from_str(include_str!("../../../params/sim.toml")).unwrap();
        assert!(p.duration_s > 0.0);
        assert_eq!(p.obstacles.len(), 2);
    }
}
