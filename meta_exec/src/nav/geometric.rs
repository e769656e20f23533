//! Geometric planner, one per fidelity level.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::Vector3;
use rand::{rngs::StdRng, SeedableRng};
use serde::Deserialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use super::{NavError, Planner, RrtConnect};
use crate::{
    dynamics::NUM_SPATIAL_AXES, space::CollisionSpace, traj::Trajectory,
    value_fn::ValueFunction,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Shortest time allowed between two trajectory samples.
const MIN_SAMPLE_INTERVAL_S: f64 = 1e-6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GeometricPlannerParams {
    /// Maximum number of RRT-Connect iterations per plan
    pub max_iterations: usize,

    /// Maximum growth of a tree in one extension
    pub step_m: f64,

    /// Spacing of collision checks along an edge, also the spacing of trajectory samples
    pub resolution_m: f64,

    /// Probability of growing towards the other tree's root instead of a random sample
    pub goal_bias: f64,

    /// Seed of the sampler. Each call to `plan` uses the next seed.
    pub seed: u64,

    /// Shortcut the path before timing it
    #[serde(default = "default_true")]
    pub shortcut: bool,

    /// Axes the planner searches over
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<usize>,
}

#[derive(Debug)]
pub struct GeometricPlanner {
    params: GeometricPlannerParams,
    value_fn: Arc<dyn ValueFunction>,
    space: Arc<dyn CollisionSpace>,

    /// Number of calls made to `plan`
    num_calls: AtomicU64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GeometricPlannerParams {
    /// Check the search can make progress, returning a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("planner max_iterations must be at least 1".into());
        }
        if !(self.step_m > 0.0) || !self.step_m.is_finite() {
            return Err(format!("planner step must be positive, got {}", self.step_m));
        }
        if !(self.resolution_m > 0.0) || !self.resolution_m.is_finite() {
            return Err(format!(
                "planner resolution must be positive, got {}",
                self.resolution_m
            ));
        }
        if !(0.0..=1.0).contains(&self.goal_bias) {
            return Err(format!("planner goal bias must be in [0, 1], got {}", self.goal_bias));
        }

        if self.dimensions.is_empty() {
            return Err("planner must search at least one axis".into());
        }
        for (i, axis) in self.dimensions.iter().enumerate() {
            if *axis >= NUM_SPATIAL_AXES {
                return Err(format!(
                    "planner axis {} is out of range, axes are 0 to {}",
                    axis,
                    NUM_SPATIAL_AXES - 1
                ));
            }
            if self.dimensions[..i].contains(axis) {
                return Err(format!("planner axis {} is listed more than once", axis));
            }
        }

        Ok(())
    }
}

impl GeometricPlanner {
    pub fn new(
        params: GeometricPlannerParams,
        value_fn: Arc<dyn ValueFunction>,
        space: Arc<dyn CollisionSpace>,
    ) -> Self {
        Self {
            params,
            value_fn,
            space,
            num_calls: AtomicU64::new(0),
        }
    }

    /// Assign times to a geometric path so that no axis moves faster than the value function's
    /// maximum planner speed.
    fn timestamps(&self, path: &[Vector3<f64>], start_time_s: f64) -> Vec<f64> {
        let mut times = Vec::with_capacity(path.len());
        let mut t = start_time_s;

        for (i, point) in path.iter().enumerate() {
            if i > 0 {
                let delta = point - path[i - 1];
                let dt = (0..NUM_SPATIAL_AXES)
                    .map(|axis| delta[axis].abs() / self.value_fn.max_planner_speed(axis))
                    .fold(0.0, f64::max);
                t += dt.max(MIN_SAMPLE_INTERVAL_S);
            }
            times.push(t);
        }

        times
    }
}

impl Planner for GeometricPlanner {
    fn value_function(&self) -> &Arc<dyn ValueFunction> {
        &self.value_fn
    }

    fn plan(
        &self,
        start: &Vector3<f64>,
        goal: &Vector3<f64>,
        start_time_s: f64,
    ) -> Result<Trajectory, NavError> {
        for axis in 0..NUM_SPATIAL_AXES {
            if !self.params.dimensions.contains(&axis) && (start[axis] - goal[axis]).abs() > 1e-9
            {
                return Err(NavError::OutsideSubspace(axis));
            }
        }

        let vf = self.value_fn.as_ref();
        let is_valid = |p: &Vector3<f64>| self.space.is_valid(p, vf, vf);

        if !is_valid(start) {
            return Err(NavError::StartInvalid((*start).into()));
        }
        if !is_valid(goal) {
            return Err(NavError::GoalInvalid((*goal).into()));
        }

        let rrt = RrtConnect::new(
            is_valid,
            self.space.bounds(),
            self.params.dimensions.clone(),
            self.params.step_m,
            self.params.resolution_m,
            self.params.max_iterations,
            self.params.goal_bias,
        );

        let call = self.num_calls.fetch_add(1, Ordering::Relaxed);
        let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(call));

        let mut path = rrt
            .search(start, goal, &mut rng)
            .ok_or(NavError::NoPathFound(self.params.max_iterations))?;

        if self.params.shortcut {
            path = rrt.shortcut(path);
        }
        let path = rrt.densify(&path);

        let times = self.timestamps(&path, start_time_s);
        let states = vf.dynamics().lift_geometric_trajectory(&path, &times);

        debug!(
            "Planner {} found a {} sample trajectory from {:?} to {:?}",
            vf.id().0,
            path.len(),
            start.as_slice(),
            goal.as_slice()
        );

        Ok(Trajectory::from_states(&times, states, &self.value_fn)?)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_dimensions() -> Vec<usize> {
    (0..NUM_SPATIAL_AXES).collect()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dynamics::{Dynamics, NearHoverQuadNoYaw},
        space::BallsInBox,
        value_fn::{PointMassParams, PointMassValueFunction},
    };
    use approx::assert_relative_eq;

    fn planner(speed: f64, dimensions: Vec<usize>) -> (GeometricPlanner, Arc<BallsInBox>) {
        let quad: Arc<dyn Dynamics> =
            Arc::new(NearHoverQuadNoYaw::new(&[-0.1, -0.1, 7.81], &[0.1, 0.1, 11.81]).unwrap());
        let vf: Arc<dyn ValueFunction> = Arc::new(
            PointMassValueFunction::new(
                &PointMassParams {
                    id: 0,
                    max_planner_speed_ms: [speed, speed, 0.5 * speed],
                    expansion_vel_ms: [0.1; 3],
                    max_vel_disturbance_ms: [0.1; 3],
                    max_acc_disturbance_ms2: [0.1; 3],
                },
                quad,
            )
            .unwrap(),
        );
        let space = Arc::new(
            BallsInBox::new(Vector3::new(-20.0, -20.0, -20.0), Vector3::new(20.0, 20.0, 20.0))
                .unwrap(),
        );
        let params = GeometricPlannerParams {
            max_iterations: 5000,
            step_m: 2.0,
            resolution_m: 0.1,
            goal_bias: 0.1,
            seed: 1,
            shortcut: true,
            dimensions,
        };

        (GeometricPlanner::new(params, vf, space.clone()), space)
    }

    #[test]
    fn test_params_validate() {
        let base: GeometricPlannerParams =
            util::params::from_str(include_str!("../../../params/planner.toml")).unwrap();
        assert!(base.validate().is_ok());

        let mut p = base.clone();
        p.dimensions = vec![0, 1, 3];
        assert!(p.validate().unwrap_err().contains("axis 3"));

        let mut p = base.clone();
        p.dimensions = vec![0, 1, 1];
        assert!(p.validate().unwrap_err().contains("more than once"));

        let mut p = base.clone();
        p.dimensions.clear();
        assert!(p.validate().is_err());

        let mut p = base.clone();
        p.resolution_m = 0.0;
        assert!(p.validate().unwrap_err().contains("resolution"));

        let mut p = base.clone();
        p.step_m = -1.0;
        assert!(p.validate().unwrap_err().contains("step"));

        let mut p = base.clone();
        p.goal_bias = 1.5;
        assert!(p.validate().unwrap_err().contains("goal bias"));

        let mut p = base;
        p.max_iterations = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_plan_free_space() {
        let (p, _) = planner(1.0, vec![0, 1, 2]);
        let start = Vector3::new(-10.0, 0.0, 0.0);
        let goal = Vector3::new(10.0, 0.0, 2.0);

        let traj = p.plan(&start, &goal, 5.0).unwrap();
        assert!(traj.is_valid());
        assert_eq!(traj.first_time(), Some(5.0));

        let positions = traj.positions(p.value_function().dynamics().as_ref());
        assert_eq!(positions[0], start);
        assert_eq!(*positions.last().unwrap(), goal);

        // x dominates at 1 m/s over 20 m
        assert_relative_eq!(traj.duration().unwrap(), 20.0, epsilon = 1e-6);

        // Velocities never exceed the planner speed
        let q = p.value_function().dynamics().clone();
        for s in traj.samples() {
            assert!(s.state[q.velocity_dimension(0)].abs() <= 1.0 + 1e-9);
            assert!(s.state[q.velocity_dimension(2)].abs() <= 0.5 + 1e-9);
        }
    }

    #[test]
    fn test_plan_around_obstacle() {
        let (p, space) = planner(1.0, vec![0, 1, 2]);
        space.add_obstacle(Vector3::zeros(), 3.0);

        let start = Vector3::new(-10.0, 0.0, 0.0);
        let goal = Vector3::new(10.0, 0.0, 0.0);
        let traj = p.plan(&start, &goal, 0.0).unwrap();

        let vf = p.value_function().as_ref();
        for pos in traj.positions(vf.dynamics().as_ref()) {
            assert!(space.is_valid(&pos, vf, vf));
        }
    }

    #[test]
    fn test_plan_errors() {
        let (p, space) = planner(1.0, vec![0, 1]);

        assert!(matches!(
            p.plan(&Vector3::zeros(), &Vector3::new(1.0, 1.0, 1.0), 0.0),
            Err(NavError::OutsideSubspace(2))
        ));

        space.add_obstacle(Vector3::new(5.0, 0.0, 0.0), 1.0);
        assert!(matches!(
            p.plan(&Vector3::zeros(), &Vector3::new(5.0, 0.0, 0.0), 0.0),
            Err(NavError::GoalInvalid(_))
        ));
        assert!(matches!(
            p.plan(&Vector3::new(30.0, 0.0, 0.0), &Vector3::zeros(), 0.0),
            Err(NavError::StartInvalid(_))
        ));
    }
}
