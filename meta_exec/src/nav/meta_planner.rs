//! Meta planner, sequencing planners of different fidelity into one trajectory.
//!
//! The whole problem is first given to each planner in priority order. If none of them can solve
//! it alone a tree of waypoints is grown, where every edge is a trajectory segment from one of the
//! planners. A planner may only start a segment at a waypoint reached by a different planner if
//! the waypoint is valid under the switching bound between the two.
//!
//! A plan can be cancelled part way, which the background replanning worker uses to drop requests
//! that have been superseded.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use super::{NavError, Planner};
use crate::{space::CollisionSpace, traj::Trajectory, value_fn::ValueFunction};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MetaPlannerParams {
    /// Maximum number of waypoints sampled
    pub max_iterations: usize,

    /// Maximum distance between two connected waypoints
    pub max_connection_radius_m: f64,

    /// Seed of the waypoint sampler. Each call to `plan` uses the next seed.
    pub seed: u64,
}

#[derive(Debug)]
pub struct MetaPlanner {
    params: MetaPlannerParams,
    space: Arc<dyn CollisionSpace>,
    num_calls: AtomicU64,
}

/// A node of the waypoint tree.
#[derive(Debug)]
struct Waypoint {
    position: Vector3<f64>,
    parent: Option<usize>,

    /// Segment from the parent to this waypoint, starting at time zero
    segment: Option<Trajectory>,

    /// Value function of the segment arriving at this waypoint
    value_fn: Option<Arc<dyn ValueFunction>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MetaPlannerParams {
    /// Check the waypoint search can make progress, returning a description of the first problem
    /// found.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("meta planner max_iterations must be at least 1".into());
        }
        if !(self.max_connection_radius_m > 0.0) || !self.max_connection_radius_m.is_finite() {
            return Err(format!(
                "meta planner connection radius must be positive, got {}",
                self.max_connection_radius_m
            ));
        }

        Ok(())
    }
}

impl MetaPlanner {
    pub fn new(params: MetaPlannerParams, space: Arc<dyn CollisionSpace>) -> Self {
        Self {
            params,
            space,
            num_calls: AtomicU64::new(0),
        }
    }

    /// Plan a trajectory from `start` to `goal`, starting at `start_time_s`, using `planners` in
    /// the order given.
    pub fn plan(
        &self,
        start: &Vector3<f64>,
        goal: &Vector3<f64>,
        start_time_s: f64,
        planners: &[Arc<dyn Planner>],
    ) -> Result<Trajectory, NavError> {
        self.plan_cancellable(start, goal, start_time_s, planners, || false)
    }

    /// As [`MetaPlanner::plan`], but `is_cancelled` is polled before every planner call and
    /// waypoint iteration. Once it returns true the plan stops with [`NavError::Cancelled`].
    pub fn plan_cancellable<C>(
        &self,
        start: &Vector3<f64>,
        goal: &Vector3<f64>,
        start_time_s: f64,
        planners: &[Arc<dyn Planner>],
        is_cancelled: C,
    ) -> Result<Trajectory, NavError>
    where
        C: Fn() -> bool,
    {
        if planners.is_empty() {
            return Err(NavError::NoPlanners);
        }

        // Single planner solutions
        for planner in planners {
            if is_cancelled() {
                return Err(NavError::Cancelled);
            }

            match planner.plan(start, goal, start_time_s) {
                Ok(traj) => {
                    info!(
                        "Planner {} solved the whole problem",
                        planner.value_function().id().0
                    );
                    return Ok(traj);
                }
                Err(e) => debug!(
                    "Planner {} could not solve the whole problem: {}",
                    planner.value_function().id().0,
                    e
                ),
            }
        }

        // Waypoint tree
        let call = self.num_calls.fetch_add(1, Ordering::Relaxed);
        let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(call));
        let (lower, upper) = self.space.bounds();
        let radius = self.params.max_connection_radius_m;

        let mut tree = vec![Waypoint {
            position: *start,
            parent: None,
            segment: None,
            value_fn: None,
        }];

        for iteration in 0..self.params.max_iterations {
            if is_cancelled() {
                debug!("Meta planner cancelled after {} iterations", iteration);
                return Err(NavError::Cancelled);
            }

            let sample = Vector3::from_fn(|axis, _| {
                if upper[axis] > lower[axis] {
                    rng.gen_range(lower[axis]..upper[axis])
                } else {
                    lower[axis]
                }
            });

            let near_idx = nearest(&tree, &sample);
            let near = tree[near_idx].position;
            let delta = sample - near;
            let dist = delta.norm();

            if dist < 1e-9 {
                continue;
            }

            let target = if dist > radius {
                near + delta * (radius / dist)
            } else {
                sample
            };

            let new_idx = match self.extend(&mut tree, near_idx, &target, planners) {
                Some(i) => i,
                None => continue,
            };

            if (goal - tree[new_idx].position).norm() <= radius {
                if let Some(goal_idx) = self.extend(&mut tree, new_idx, goal, planners) {
                    info!(
                        "Meta planner reached the goal after {} iterations with {} waypoints",
                        iteration + 1,
                        tree.len()
                    );
                    return Ok(build(&tree, goal_idx, start_time_s));
                }
            }
        }

        Err(NavError::MetaPlanFailed(self.params.max_iterations))
    }

    /// Try each planner in turn to connect the waypoint at `from_idx` to `target`. Returns the
    /// index of the new waypoint.
    fn extend(
        &self,
        tree: &mut Vec<Waypoint>,
        from_idx: usize,
        target: &Vector3<f64>,
        planners: &[Arc<dyn Planner>],
    ) -> Option<usize> {
        let from = tree[from_idx].position;
        let incoming = tree[from_idx].value_fn.clone();

        for planner in planners {
            let outgoing = planner.value_function();

            if let Some(ref incoming) = incoming {
                if incoming.id() != outgoing.id()
                    && !self
                        .space
                        .is_valid(&from, incoming.as_ref(), outgoing.as_ref())
                {
                    continue;
                }
            }

            if let Ok(segment) = planner.plan(&from, target, 0.0) {
                tree.push(Waypoint {
                    position: *target,
                    parent: Some(from_idx),
                    segment: Some(segment),
                    value_fn: Some(outgoing.clone()),
                });
                return Some(tree.len() - 1);
            }
        }

        None
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn nearest(tree: &[Waypoint], point: &Vector3<f64>) -> usize {
    (0..tree.len())
        .min_by_key(|&i| OrderedFloat((tree[i].position - point).norm_squared()))
        .unwrap_or(0)
}

/// Concatenate the segments from the root to `idx`.
fn build(tree: &[Waypoint], idx: usize, start_time_s: f64) -> Trajectory {
    let mut segments = Vec::new();
    let mut current = Some(idx);

    while let Some(i) = current {
        if let Some(ref segment) = tree[i].segment {
            segments.push(segment.clone());
        }
        current = tree[i].parent;
    }

    let mut traj = Trajectory::new();
    for segment in segments.into_iter().rev() {
        traj.append(segment);
    }
    if let Some(first) = traj.first_time() {
        traj.shift_time(start_time_s - first);
    }

    traj
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
