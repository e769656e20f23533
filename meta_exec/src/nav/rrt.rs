//! RRT-Connect search through the geometric space.
//!
//! Two trees are grown, one from the start and one from the goal. Each iteration one tree is
//! extended towards a random sample and the other then tries to connect to the new node. The
//! trees swap roles every iteration.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use rand::Rng;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Distance under which two points are the same.
const COINCIDENT_M: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An RRT-Connect search over the box `[lower, upper]`, restricted to the axes in `dimensions`.
pub struct RrtConnect<V> {
    is_valid: V,

    lower: Vector3<f64>,
    upper: Vector3<f64>,

    /// Axes that are searched over, the others stay at the start's value
    dimensions: Vec<usize>,

    /// Maximum growth of the tree in one extension
    step_m: f64,

    /// Spacing of validity checks along an edge
    resolution_m: f64,

    max_iterations: usize,

    /// Probability of extending towards the other tree's root rather than a random sample
    goal_bias: f64,
}

#[derive(Debug)]
struct Tree {
    nodes: Vec<Vector3<f64>>,
    parents: Vec<Option<usize>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq)]
enum Extend {
    /// Blocked before making any progress
    Trapped,

    /// Added a node part of the way to the target
    Advanced(usize),

    /// Added a node at the target
    Reached(usize),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<V> RrtConnect<V>
where
    V: Fn(&Vector3<f64>) -> bool,
{
    pub fn new(
        is_valid: V,
        bounds: (Vector3<f64>, Vector3<f64>),
        dimensions: Vec<usize>,
        step_m: f64,
        resolution_m: f64,
        max_iterations: usize,
        goal_bias: f64,
    ) -> Self {
        Self {
            is_valid,
            lower: bounds.0,
            upper: bounds.1,
            dimensions,
            step_m,
            resolution_m,
            max_iterations,
            goal_bias,
        }
    }

    /// Search for a path from `start` to `goal`. The path includes both ends.
    pub fn search<R: Rng>(
        &self,
        start: &Vector3<f64>,
        goal: &Vector3<f64>,
        rng: &mut R,
    ) -> Option<Vec<Vector3<f64>>> {
        if !(self.is_valid)(start) || !(self.is_valid)(goal) {
            return None;
        }

        if self.is_motion_valid(start, goal) {
            trace!("Direct connection from start to goal");
            return Some(vec![*start, *goal]);
        }

        let mut trees = [Tree::new(*start), Tree::new(*goal)];
        let mut a = 0;

        for iteration in 0..self.max_iterations {
            let b = 1 - a;

            let target = if rng.gen::<f64>() < self.goal_bias {
                trees[b].nodes[0]
            } else {
                self.sample(start, rng)
            };

            let new_idx = match self.extend(&mut trees[a], &target) {
                Extend::Trapped => {
                    a = b;
                    continue;
                }
                Extend::Advanced(i) | Extend::Reached(i) => i,
            };
            let new_point = trees[a].nodes[new_idx];

            if let Extend::Reached(other_idx) = self.connect(&mut trees[b], &new_point) {
                let mut path = trees[a].path_to_root(new_idx);
                path.reverse();

                // The first point from the other tree is the connection point itself
                path.extend(trees[b].path_to_root(other_idx).into_iter().skip(1));

                // Tree 1 is rooted at the goal
                if a == 1 {
                    path.reverse();
                }

                trace!(
                    "Trees connected after {} iterations with {} + {} nodes",
                    iteration + 1,
                    trees[0].nodes.len(),
                    trees[1].nodes.len()
                );

                return Some(path);
            }

            a = b;
        }

        None
    }

    /// Check a straight motion, at the search resolution, including both ends.
    pub fn is_motion_valid(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> bool {
        let delta = to - from;
        let num_steps = (delta.norm() / self.resolution_m).ceil().max(1.0) as usize;

        (0..=num_steps).all(|i| (self.is_valid)(&(from + delta * (i as f64 / num_steps as f64))))
    }

    /// Greedily replace runs of waypoints with straight motions wherever they are valid.
    pub fn shortcut(&self, path: Vec<Vector3<f64>>) -> Vec<Vector3<f64>> {
        if path.len() < 3 {
            return path;
        }

        let last = path.len() - 1;
        let mut out = vec![path[0]];
        let mut i = 0;

        while i < last {
            let mut j = last;
            while j > i + 1 && !self.is_motion_valid(&path[i], &path[j]) {
                j -= 1;
            }
            out.push(path[j]);
            i = j;
        }

        out
    }

    /// Insert points along each edge so that consecutive points are no further apart than the
    /// check resolution. Coincident points are dropped.
    pub fn densify(&self, path: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let mut out: Vec<Vector3<f64>> = Vec::new();

        for w in path.windows(2) {
            let delta = w[1] - w[0];
            let length = delta.norm();
            if length < COINCIDENT_M {
                continue;
            }

            let num_steps = (length / self.resolution_m).ceil().max(1.0) as usize;
            for k in 0..num_steps {
                out.push(w[0] + delta * (k as f64 / num_steps as f64));
            }
        }

        if let Some(last) = path.last() {
            out.push(*last);
        }

        out
    }

    fn sample<R: Rng>(&self, start: &Vector3<f64>, rng: &mut R) -> Vector3<f64> {
        let mut point = *start;
        for &axis in &self.dimensions {
            point[axis] = if self.upper[axis] > self.lower[axis] {
                rng.gen_range(self.lower[axis]..self.upper[axis])
            } else {
                self.lower[axis]
            };
        }
        point
    }

    fn extend(&self, tree: &mut Tree, target: &Vector3<f64>) -> Extend {
        let near_idx = tree.nearest(target);
        let near = tree.nodes[near_idx];

        let delta = target - near;
        let dist = delta.norm();

        if dist < COINCIDENT_M {
            return Extend::Reached(near_idx);
        }

        let reached = dist <= self.step_m;
        let new = if reached {
            *target
        } else {
            near + delta * (self.step_m / dist)
        };

        if !self.is_motion_valid(&near, &new) {
            return Extend::Trapped;
        }

        let idx = tree.add(new, near_idx);
        if reached {
            Extend::Reached(idx)
        } else {
            Extend::Advanced(idx)
        }
    }

    fn connect(&self, tree: &mut Tree, target: &Vector3<f64>) -> Extend {
        loop {
            match self.extend(tree, target) {
                Extend::Advanced(_) => continue,
                other => return other,
            }
        }
    }
}

impl Tree {
    fn new(root: Vector3<f64>) -> Self {
        Self {
            nodes: vec![root],
            parents: vec![None],
        }
    }

    fn add(&mut self, point: Vector3<f64>, parent: usize) -> usize {
        self.nodes.push(point);
        self.parents.push(Some(parent));
        self.nodes.len() - 1
    }

    fn nearest(&self, point: &Vector3<f64>) -> usize {
        (0..self.nodes.len())
            .min_by_key(|&i| OrderedFloat((self.nodes[i] - point).norm_squared()))
            .unwrap_or(0)
    }

    /// Points from `idx` back to the root, inclusive.
    fn path_to_root(&self, idx: usize) -> Vec<Vector3<f64>> {
        let mut path = vec![self.nodes[idx]];
        let mut current = self.parents[idx];

        while let Some(i) = current {
            path.push(self.nodes[i]);
            current = self.parents[i];
        }

        path
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn bounds() -> (Vector3<f64>, Vector3<f64>) {
        (Vector3::new(-10.0, -10.0, -10.0), Vector3::new(10.0, 10.0, 10.0))
    }

    /// Free except for a wall at x = 0, |y| < 8, |z| < 8
    fn wall(p: &Vector3<f64>) -> bool {
        !(p[0].abs() < 0.5 && p[1].abs() < 8.0 && p[2].abs() < 8.0)
    }

    #[test]
    fn test_direct_connection() {
        let rrt = RrtConnect::new(|_: &Vector3<f64>| true, bounds(), vec![0, 1, 2], 1.0, 0.1, 100, 0.1);
        let mut rng = StdRng::seed_from_u64(0);

        let a = Vector3::new(-5.0, 0.0, 0.0);
        let b = Vector3::new(5.0, 1.0, 0.0);
        assert_eq!(rrt.search(&a, &b, &mut rng), Some(vec![a, b]));
    }

    #[test]
    fn test_invalid_ends() {
        let rrt = RrtConnect::new(wall, bounds(), vec![0, 1, 2], 1.0, 0.1, 100, 0.1);
        let mut rng = StdRng::seed_from_u64(0);

        assert!(rrt
            .search(&Vector3::zeros(), &Vector3::new(5.0, 0.0, 0.0), &mut rng)
            .is_none());
    }

    #[test]
    fn test_search_around_wall() {
        let rrt = RrtConnect::new(wall, bounds(), vec![0, 1, 2], 1.0, 0.1, 5000, 0.1);
        let mut rng = StdRng::seed_from_u64(42);

        let start = Vector3::new(-5.0, 0.0, 0.0);
        let goal = Vector3::new(5.0, 0.0, 0.0);

        let path = rrt.search(&start, &goal, &mut rng).unwrap();
        assert_eq!(path[0], start);
        assert_eq!(*path.last().unwrap(), goal);
        for w in path.windows(2) {
            assert!(rrt.is_motion_valid(&w[0], &w[1]));
        }

        let short = rrt.shortcut(path.clone());
        assert!(short.len() <= path.len());
        assert_eq!(short[0], start);
        assert_eq!(*short.last().unwrap(), goal);

        let dense = rrt.densify(&short);
        for w in dense.windows(2) {
            assert!((w[1] - w[0]).norm() <= 0.1 + 1e-9);
            assert!(wall(&w[0]));
        }
    }

    #[test]
    fn test_subspace_search() {
        // Only x and y are searched, so the path stays in the start's z plane
        let rrt = RrtConnect::new(wall, bounds(), vec![0, 1], 1.0, 0.1, 5000, 0.1);
        let mut rng = StdRng::seed_from_u64(7);

        let start = Vector3::new(-5.0, 0.0, 2.0);
        let goal = Vector3::new(5.0, 0.0, 2.0);

        let path = rrt.search(&start, &goal, &mut rng).unwrap();
        assert!(path.iter().all(|p| p[2] == 2.0));
    }

    #[test]
    fn test_densify() {
        let rrt = RrtConnect::new(|_: &Vector3<f64>| true, bounds(), vec![0, 1, 2], 1.0, 0.25, 10, 0.0);

        let path = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
        ];
        let dense = rrt.densify(&path);
        assert_eq!(dense.len(), 5);
        assert_eq!(dense[1], Vector3::new(0.25, 0.0, 0.0));
        assert_eq!(dense[4], Vector3::new(1.0, 0.0, 0.0));
    }
}
