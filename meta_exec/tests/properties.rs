//! Properties which hold across the dynamics, value function and collision space.

use std::sync::Arc;

use approx::assert_relative_eq;
use meta_lib::{
    dynamics::{Dynamics, NearHoverQuadNoYaw},
    space::{BallsInBox, CollisionSpace},
    value_fn::{PointMassParams, PointMassValueFunction, ValueFunction},
};
use nalgebra::Vector3;

fn quad() -> Arc<dyn Dynamics> {
    Arc::new(NearHoverQuadNoYaw::new(&[-0.1, -0.1, 7.81], &[0.1, 0.1, 11.81]).unwrap())
}

fn value_fn(id: u32, speed: f64) -> Arc<dyn ValueFunction> {
    let params = PointMassParams {
        id,
        max_planner_speed_ms: [speed; 3],
        expansion_vel_ms: [0.1; 3],
        max_vel_disturbance_ms: [0.1; 3],
        max_acc_disturbance_ms2: [0.1; 3],
    };
    Arc::new(PointMassValueFunction::new(&params, quad()).unwrap())
}

#[test]
fn lift_then_puncture_is_identity() {
    let q = quad();

    for p in &[
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(-3.5, 2.25, 100.0),
        Vector3::new(1e-9, -1e6, 7.0),
    ] {
        let states = q.lift_geometric_trajectory(&[*p], &[4.0]);
        assert_eq!(states.len(), 1);
        assert_eq!(q.puncture(&states[0]), *p);
    }
}

#[test]
fn tracking_bound_is_independent_of_state() {
    let vf = value_fn(0, 1.0);
    let slow = value_fn(1, 0.25);

    let before = vf.tracking_bounds();
    for axis in 0..3 {
        assert!(before[axis] >= 0.0);
    }

    // Evaluating the value function anywhere doesn't change the bound
    let q = vf.dynamics().clone();
    let mut s = q.zero_state();
    s[q.spatial_dimension(0)] = 12.0;
    s[q.velocity_dimension(2)] = -3.0;
    vf.value(&s);
    vf.optimal_control(&s);
    assert_eq!(vf.tracking_bounds(), before);

    // Slower planners get tighter bounds
    for axis in 0..3 {
        assert!(slow.tracking_bound(axis) < vf.tracking_bound(axis));
        assert_eq!(
            vf.switching_tracking_bound(axis, slow.as_ref()),
            slow.tracking_bound(axis)
        );
    }
}

#[test]
fn obstacles_are_reflexive_and_not_duplicated() {
    let space = BallsInBox::new(Vector3::repeat(-10.0), Vector3::repeat(10.0)).unwrap();
    let p = Vector3::new(1.0, 2.0, 3.0);

    space.add_obstacle(p, 0.5);
    assert!(space.is_obstacle(&p, 0.5));

    assert!(!space.insert_if_new(p, 0.5));
    assert_eq!(space.num_obstacles(), 1);

    // A zero radius obstacle matches itself too
    space.add_obstacle(Vector3::zeros(), 0.0);
    assert!(space.is_obstacle(&Vector3::zeros(), 0.0));
    assert_eq!(space.num_obstacles(), 2);
}

#[test]
fn sensing_includes_the_boundary() {
    let space = BallsInBox::new(Vector3::repeat(-10.0), Vector3::repeat(10.0)).unwrap();
    space.add_obstacle(Vector3::new(4.0, 0.0, 0.0), 1.5);

    // Distance 4 is exactly 1.5 + 2.5
    assert_eq!(space.sense_obstacles(&Vector3::zeros(), 2.5).len(), 1);
    assert!(space.sense_obstacles(&Vector3::zeros(), 2.4).is_empty());
}

#[test]
fn validity_near_obstacles_and_faces() {
    let vf = value_fn(0, 1.0);
    let space = BallsInBox::new(Vector3::repeat(-10.0), Vector3::repeat(10.0)).unwrap();
    let centre = Vector3::new(3.0, -2.0, 1.0);
    space.add_obstacle(centre, 1.0);

    assert!(!space.is_valid(&centre, vf.as_ref(), vf.as_ref()));

    // Clear of the obstacle by more than the radius plus the bound's diagonal
    let clearance = 1.0 + vf.tracking_bounds().norm() + 1e-6;
    let far = centre + Vector3::new(0.0, 0.0, clearance);
    assert!(space.is_valid(&far, vf.as_ref(), vf.as_ref()));

    // Tube crossing a face of the box
    let bound_x = vf.tracking_bound(0);
    assert!(!space.is_valid(
        &Vector3::new(10.0 - 0.5 * bound_x, 0.0, 0.0),
        vf.as_ref(),
        vf.as_ref()
    ));
    assert!(space.is_valid(
        &Vector3::new(10.0 - 1.5 * bound_x, 0.0, 0.0),
        vf.as_ref(),
        vf.as_ref()
    ));
}

#[test]
fn value_is_continuous_along_position() {
    let vf = value_fn(0, 1.0);
    let q = vf.dynamics().clone();

    // Sweep through both parabolas on every axis with a fixed velocity
    for axis in 0..3 {
        let mut prev: Option<f64> = None;
        let mut x = -4.0;
        while x <= 4.0 {
            let mut s = q.zero_state();
            s[q.spatial_dimension(axis)] = x;
            s[q.velocity_dimension(axis)] = 0.7;
            let v = vf.value(&s);

            if let Some(p) = prev {
                assert_relative_eq!(v, p, epsilon = 1e-3);
            }
            prev = Some(v);
            x += 1e-4;
        }
    }
}
