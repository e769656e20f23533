//! Closed form point mass value function.
//!
//! Each spatial axis is treated independently as a double integrator pursuing a planner moving at
//! up to `v_ref`. For relative position `x` and velocity `v` on an axis two parabolic surfaces are
//! defined, the acceleration surface `V_A` and the braking surface `V_B`:
//!
//! ```text
//! V_A =  x' + (0.5 (v - v_ref)^2 - v_ref^2 (1 + e)) / (a_max - d_a),   x' = -x
//! V_B =  x  - (-0.5 (v + v_ref)^2 + v_ref^2 (1 + e)) / (a_max - d_a)
//! ```
//!
//! The value on an axis is the larger of the two, and the overall value the largest over the axes.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use std::sync::Arc;
use util::maths::{clamp, floor_magnitude};

use super::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Smallest magnitude allowed for any denominator.
const DENOMINATOR_EPSILON: f64 = 1e-8;

/// Fraction of the zero state value above which the priority starts to fall.
const PRIORITY_HIGH_FRACTION: f64 = 0.20;

/// Fraction of the zero state value below which the priority is zero.
const PRIORITY_LOW_FRACTION: f64 = 0.05;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PointMassValueFunction {
    id: ValueFunctionId,
    dynamics: Arc<dyn Dynamics>,

    max_planner_speed: Vector3<f64>,
    d_v: Vector3<f64>,

    u_lower: Control,
    u_upper: Control,

    /// Acceleration available at full control, minus the disturbance bound, floored
    acc_margin: Vector3<f64>,

    /// Control to acceleration gain
    u_to_acc: Vector3<f64>,

    /// Tube expansion factor
    expand: Vector3<f64>,

    /// Priority thresholds, fractions of the value at the zero relative state
    priority_value_high: f64,
    priority_value_low: f64,
}

/// The two candidate surfaces on one axis.
#[derive(Debug, Copy, Clone)]
struct AxisSurfaces {
    x: f64,
    v: f64,
    v_a: f64,
    v_b: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PointMassValueFunction {
    /// Create a new value function.
    ///
    /// The maximum acceleration and control gain on each axis are found by evaluating `dynamics`
    /// at the zero state under its upper control bound. Axis `i` is driven by control channel
    /// `i`.
    pub fn new(
        params: &PointMassParams,
        dynamics: Arc<dyn Dynamics>,
    ) -> Result<Self, ValueFunctionError> {
        if dynamics.state_dim() != 2 * NUM_SPATIAL_AXES {
            return Err(ValueFunctionError::DimensionMismatch {
                what: "state",
                expected: 2 * NUM_SPATIAL_AXES,
                found: dynamics.state_dim(),
            });
        }
        if dynamics.control_dim() != NUM_SPATIAL_AXES {
            return Err(ValueFunctionError::DimensionMismatch {
                what: "control",
                expected: NUM_SPATIAL_AXES,
                found: dynamics.control_dim(),
            });
        }

        let max_planner_speed = Vector3::from(params.max_planner_speed_ms);
        let expansion_vel = Vector3::from(params.expansion_vel_ms);
        let d_v = Vector3::from(params.max_vel_disturbance_ms);
        let d_a = Vector3::from(params.max_acc_disturbance_ms2);

        for axis in 0..NUM_SPATIAL_AXES {
            if !(max_planner_speed[axis] > 0.0) || !max_planner_speed[axis].is_finite() {
                return Err(ValueFunctionError::InvalidParam(format!(
                    "max planner speed on axis {} must be positive, got {}",
                    axis, max_planner_speed[axis]
                )));
            }
            for (name, val) in &[
                ("expansion velocity", expansion_vel[axis]),
                ("velocity disturbance", d_v[axis]),
                ("acceleration disturbance", d_a[axis]),
            ] {
                if !(*val >= 0.0) || !val.is_finite() {
                    return Err(ValueFunctionError::InvalidParam(format!(
                        "{} on axis {} must be non-negative, got {}",
                        name, axis, val
                    )));
                }
            }
        }

        let u_lower = dynamics.control_lower().clone();
        let u_upper = dynamics.control_upper().clone();

        // Acceleration under full control from rest
        let x_dot_max = dynamics.evaluate(&dynamics.zero_state(), &u_upper);

        let mut acc_margin = Vector3::zeros();
        let mut u_to_acc = Vector3::zeros();
        let mut expand = Vector3::zeros();

        for axis in 0..NUM_SPATIAL_AXES {
            let acc = x_dot_max[dynamics.velocity_dimension(axis)];
            let a_max = acc.abs();

            if a_max <= d_a[axis] {
                return Err(ValueFunctionError::InsufficientControlAuthority {
                    axis,
                    a_max,
                    d_a: d_a[axis],
                });
            }

            acc_margin[axis] = floor_magnitude(a_max - d_a[axis], DENOMINATOR_EPSILON);
            u_to_acc[axis] = acc
                / floor_magnitude(0.5 * (u_upper[axis] - u_lower[axis]), DENOMINATOR_EPSILON);
            expand[axis] = expansion_vel[axis]
                * (2.0 * max_planner_speed[axis] + 0.5 * expansion_vel[axis])
                / acc_margin[axis];
        }

        let mut vf = Self {
            id: ValueFunctionId(params.id),
            dynamics,
            max_planner_speed,
            d_v,
            u_lower,
            u_upper,
            acc_margin,
            u_to_acc,
            expand,
            priority_value_high: 0.0,
            priority_value_low: 0.0,
        };

        // TODO: thresholds should be fractions of the largest value over the safe set, not of
        // the value at the zero relative state. Kept until the blending heuristic is revisited.
        let v_zero = vf.value(&vf.dynamics.zero_state());
        vf.priority_value_high = PRIORITY_HIGH_FRACTION * v_zero;
        vf.priority_value_low = PRIORITY_LOW_FRACTION * v_zero;

        Ok(vf)
    }

    /// Control to acceleration gain on `axis`.
    pub fn control_to_acc(&self, axis: usize) -> f64 {
        self.u_to_acc[axis]
    }

    fn surfaces(&self, axis: usize, relative_state: &State) -> AxisSurfaces {
        let x = relative_state[self.dynamics.spatial_dimension(axis)];
        let v = relative_state[self.dynamics.velocity_dimension(axis)];
        let v_ref = self.max_planner_speed[axis];
        let den = self.acc_margin[axis];
        let reach = v_ref * v_ref * (1.0 + self.expand[axis]);

        AxisSurfaces {
            x,
            v,
            v_a: -x + (0.5 * (v - v_ref).powi(2) - reach) / den,
            v_b: x - (-0.5 * (v + v_ref).powi(2) + reach) / den,
        }
    }
}

impl ValueFunction for PointMassValueFunction {
    fn id(&self) -> ValueFunctionId {
        self.id
    }

    fn dynamics(&self) -> &Arc<dyn Dynamics> {
        &self.dynamics
    }

    fn value(&self, relative_state: &State) -> f64 {
        (0..NUM_SPATIAL_AXES)
            .map(|axis| {
                let s = self.surfaces(axis, relative_state);
                s.v_a.max(s.v_b)
            })
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn gradient(&self, relative_state: &State) -> State {
        let mut grad = State::zeros(self.dynamics.state_dim());

        for axis in 0..NUM_SPATIAL_AXES {
            let s = self.surfaces(axis, relative_state);
            let v_ref = self.max_planner_speed[axis];
            let pos_dim = self.dynamics.spatial_dimension(axis);
            let vel_dim = self.dynamics.velocity_dimension(axis);

            // Ties go to the braking surface
            if s.v_a > s.v_b {
                grad[pos_dim] = -1.0;
                grad[vel_dim] = (s.v - v_ref) / self.acc_margin[axis];
            } else {
                grad[pos_dim] = 1.0;
                grad[vel_dim] = (s.v + v_ref) / self.acc_margin[axis];
            }
        }

        grad
    }

    fn optimal_control(&self, relative_state: &State) -> Control {
        let mut u = Control::zeros(self.dynamics.control_dim());

        for axis in 0..NUM_SPATIAL_AXES {
            let s = self.surfaces(axis, relative_state);

            let (u_acc, u_dec) = if self.u_to_acc[axis] > 0.0 {
                (self.u_upper[axis], self.u_lower[axis])
            } else {
                (self.u_lower[axis], self.u_upper[axis])
            };

            // Ahead of the reference: brake if the acceleration surface can still catch us.
            // Behind: accelerate if the braking surface can.
            u[axis] = if s.x >= 0.0 {
                if s.v_a < 0.0 {
                    u_dec
                } else {
                    u_acc
                }
            } else if s.v_b < 0.0 {
                u_acc
            } else {
                u_dec
            };
        }

        u
    }

    fn priority(&self, relative_state: &State) -> f64 {
        let v = self.value(relative_state);
        let span = floor_magnitude(
            self.priority_value_high - self.priority_value_low,
            DENOMINATOR_EPSILON,
        );

        1.0 - clamp(&((v - self.priority_value_low) / span), &0.0, &1.0)
    }

    fn tracking_bound(&self, axis: usize) -> f64 {
        let v = self.max_planner_speed[axis] + self.d_v[axis];
        0.5 * v * v * (1.0 + self.expand[axis]) / self.acc_margin[axis]
    }

    /// The tube of the incoming value function is kept through the switch.
    fn switching_tracking_bound(&self, axis: usize, incoming: &dyn ValueFunction) -> f64 {
        incoming.tracking_bound(axis)
    }

    fn max_planner_speed(&self, axis: usize) -> f64 {
        self.max_planner_speed[axis]
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::dynamics::{NearHoverQuadNoYaw, G_MS2};
    use approx::assert_relative_eq;

    fn quad() -> Arc<dyn Dynamics> {
        Arc::new(NearHoverQuadNoYaw::new(&[-0.1, -0.1, 7.81], &[0.1, 0.1, 11.81]).unwrap())
    }

    fn params(id: u32, speed: f64) -> PointMassParams {
        PointMassParams {
            id,
            max_planner_speed_ms: [speed; 3],
            expansion_vel_ms: [0.1; 3],
            max_vel_disturbance_ms: [0.1; 3],
            max_acc_disturbance_ms2: [0.1; 3],
        }
    }

    fn vf(id: u32, speed: f64) -> PointMassValueFunction {
        PointMassValueFunction::new(&params(id, speed), quad()).unwrap()
    }

    /// Relative state with the same position and velocity on every axis.
    fn rel(q: &Arc<dyn Dynamics>, x: [f64; 3], v: [f64; 3]) -> State {
        let mut s = q.zero_state();
        for axis in 0..3 {
            s[q.spatial_dimension(axis)] = x[axis];
            s[q.velocity_dimension(axis)] = v[axis];
        }
        s
    }

    #[test]
    fn test_new_rejects_bad_params() {
        let mut p = params(0, 1.0);
        p.max_acc_disturbance_ms2 = [0.1, 5.0, 0.1];
        assert!(matches!(
            PointMassValueFunction::new(&p, quad()),
            Err(ValueFunctionError::InsufficientControlAuthority { axis: 1, .. })
        ));

        let mut p = params(0, 1.0);
        p.max_planner_speed_ms = [1.0, 0.0, 1.0];
        assert!(matches!(
            PointMassValueFunction::new(&p, quad()),
            Err(ValueFunctionError::InvalidParam(_))
        ));

        let mut p = params(0, 1.0);
        p.max_vel_disturbance_ms = [1.0, f64::NAN, 1.0];
        assert!(PointMassValueFunction::new(&p, quad()).is_err());
    }

    #[test]
    fn test_derived_constants() {
        let v = vf(3, 1.0);
        assert_eq!(v.id(), ValueFunctionId(3));

        // Pitch of 0.1 rad over a half range of 0.1 rad
        assert_relative_eq!(v.control_to_acc(0), G_MS2 * 0.1f64.tan() / 0.1, epsilon = 1e-9);
        // Thrust of 2 m/s^2 over a half range of 2 m/s^2
        assert_relative_eq!(v.control_to_acc(2), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_value_zero_state_is_inside() {
        let v = vf(0, 1.0);
        let q = v.dynamics().clone();
        assert!(v.value(&q.zero_state()) < 0.0);

        // Large position error is outside on every axis
        assert!(v.value(&rel(&q, [10.0, 0.0, 0.0], [0.0; 3])) > 0.0);
        assert!(v.value(&rel(&q, [0.0, -10.0, 0.0], [0.0; 3])) > 0.0);
        assert!(v.value(&rel(&q, [0.0, 0.0, 10.0], [0.0; 3])) > 0.0);
    }

    #[test]
    fn test_value_worst_axis_dominates() {
        let v = vf(0, 1.0);
        let q = v.dynamics().clone();

        let only_x = v.value(&rel(&q, [5.0, 0.0, 0.0], [0.0; 3]));
        let all = v.value(&rel(&q, [5.0, 0.1, 0.1], [0.0; 3]));
        assert_relative_eq!(only_x, all, epsilon = 1e-12);
    }

    #[test]
    fn test_value_continuous_across_surfaces() {
        let v = vf(0, 1.0);
        let q = v.dynamics().clone();

        for &vel in &[-1.5, -0.5, 0.0, 0.3, 2.0] {
            // Find the crossing of V_A and V_B on the x axis
            let s0 = v.surfaces(0, &rel(&q, [0.0; 3], [vel, 0.0, 0.0]));
            // V_A = -x + a, V_B = x - b, so they cross at x = (a + b) / 2
            let a = s0.v_a;
            let b = -s0.v_b;
            let x_cross = 0.5 * (a + b);

            let below = v.value(&rel(&q, [x_cross - 1e-9, 0.0, 0.0], [vel, 0.0, 0.0]));
            let above = v.value(&rel(&q, [x_cross + 1e-9, 0.0, 0.0], [vel, 0.0, 0.0]));
            assert_relative_eq!(below, above, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_gradient() {
        let v = vf(0, 1.0);
        let q = v.dynamics().clone();

        // Far ahead on x (V_B larger), far behind on y (V_A larger)
        let s = rel(&q, [5.0, -5.0, 0.0], [0.5, 0.0, 0.0]);
        let g = v.gradient(&s);

        assert_eq!(g[q.spatial_dimension(0)], 1.0);
        assert_eq!(g[q.spatial_dimension(1)], -1.0);
        assert!(g[q.velocity_dimension(0)] > 0.0);
        assert!(g[q.velocity_dimension(1)] < 0.0);

        // Every axis contributes even though x and y dominate
        assert!(g[q.spatial_dimension(2)].abs() == 1.0);

        // Ties break toward braking
        let g0 = v.gradient(&q.zero_state());
        for axis in 0..3 {
            assert_eq!(g0[q.spatial_dimension(axis)], 1.0);
        }
    }

    #[test]
    fn test_optimal_control() {
        let v = vf(0, 1.0);
        let q = v.dynamics().clone();
        let lo = q.control_lower().clone();
        let hi = q.control_upper().clone();

        // At the origin V_A < 0 so the tracker brakes on every axis
        let u = v.optimal_control(&q.zero_state());
        assert_eq!(u, lo);

        // Ahead of the reference, brake
        let u = v.optimal_control(&rel(&q, [5.0; 3], [0.0; 3]));
        assert_eq!(u, lo);

        // Ahead but falling back fast, V_A > 0 so accelerate
        let u = v.optimal_control(&rel(&q, [0.01; 3], [-3.0; 3]));
        assert_eq!(u, hi);

        // Behind the reference, accelerate
        let u = v.optimal_control(&rel(&q, [-5.0; 3], [0.0; 3]));
        assert_eq!(u, hi);

        // Behind but closing fast, V_B > 0 so brake
        let u = v.optimal_control(&rel(&q, [-0.01; 3], [3.0; 3]));
        assert_eq!(u, lo);

        // Control is always at a bound
        for x in &[-3.0, -0.2, 0.0, 0.2, 3.0] {
            let u = v.optimal_control(&rel(&q, [*x; 3], [0.4, -0.4, 0.0]));
            for axis in 0..3 {
                assert!(u[axis] == lo[axis] || u[axis] == hi[axis]);
            }
        }
    }

    /// The thresholds are taken from the value at the zero relative state, which is negative, so
    /// the high threshold is below the low one. This is a known heuristic: the priority is 0 deep
    /// inside the tube and 1 near and beyond its edge.
    #[test]
    fn test_priority_known_heuristic() {
        let v = vf(0, 1.0);
        let q = v.dynamics().clone();

        assert_relative_eq!(v.priority(&q.zero_state()), 0.0);
        assert_relative_eq!(v.priority(&rel(&q, [10.0, 0.0, 0.0], [0.0; 3])), 1.0);

        for x in &[-2.0, -0.5, 0.0, 0.5, 2.0] {
            let p = v.priority(&rel(&q, [*x, 0.0, 0.0], [0.2, 0.0, 0.0]));
            assert!(p >= 0.0 && p <= 1.0);
        }
    }

    #[test]
    fn test_tracking_bound() {
        let v = vf(0, 1.0);
        let q = v.dynamics().clone();

        // Matches the closed form on the z axis, where a_max is exactly 2 m/s^2
        let margin: f64 = 2.0 - 0.1;
        let expand = 0.1 * (2.0 + 0.05) / margin;
        let expected = 0.5 * 1.1 * 1.1 * (1.0 + expand) / margin;
        assert_relative_eq!(v.tracking_bound(2), expected, epsilon = 1e-9);

        for axis in 0..3 {
            let b = v.tracking_bound(axis);
            assert!(b >= 0.0);

            // Independent of any relative state
            v.value(&rel(&q, [1.0; 3], [1.0; 3]));
            assert_eq!(b, v.tracking_bound(axis));
        }

        // Slower planners get tighter tubes
        let slow = vf(1, 0.5);
        for axis in 0..3 {
            assert!(slow.tracking_bound(axis) < v.tracking_bound(axis));
        }
    }

    #[test]
    fn test_switching_bound_uses_incoming() {
        let fast = vf(0, 2.0);
        let slow = vf(1, 0.5);

        for axis in 0..3 {
            assert_eq!(slow.switching_tracking_bound(axis, &fast), fast.tracking_bound(axis));
            assert_eq!(fast.switching_tracking_bound(axis, &slow), slow.tracking_bound(axis));
        }
        assert_eq!(slow.switching_tracking_bounds(&fast), fast.tracking_bounds());
    }
}
