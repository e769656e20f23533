//! Near hover quadrotor model, without yaw.
//!
//! State is `[x, vx, y, vy, z, vz]` and control is `[pitch, roll, thrust]`, with pitch and roll in
//! radians and thrust as an acceleration in m/s^2:
//!
//! ```text
//! ddx = G tan(pitch)
//! ddy = G tan(roll)
//! ddz = thrust - G
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;

use super::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const STATE_DIM: usize = 6;
const CONTROL_DIM: usize = 3;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NearHoverQuadNoYaw {
    control_lower: Control,
    control_upper: Control,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NearHoverQuadNoYaw {
    /// Create a new model with the given control bounds (`[pitch, roll, thrust]`).
    pub fn new(control_lower: &[f64], control_upper: &[f64]) -> Result<Self, DynamicsError> {
        for bounds in &[control_lower, control_upper] {
            if bounds.len() != CONTROL_DIM {
                return Err(DynamicsError::ControlDimMismatch {
                    expected: CONTROL_DIM,
                    found: bounds.len(),
                });
            }
        }

        for i in 0..CONTROL_DIM {
            let (lo, hi) = (control_lower[i], control_upper[i]);
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(DynamicsError::InvalidControlBound(i));
            }
        }

        Ok(Self {
            control_lower: Control::from_column_slice(control_lower),
            control_upper: Control::from_column_slice(control_upper),
        })
    }
}

impl Dynamics for NearHoverQuadNoYaw {
    fn state_dim(&self) -> usize {
        STATE_DIM
    }

    fn control_dim(&self) -> usize {
        CONTROL_DIM
    }

    fn control_lower(&self) -> &Control {
        &self.control_lower
    }

    fn control_upper(&self) -> &Control {
        &self.control_upper
    }

    fn evaluate(&self, state: &State, control: &Control) -> State {
        let mut x_dot = State::zeros(STATE_DIM);

        x_dot[0] = state[1];
        x_dot[1] = G_MS2 * control[0].tan();
        x_dot[2] = state[3];
        x_dot[3] = G_MS2 * control[1].tan();
        x_dot[4] = state[5];
        x_dot[5] = control[2] - G_MS2;

        x_dot
    }

    fn puncture(&self, state: &State) -> Vector3<f64> {
        Vector3::new(state[0], state[2], state[4])
    }

    fn spatial_dimension(&self, axis: usize) -> usize {
        2 * axis
    }

    fn velocity_dimension(&self, axis: usize) -> usize {
        2 * axis + 1
    }

    /// Velocities are the forward difference to the next waypoint. The final waypoint is at rest.
    fn lift_geometric_trajectory(
        &self,
        positions: &[Vector3<f64>],
        times_s: &[f64],
    ) -> Vec<State> {
        let num = positions.len().min(times_s.len());
        let mut states = Vec::with_capacity(num);

        for i in 0..num {
            let mut state = self.state_at_rest(&positions[i]);

            if i + 1 < num {
                let dt = times_s[i + 1] - times_s[i];
                if dt > 0.0 {
                    let vel = (positions[i + 1] - positions[i]) / dt;
                    for axis in 0..NUM_SPATIAL_AXES {
                        state[self.velocity_dimension(axis)] = vel[axis];
                    }
                }
            }

            states.push(state);
        }

        states
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn quad() -> NearHoverQuadNoYaw {
        NearHoverQuadNoYaw::new(&[-0.1, -0.1, 7.81], &[0.1, 0.1, 11.81]).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_bounds() {
        assert!(matches!(
            NearHoverQuadNoYaw::new(&[-0.1, -0.1], &[0.1, 0.1]),
            Err(DynamicsError::ControlDimMismatch { expected: 3, found: 2 })
        ));
        assert!(matches!(
            NearHoverQuadNoYaw::new(&[-0.1, 0.2, 7.81], &[0.1, 0.1, 11.81]),
            Err(DynamicsError::InvalidControlBound(1))
        ));
    }

    #[test]
    fn test_evaluate() {
        let q = quad();
        let x = State::from_column_slice(&[1.0, 0.5, 2.0, -0.5, 3.0, 0.25]);

        // Hover
        let x_dot = q.evaluate(&x, &Control::from_column_slice(&[0.0, 0.0, G_MS2]));
        assert_relative_eq!(x_dot[0], 0.5);
        assert_relative_eq!(x_dot[1], 0.0);
        assert_relative_eq!(x_dot[2], -0.5);
        assert_relative_eq!(x_dot[3], 0.0);
        assert_relative_eq!(x_dot[4], 0.25);
        assert_relative_eq!(x_dot[5], 0.0);

        // Full tilt
        let x_dot = q.evaluate(&x, q.control_upper());
        assert_relative_eq!(x_dot[1], G_MS2 * 0.1f64.tan());
        assert_relative_eq!(x_dot[3], G_MS2 * 0.1f64.tan());
        assert_relative_eq!(x_dot[5], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_puncture_and_dimensions() {
        let q = quad();
        let x = State::from_column_slice(&[1.0, 0.5, 2.0, -0.5, 3.0, 0.25]);
        assert_eq!(q.puncture(&x), Vector3::new(1.0, 2.0, 3.0));

        for axis in 0..NUM_SPATIAL_AXES {
            assert_eq!(x[q.spatial_dimension(axis)], q.puncture(&x)[axis]);
        }
        assert_eq!(q.velocity_dimension(2), 5);
    }

    #[test]
    fn test_lift() {
        let q = quad();
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, -2.0),
            Vector3::new(1.0, 1.0, -2.0),
        ];
        let times = vec![0.0, 2.0, 3.0];

        let states = q.lift_geometric_trajectory(&positions, &times);
        assert_eq!(states.len(), 3);

        assert_relative_eq!(states[0][1], 0.5);
        assert_relative_eq!(states[0][5], -1.0);
        assert_relative_eq!(states[1][3], 1.0);

        // Last state at rest
        assert_eq!(states[2][1], 0.0);
        assert_eq!(states[2][3], 0.0);
        assert_eq!(states[2][5], 0.0);

        // Positions preserved
        for (s, p) in states.iter().zip(positions.iter()) {
            assert_eq!(q.puncture(s), *p);
        }
    }

    #[test]
    fn test_integrate() {
        let q = quad();
        let x = q.state_at_rest(&Vector3::new(0.0, 0.0, 5.0));
        let x_next = q.integrate(&x, &Control::from_column_slice(&[0.0, 0.0, 0.0]), 0.1);
        assert_relative_eq!(x_next[5], -0.981, epsilon = 1e-12);
        assert_relative_eq!(x_next[4], 5.0);
    }
}
