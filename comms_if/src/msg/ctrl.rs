//! # Control Demands

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A control demand for a near-hover quadrotor, one per control tick.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Default)]
pub struct ControlDemand {
    /// Time at which the demand was computed, in seconds.
    pub time_s: f64,

    /// Demanded pitch angle in radians.
    pub pitch_rad: f64,

    /// Demanded roll angle in radians.
    pub roll_rad: f64,

    /// Demanded thrust, as an acceleration in m/s^2.
    pub thrust_ms2: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlDemand {
    /// Build a demand from a control vector ordered `[pitch, roll, thrust]`.
    ///
    /// Returns `None` if the slice doesn't have exactly three elements or if any element is not
    /// finite, so that a NaN demand can never be sent.
    pub fn from_slice(time_s: f64, control: &[f64]) -> Option<Self> {
        if control.len() != 3 || control.iter().any(|u| !u.is_finite()) {
            return None;
        }

        Some(Self {
            time_s,
            pitch_rad: control[0],
            roll_rad: control[1],
            thrust_ms2: control[2],
        })
    }

    /// Return the demand as a control vector ordered `[pitch, roll, thrust]`.
    pub fn to_array(&self) -> [f64; 3] {
        [self.pitch_rad, self.roll_rad, self.thrust_ms2]
    }
}
