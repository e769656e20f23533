//! Tracker parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

use crate::value_fn::PointMassParams;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerParams {
    /// Period of the control loop
    pub time_step_s: f64,

    pub control_dim: usize,
    /// Control bounds, `[pitch, roll, thrust]`
    pub control_lower: Vec<f64>,
    pub control_upper: Vec<f64>,

    pub state_dim: usize,
    /// State bounds, the spatial components of which bound the environment
    pub state_lower: Vec<f64>,
    pub state_upper: Vec<f64>,

    /// Start position, the centre of the environment if not given
    #[serde(default)]
    pub start_m: Option<[f64; 3]>,

    /// Goal position. If not given it is placed `goal_margin_m` inside the upper bound.
    #[serde(default)]
    pub goal_m: Option<[f64; 3]>,
    pub goal_margin_m: f64,

    /// Distance from the goal within which the vehicle holds position instead of replanning
    pub goal_tolerance_m: f64,

    /// Replan on a background worker rather than in the sensing callback
    pub background_replanning: bool,

    pub topics: TopicParams,
    pub frames: FrameParams,

    /// Value functions, one per planner, in planner priority order
    pub value_functions: Vec<PointMassParams>,
}

/// Names of the output streams.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicParams {
    pub control: String,
    pub sensor: String,
    pub environment: String,
    pub trajectory: String,
    pub tracking_bound: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameParams {
    pub fixed: String,
    pub tracker: String,
    pub planner: String,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrackerParams {
    /// Check the parameters are complete and dimensionally consistent, returning a description of
    /// the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.time_step_s > 0.0) || !self.time_step_s.is_finite() {
            return Err(format!("time step must be positive, got {}", self.time_step_s));
        }

        check_bounds("control", self.control_dim, &self.control_lower, &self.control_upper)?;
        check_bounds("state", self.state_dim, &self.state_lower, &self.state_upper)?;

        if !(self.goal_tolerance_m >= 0.0) {
            return Err(format!(
                "goal tolerance must be non-negative, got {}",
                self.goal_tolerance_m
            ));
        }

        if self.value_functions.is_empty() {
            return Err("at least one value function is required".into());
        }

        for (i, vf) in self.value_functions.iter().enumerate() {
            if self.value_functions[..i].iter().any(|other| other.id == vf.id) {
                return Err(format!("value function id {} is used more than once", vf.id));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn check_bounds(name: &str, dim: usize, lower: &[f64], upper: &[f64]) -> Result<(), String> {
    if lower.len() != dim || upper.len() != dim {
        return Err(format!(
            "{} bounds must have {} elements, got {} lower and {} upper",
            name,
            dim,
            lower.len(),
            upper.len()
        ));
    }

    for (i, (lo, hi)) in lower.iter().zip(upper.iter()).enumerate() {
        if !lo.is_finite() || !hi.is_finite() || lo > hi {
            return Err(format!("{} bound {} is invalid: [{}, {}]", name, i, lo, hi));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
