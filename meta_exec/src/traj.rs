//! # Trajectory
//!
//! A trajectory is a time ordered sequence of full states, each annotated with the value function
//! that is active from that sample until the next one. Trajectories are built by the planners,
//! concatenated by the meta planner, and then owned by the tracker which swaps in a new one
//! whenever it replans.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{Marker, MarkerShape, VizChannel};
use nalgebra::Vector3;
use serde::Serialize;
use std::sync::Arc;

use crate::{
    dynamics::{Dynamics, State},
    value_fn::{ValueFunction, ValueFunctionId},
    viz::{value_fn_colour, VizSink},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One sample of a trajectory.
#[derive(Debug, Clone)]
pub struct TrajSample {
    pub time_s: f64,
    pub state: State,

    /// Value function active from this sample onwards
    pub value_fn: Arc<dyn ValueFunction>,
}

#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    samples: Vec<TrajSample>,
}

/// Serialisable form of a trajectory for archiving.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectorySnapshot {
    pub times_s: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    pub value_fn_ids: Vec<ValueFunctionId>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TrajError {
    #[error("Got {times} times for {states} states")]
    LengthMismatch { times: usize, states: usize },

    #[error("Sample time {time_s} is not after the previous sample at {prev_time_s}")]
    NonIncreasingTime { time_s: f64, prev_time_s: f64 },

    #[error("Sample time {0} is not finite")]
    NonFiniteTime(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trajectory with a single value function from matching times and states.
    pub fn from_states(
        times_s: &[f64],
        states: Vec<State>,
        value_fn: &Arc<dyn ValueFunction>,
    ) -> Result<Self, TrajError> {
        if times_s.len() != states.len() {
            return Err(TrajError::LengthMismatch {
                times: times_s.len(),
                states: states.len(),
            });
        }

        let mut traj = Self::new();
        for (&time_s, state) in times_s.iter().zip(states.into_iter()) {
            traj.push(time_s, state, value_fn.clone())?;
        }

        Ok(traj)
    }

    /// Add a sample to the end of the trajectory. Times must be strictly increasing.
    pub fn push(
        &mut self,
        time_s: f64,
        state: State,
        value_fn: Arc<dyn ValueFunction>,
    ) -> Result<(), TrajError> {
        if !time_s.is_finite() {
            return Err(TrajError::NonFiniteTime(time_s));
        }

        if let Some(last) = self.samples.last() {
            if time_s <= last.time_s {
                return Err(TrajError::NonIncreasingTime {
                    time_s,
                    prev_time_s: last.time_s,
                });
            }
        }

        self.samples.push(TrajSample {
            time_s,
            state,
            value_fn,
        });

        Ok(())
    }

    /// Append `other` to the end of this trajectory.
    ///
    /// `other` is shifted in time so that it starts at this trajectory's last time. Its first
    /// sample replaces this trajectory's last one, so the junction takes the value function of
    /// the appended segment.
    pub fn append(&mut self, mut other: Trajectory) {
        let (last_time, other_first) = match (self.last_time(), other.first_time()) {
            (Some(l), Some(f)) => (l, f),
            (None, _) => {
                *self = other;
                return;
            }
            (_, None) => return,
        };

        other.shift_time(last_time - other_first);
        self.samples.pop();
        self.samples.extend(other.samples);
    }

    /// Shift every sample by `offset_s`.
    pub fn shift_time(&mut self, offset_s: f64) {
        for s in self.samples.iter_mut() {
            s.time_s += offset_s;
        }
    }

    pub fn samples(&self) -> &[TrajSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// A trajectory is valid if it has at least one sample and its times are strictly
    /// increasing.
    pub fn is_valid(&self) -> bool {
        !self.samples.is_empty()
            && self
                .samples
                .windows(2)
                .all(|w| w[1].time_s > w[0].time_s)
    }

    pub fn first_time(&self) -> Option<f64> {
        self.samples.first().map(|s| s.time_s)
    }

    pub fn last_time(&self) -> Option<f64> {
        self.samples.last().map(|s| s.time_s)
    }

    pub fn duration(&self) -> Option<f64> {
        Some(self.last_time()? - self.first_time()?)
    }

    /// The state at `time_s`, linearly interpolated between samples and clamped to the first and
    /// last samples outside of the trajectory's time span.
    pub fn get_state(&self, time_s: f64) -> Option<State> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;

        if time_s <= first.time_s {
            return Some(first.state.clone());
        }
        if time_s >= last.time_s {
            return Some(last.state.clone());
        }

        // Index of the first sample after `time_s`, which is at least 1 here
        let idx = self.samples.partition_point(|s| s.time_s <= time_s);
        let before = &self.samples[idx - 1];
        let after = &self.samples[idx];

        let frac = (time_s - before.time_s) / (after.time_s - before.time_s);

        Some(&before.state + (&after.state - &before.state) * frac)
    }

    /// The value function active at `time_s`, that of the last sample at or before `time_s`.
    /// Before the start of the trajectory the first sample's value function is used.
    pub fn get_value_function(&self, time_s: f64) -> Option<Arc<dyn ValueFunction>> {
        let idx = self.samples.partition_point(|s| s.time_s <= time_s);
        let sample = self.samples.get(idx.saturating_sub(1))?;

        Some(sample.value_fn.clone())
    }

    /// The positions of every sample.
    pub fn positions(&self, dynamics: &dyn Dynamics) -> Vec<Vector3<f64>> {
        self.samples
            .iter()
            .map(|s| dynamics.puncture(&s.state))
            .collect()
    }

    /// Ids of the value functions used, in order of first use.
    pub fn value_fn_ids(&self) -> Vec<ValueFunctionId> {
        let mut ids: Vec<ValueFunctionId> = Vec::new();
        for s in &self.samples {
            let id = s.value_fn.id();
            if ids.last() != Some(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn snapshot(&self) -> TrajectorySnapshot {
        TrajectorySnapshot {
            times_s: self.samples.iter().map(|s| s.time_s).collect(),
            states: self
                .samples
                .iter()
                .map(|s| s.state.iter().copied().collect())
                .collect(),
            value_fn_ids: self.samples.iter().map(|s| s.value_fn.id()).collect(),
        }
    }

    /// Publish the trajectory as one line strip per value function segment, coloured by value
    /// function.
    pub fn visualize(&self, sink: &dyn VizSink, frame_id: &str, dynamics: &dyn Dynamics, time_s: f64) {
        if !sink.has_subscribers(VizChannel::Trajectory) || self.samples.is_empty() {
            return;
        }

        let mut segment_id = 0;
        let mut points: Vec<[f64; 3]> = Vec::new();
        let mut current = self.samples[0].value_fn.id();

        for s in &self.samples {
            let point: [f64; 3] = dynamics.puncture(&s.state).into();
            let id = s.value_fn.id();

            if id != current {
                // Close the segment at the switching point so the strips join up
                points.push(point);
                publish_strip(sink, frame_id, time_s, segment_id, current, points);

                segment_id += 1;
                current = id;
                points = Vec::new();
            }

            points.push(point);
        }

        publish_strip(sink, frame_id, time_s, segment_id, current, points);
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn publish_strip(
    sink: &dyn VizSink,
    frame_id: &str,
    time_s: f64,
    segment_id: usize,
    value_fn_id: ValueFunctionId,
    points: Vec<[f64; 3]>,
) {
    sink.publish(
        VizChannel::Trajectory,
        Marker {
            ns: "trajectory".into(),
            id: segment_id,
            frame_id: frame_id.into(),
            time_s,
            shape: MarkerShape::LineStrip { points },
            colour: value_fn_colour(value_fn_id),
        },
    );
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
