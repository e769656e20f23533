//! # Localisation
//!
//! The tracker reads the true position of the vehicle from a [`PoseSource`] every control tick.
//! The lookup is keyed by the fixed frame and the tracker frame, and may fail, in which case the
//! tracker skips the tick.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use std::{
    fmt::Debug,
    sync::{Arc, RwLock},
};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

pub trait PoseSource: Debug + Send {
    /// Latest position of `child_frame` in `fixed_frame`.
    fn lookup(&self, fixed_frame: &str, child_frame: &str) -> Result<Vector3<f64>, LocError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A pose source holding the last position set by its producer.
///
/// Cloning gives another handle on the same position, so that a producer (for instance the
/// simulator) can keep one handle and give the other to the tracker.
#[derive(Debug, Clone, Default)]
pub struct PoseStore {
    position: Arc<RwLock<Option<Vector3<f64>>>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LocError {
    #[error("No position of {child} in {fixed} is available")]
    NoPose { fixed: String, child: String },

    #[error("The position store is poisoned")]
    Poisoned,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position(&self, position: Vector3<f64>) {
        if let Ok(mut p) = self.position.write() {
            *p = Some(position);
        }
    }

    /// Forget the position, later lookups fail until a new one is set.
    pub fn clear(&self) {
        if let Ok(mut p) = self.position.write() {
            *p = None;
        }
    }

    pub fn get_position(&self) -> Option<Vector3<f64>> {
        self.position.read().ok().and_then(|p| *p)
    }
}

impl PoseSource for PoseStore {
    fn lookup(&self, fixed_frame: &str, child_frame: &str) -> Result<Vector3<f64>, LocError> {
        let position = self.position.read().map_err(|_| LocError::Poisoned)?;

        (*position).ok_or_else(|| LocError::NoPose {
            fixed: fixed_frame.into(),
            child: child_frame.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
