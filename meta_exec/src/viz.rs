//! # Visualisation sinks
//!
//! The tracker, trajectory and collision space publish markers to a `VizSink`. Publishing is
//! fire-and-forget, and producers check `has_subscribers` first so that building markers is
//! skipped when nobody is listening.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{collections::HashMap, sync::Mutex};

use comms_if::{Colour, Marker, VizChannel};
use log::warn;
use util::session;

use crate::value_fn::ValueFunctionId;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Colours assigned to value function ids, cycled.
const VALUE_FN_PALETTE: [Colour; 6] = [
    Colour::new(0.0, 0.6, 1.0, 1.0),
    Colour::new(1.0, 0.4, 0.0, 1.0),
    Colour::new(0.2, 0.8, 0.2, 1.0),
    Colour::new(0.8, 0.2, 0.8, 1.0),
    Colour::new(1.0, 0.9, 0.1, 1.0),
    Colour::new(0.5, 0.5, 0.5, 1.0),
];

pub const ENVIRONMENT_BOX_COLOUR: Colour = Colour::new(0.3, 0.3, 0.3, 0.1);
pub const OBSTACLE_COLOUR: Colour = Colour::new(0.8, 0.1, 0.1, 0.5);
pub const TRACKING_BOUND_COLOUR: Colour = Colour::new(0.1, 0.9, 0.3, 0.4);

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A display that accepts markers on the three visualisation channels.
pub trait VizSink: Send + Sync {
    /// True if anybody is listening on the channel.
    fn has_subscribers(&self, channel: VizChannel) -> bool;

    fn publish(&self, channel: VizChannel, marker: Marker);
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A sink with no subscribers.
#[derive(Debug, Default, Copy, Clone)]
pub struct NullVizSink;

/// A sink which keeps the latest marker for every `(channel, ns, id)`, so that it always holds
/// the current scene.
#[derive(Debug, Default)]
pub struct SceneVizSink {
    scene: Mutex<HashMap<(VizChannel, String, usize), Marker>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VizSink for NullVizSink {
    fn has_subscribers(&self, _channel: VizChannel) -> bool {
        false
    }

    fn publish(&self, _channel: VizChannel, _marker: Marker) {}
}

impl SceneVizSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current markers on a channel, ordered by namespace then id.
    pub fn markers(&self, channel: VizChannel) -> Vec<Marker> {
        let scene = match self.scene.lock() {
            Ok(s) => s,
            Err(e) => e.into_inner(),
        };

        let mut markers: Vec<Marker> = scene
            .iter()
            .filter(|((c, _, _), _)| *c == channel)
            .map(|(_, m)| m.clone())
            .collect();
        markers.sort_by(|a, b| a.ns.cmp(&b.ns).then(a.id.cmp(&b.id)));

        markers
    }

    /// Save the current scene into the session, one `{topic}.json` file per channel.
    pub fn save(&self, topics: &[(VizChannel, &str)]) {
        for (channel, topic) in topics {
            session::save(format!("{}.json", topic), self.markers(*channel));
        }
    }
}

impl VizSink for SceneVizSink {
    fn has_subscribers(&self, _channel: VizChannel) -> bool {
        true
    }

    fn publish(&self, channel: VizChannel, marker: Marker) {
        match self.scene.lock() {
            Ok(mut scene) => {
                scene.insert((channel, marker.ns.clone(), marker.id), marker);
            }
            Err(_) => warn!("Scene lock poisoned, marker on {:?} dropped", channel),
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Display colour of a value function.
pub fn value_fn_colour(id: ValueFunctionId) -> Colour {
    VALUE_FN_PALETTE[id.0 as usize % VALUE_FN_PALETTE.len()]
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
