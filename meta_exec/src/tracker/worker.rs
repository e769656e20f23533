//! Background replanning worker.
//!
//! The worker runs the meta planner so that the control loop keeps tracking the current
//! trajectory while a new one is computed. Each request carries the generation it was made at,
//! and its result is only adopted if no newer request has been made since. A plan that is
//! superseded while running is cancelled rather than run to completion.

// -----------------------------------------------------------------------------------------------
// INCLUDES
// -----------------------------------------------------------------------------------------------

use std::sync::{
    atomic::Ordering,
    mpsc::{Receiver, Sender},
    Arc,
};

use log::{debug, warn};
use nalgebra::Vector3;

use crate::nav::NavError;

use super::{Shared, TrackerError};

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

#[derive(Debug)]
pub enum WorkerSignal {
    /// The worker should stop it's operations
    Stop,

    /// Plan a new trajectory from `start` to `goal`, beginning at `start_time_s`
    Replan {
        generation: u64,
        start: Vector3<f64>,
        goal: Vector3<f64>,
        start_time_s: f64,
    },

    /// The trajectory of this generation has been adopted
    Complete(u64),

    /// The request was superseded by a newer one and its result thrown away
    Discarded(u64),

    /// The meta planner found no trajectory, the previous one is still in use
    Failed(u64, NavError),

    /// Unhandlable error
    Error(Box<TrackerError>),
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

pub(super) fn worker_thread(
    shared: Arc<Shared>,
    main_sender: Sender<WorkerSignal>,
    main_reciever: Receiver<WorkerSignal>,
) -> Result<(), TrackerError> {
    // Wait for commands from main
    while let Ok(signal) = main_reciever.recv() {
        match signal {
            WorkerSignal::Stop => break,
            WorkerSignal::Replan {
                generation,
                start,
                goal,
                start_time_s,
            } => {
                // Don't start work that is already out of date
                if generation != shared.generation.load(Ordering::SeqCst) {
                    debug!("Skipping replan {}, a newer one was requested", generation);
                    main_sender.send(WorkerSignal::Discarded(generation))?;
                    continue;
                }

                let is_superseded = || generation != shared.generation.load(Ordering::SeqCst);

                let traj = match shared.meta_planner.plan_cancellable(
                    &start,
                    &goal,
                    start_time_s,
                    &shared.planners,
                    is_superseded,
                ) {
                    Ok(t) => t,
                    Err(NavError::Cancelled) => {
                        debug!("Replan {} cancelled, a newer one was requested", generation);
                        main_sender.send(WorkerSignal::Discarded(generation))?;
                        continue;
                    }
                    Err(e) => {
                        main_sender.send(WorkerSignal::Failed(generation, e))?;
                        continue;
                    }
                };

                match shared.adopt(traj, generation) {
                    Ok(true) => main_sender.send(WorkerSignal::Complete(generation))?,
                    Ok(false) => main_sender.send(WorkerSignal::Discarded(generation))?,
                    Err(e) => main_sender.send(WorkerSignal::Error(Box::new(e)))?,
                }
            }
            s => warn!("Unexpected signal sent to the replanning worker: {:?}", s),
        }
    }

    Ok(())
}
