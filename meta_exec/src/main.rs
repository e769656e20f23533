//! Main meta planning executable entry point.
//!
//! # Architecture
//!
//! The executable closes the loop between the tracker and a simulated vehicle and sensor:
//!
//!     - Initialise the session, logging and parameters
//!     - Initialise the tracker, which plans the initial trajectory
//!     - Initialise the simulated vehicle and sensor in the tracker's environment
//!     - Main loop, in simulated time:
//!         - Tracker control tick
//!         - Sensor processing, passing every observation to the tracker
//!         - Vehicle integration under the latest demand
//!         - Telemetry archiving
//!     - Save the final scene and exit once the goal is held or the duration has elapsed

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use comms_if::{ControlDemand, VizChannel};
use log::{debug, info, warn};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

// Internal
use meta_lib::{
    dynamics::Control,
    nav::{GeometricPlannerParams, MetaPlannerParams},
    sim::{SimParams, SimSensor, SimVehicle},
    tracker::{PoseStore, TickInput, Tracker, TrackerInitData, TrackerMode, TrackerParams},
    viz::SceneVizSink,
};
use util::{
    archive::Archiver,
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of consecutive cycle overruns after which a warning is issued.
const MAX_CONSEC_CYCLE_OVERRUNS: u64 = 5;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ExecParams {
    /// Wall clock period of one cycle, zero to run as fast as possible
    cycle_period_s: f64,

    /// Time the goal must be held for before exiting
    goal_hold_exit_s: f64,

    /// Per module log level limits
    #[serde(default)]
    log_levels: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session =
        Session::new("meta_exec", "sessions").wrap_err("Failed to create the session")?;

    // The exec parameters configure logging so are loaded first
    let exec_params: ExecParams =
        util::params::load("meta_exec.toml").wrap_err("Could not load exec params")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &exec_params.log_levels, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Meta Planning Executable\n");
    info!("Running on: {}", host::get_host_info());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let tracker_params: TrackerParams =
        util::params::load("tracker.toml").wrap_err("Could not load tracker params")?;
    let planner_params: GeometricPlannerParams =
        util::params::load("planner.toml").wrap_err("Could not load planner params")?;
    let meta_planner_params: MetaPlannerParams =
        util::params::load("meta_planner.toml").wrap_err("Could not load meta planner params")?;
    let sim_params: SimParams =
        util::params::load("sim.toml").wrap_err("Could not load sim params")?;

    // Checked here so a bad file is reported before anything is built from it
    tracker_params
        .validate()
        .map_err(|e| eyre!("Invalid tracker params: {}", e))?;
    planner_params
        .validate()
        .map_err(|e| eyre!("Invalid planner params: {}", e))?;
    meta_planner_params
        .validate()
        .map_err(|e| eyre!("Invalid meta planner params: {}", e))?;

    info!("Parameters loaded");

    let dt_s = tracker_params.time_step_s;
    let topics = tracker_params.topics.clone();

    // ---- INITIALISE TRACKER ----

    // The simulated vehicle publishes its position here once it exists
    let pose = PoseStore::new();
    let viz = Arc::new(SceneVizSink::new());
    let mut tracker = Tracker::default();

    tracker
        .init(
            TrackerInitData {
                params: tracker_params,
                planner_params,
                meta_planner_params,
                pose_source: Box::new(pose.clone()),
                viz: viz.clone(),
                start_time_s: 0.0,
            },
            Some(&session),
        )
        .wrap_err("Failed to initialise the tracker")?;
    info!("Tracker init complete, mode is {}", tracker.mode().name());

    // ---- INITIALISE SIMULATION ----

    // Built from the tracker so the simulation matches the validated configuration
    let (dynamics, space, start) = match (tracker.dynamics(), tracker.space(), tracker.position())
    {
        (Some(d), Some(s), Some(p)) => (d, s, p),
        _ => return Err(eyre!("The tracker is not initialised")),
    };
    let (lower, upper) = space.bounds();

    let mut vehicle = SimVehicle::new(
        dynamics,
        &start,
        sim_params.acc_disturbance_ms2,
        sim_params.seed,
        pose,
    );
    let sensor = SimSensor::new(lower, upper, &sim_params.obstacles, sim_params.sensor_range_m)
        .wrap_err("Failed to create the simulated sensor")?;

    info!(
        "Simulation initialised with {} obstacles, running for {:.1} s",
        sim_params.obstacles.len(),
        sim_params.duration_s
    );

    let mut arch_demands = Archiver::from_path(&session, format!("{}.csv", topics.control))
        .wrap_err("Failed to create the demand archive")?;

    // ---- MAIN LOOP ----

    info!("Beginning main loop\n");

    let mut time_s = 0.0;
    let mut control: Control = SimVehicle::hover_control();
    let mut goal_held_since_s: Option<f64> = None;
    let mut num_consec_cycle_overruns = 0u64;

    while time_s <= sim_params.duration_s {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // ---- CONTROL ----

        let (demand, report) = tracker
            .proc(&TickInput { time_s })
            .wrap_err("Error during tracker processing")?;

        // Hold the last demand when no new one is produced
        match demand {
            Some(d) => {
                debug!("{:8.3} s: {}", time_s, fmt_demand(&d));
                control = Control::from_column_slice(&d.to_array());
                arch_demands
                    .serialise(d)
                    .wrap_err("Failed to archive the control demand")?;
            }
            None => debug!("No demand this tick, holding {:?}", control.as_slice()),
        }

        // ---- SENSING ----

        for obs in sensor.sense(&vehicle.position()) {
            tracker
                .on_obstacle(&obs, time_s)
                .wrap_err("Error while processing an obstacle observation")?;
        }

        // ---- SIMULATION ----

        vehicle.step(&control, dt_s);

        // ---- EXIT CONDITIONS ----

        if report.goal_held {
            let since = *goal_held_since_s.get_or_insert(time_s);
            if time_s - since >= exec_params.goal_hold_exit_s {
                info!("Goal held for {:.2} s, stopping", time_s - since);
                break;
            }
        } else {
            goal_held_since_s = None;
        }

        // ---- CYCLE MANAGEMENT ----

        time_s += dt_s;

        let cycle_dur = Instant::now() - cycle_start_instant;

        match Duration::from_secs_f64(exec_params.cycle_period_s.max(0.0)).checked_sub(cycle_dur) {
            Some(d) => {
                num_consec_cycle_overruns = 0;
                thread::sleep(d)
            }
            None => {
                if exec_params.cycle_period_s > 0.0 {
                    num_consec_cycle_overruns += 1;
                }

                if num_consec_cycle_overruns == MAX_CONSEC_CYCLE_OVERRUNS {
                    warn!(
                        "{} consecutive cycle overruns, last cycle took {:.6} s",
                        num_consec_cycle_overruns,
                        cycle_dur.as_secs_f64()
                    );
                }
            }
        }
    }

    // ---- SHUTDOWN ----

    let end = vehicle.position();
    info!(
        "Simulation ended at {:.2} s in mode {}, {} replans, vehicle at {:?}",
        time_s,
        tracker.mode().name(),
        tracker.num_replans(),
        end.as_slice()
    );

    if tracker.mode() != TrackerMode::Tracking {
        warn!("Tracker finished in mode {}", tracker.mode().name());
    }
    if let Some(goal) = tracker.goal() {
        info!("Distance to goal: {:.3} m", (goal - end).norm());
    }

    viz.save(&[
        (VizChannel::Environment, topics.environment.as_str()),
        (VizChannel::Trajectory, topics.trajectory.as_str()),
        (VizChannel::TrackingBound, topics.tracking_bound.as_str()),
    ]);

    // Stop the replanning worker before the session's save thread
    drop(tracker);
    session.exit();

    Ok(())
}

/// Format a demand compactly for the log.
fn fmt_demand(d: &ControlDemand) -> String {
    format!(
        "pitch = {:+.4} rad, roll = {:+.4} rad, thrust = {:.3} m/s^2",
        d.pitch_rad, d.roll_rad, d.thrust_ms2
    )
}
