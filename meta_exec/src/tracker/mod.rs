//! # Tracker
//!
//! The tracker is the real time control loop. Every control tick it:
//!
//! 1. Collects the results of any background replanning.
//! 2. Replans synchronously from the last known position if the current trajectory has run out,
//!    unless the vehicle is holding at the goal.
//! 3. Reads the true position of the vehicle, estimating velocity by finite difference.
//! 4. Looks up the reference state and the active value function on the trajectory.
//! 5. Outputs the optimal control for the relative state (true minus reference).
//! 6. Publishes the tracking bound, environment and trajectory for visualisation.
//!
//! Sensed obstacles are passed in through [`Tracker::on_obstacle`]. New obstacles are added to
//! the collision space and trigger a replan, either synchronously or on the background worker.
//!
//! The trajectory is shared with the worker behind a lock and only ever swapped whole, so a tick
//! always sees a complete trajectory. Each replan request takes a new generation number, and a
//! result is only adopted if its generation is still the latest when it completes.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod loc;
pub mod params;
mod worker;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{channel, Receiver, SendError, Sender, TryRecvError},
        Arc, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
};

use comms_if::{ControlDemand, Marker, MarkerShape, ObstacleObs, TrackerTm, VizChannel};
use log::{debug, error, info, trace, warn};
use nalgebra::Vector3;
use util::{
    archive::{ArchiveError, Archiver},
    maths::clamp,
    module::State as ModuleState,
    session::{self, Session},
};

use crate::{
    dynamics::{Dynamics, DynamicsError, NearHoverQuadNoYaw, State, NUM_SPATIAL_AXES},
    nav::{GeometricPlanner, GeometricPlannerParams, MetaPlanner, MetaPlannerParams, Planner},
    space::{BallsInBox, CollisionSpace, SpaceError},
    traj::Trajectory,
    value_fn::{PointMassValueFunction, ValueFunction, ValueFunctionError, ValueFunctionId},
    viz::{VizSink, TRACKING_BOUND_COLOUR},
};

pub use loc::{LocError, PoseSource, PoseStore};
pub use params::{FrameParams, TopicParams, TrackerParams};
pub use worker::WorkerSignal;
use worker::worker_thread;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The tracker. `Tracker::default()` is uninitialised, call `init` before use.
#[derive(Default)]
pub struct Tracker {
    mode: TrackerMode,

    /// Everything that exists once initialised
    core: Option<Core>,

    arch_status: Archiver,
}

/// Data needed to initialise the tracker.
pub struct TrackerInitData {
    pub params: TrackerParams,
    pub planner_params: GeometricPlannerParams,
    pub meta_planner_params: MetaPlannerParams,

    /// Where the true position of the vehicle is read from
    pub pose_source: Box<dyn PoseSource>,

    /// Where visualisation markers are published
    pub viz: Arc<dyn VizSink>,

    /// Time of the first sample of the initial trajectory
    pub start_time_s: f64,
}

/// Input to a control tick.
#[derive(Debug, Copy, Clone)]
pub struct TickInput {
    pub time_s: f64,
}

/// The status report containing various flags and monitoring quantities.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub time_s: f64,

    /// Mode at the end of the tick
    pub mode: TrackerMode,

    /// True position of the vehicle
    pub position_m: Option<Vector3<f64>>,

    /// Reference position, which is the origin of the planner frame in the fixed frame
    pub reference_m: Option<Vector3<f64>>,

    /// Norm of the relative state
    pub relative_state_norm: f64,

    pub value: f64,
    pub priority: f64,
    pub value_fn_id: Option<ValueFunctionId>,

    /// Half widths of the tracking tube of the active value function
    pub tracking_bound_m: Option<Vector3<f64>>,

    /// Total number of replans triggered since initialisation
    pub num_replans: u64,
    pub num_obstacles: usize,

    /// The trajectory had run out and a replan was made this tick
    pub traj_stale: bool,

    /// The true position couldn't be read so the tick was skipped
    pub loc_unavailable: bool,

    /// The vehicle is holding at the goal
    pub goal_held: bool,
}

struct Core {
    params: TrackerParams,
    dynamics: Arc<dyn Dynamics>,
    shared: Arc<Shared>,

    pose_source: Box<dyn PoseSource>,
    viz: Arc<dyn VizSink>,

    /// Latest estimate of the true state
    state: State,

    /// Position read on the previous tick, `None` before the first tick
    prev_position: Option<Vector3<f64>>,

    goal: Vector3<f64>,

    worker: Option<Worker>,

    num_replans: u64,
}

struct Worker {
    jh: Option<JoinHandle<Result<(), TrackerError>>>,
    sender: Sender<WorkerSignal>,
    reciever: Receiver<WorkerSignal>,
}

/// Data shared with the replanning worker.
#[derive(Debug)]
struct Shared {
    space: Arc<dyn CollisionSpace>,

    /// Planners in priority order
    planners: Vec<Arc<dyn Planner>>,
    meta_planner: MetaPlanner,

    trajectory: RwLock<Option<Arc<Trajectory>>>,

    /// Generation of the most recent replan request
    generation: AtomicU64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The possible modes of the tracker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackerMode {
    Uninitialized,

    /// No trajectory is available yet, planning is retried every tick
    Planning,

    /// Following the current trajectory
    Tracking,

    /// Following the current trajectory while a new one is planned in the background
    Replanning,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("The tracker has not been initialised")]
    NotInitialised,

    #[error("The tracker has already been initialised")]
    AlreadyInitialised,

    #[error("Invalid tracker parameters: {0}")]
    InvalidParams(String),

    #[error("Could not create the dynamics: {0}")]
    DynamicsError(DynamicsError),

    #[error("Could not create a value function: {0}")]
    ValueFunctionError(ValueFunctionError),

    #[error("Could not create the collision space: {0}")]
    SpaceError(SpaceError),

    #[error("Archive error: {0}")]
    ArchiveError(ArchiveError),

    #[error("Could not start the replanning worker: {0}")]
    WorkerStartError(std::io::Error),

    #[error("Sync primitive is poisoned")]
    PoisonError,

    #[error("Failed to send signal {0:?} between threads")]
    SendError(WorkerSignal),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ModuleState for Tracker {
    type InitData = TrackerInitData;
    type InitError = TrackerError;

    type InputData = TickInput;
    type OutputData = Option<ControlDemand>;
    type StatusReport = StatusReport;
    type ProcError = TrackerError;

    /// Build the dynamics, collision space, value functions and planners, and plan the initial
    /// trajectory.
    ///
    /// If the initial plan fails the tracker stays in `Planning` and retries every tick.
    fn init(
        &mut self,
        init_data: Self::InitData,
        session: Option<&Session>,
    ) -> Result<(), Self::InitError> {
        if self.core.is_some() {
            return Err(TrackerError::AlreadyInitialised);
        }

        let TrackerInitData {
            params,
            planner_params,
            meta_planner_params,
            pose_source,
            viz,
            start_time_s,
        } = init_data;

        params.validate().map_err(TrackerError::InvalidParams)?;
        planner_params
            .validate()
            .map_err(TrackerError::InvalidParams)?;
        meta_planner_params
            .validate()
            .map_err(TrackerError::InvalidParams)?;

        // Dynamics
        let dynamics: Arc<dyn Dynamics> = Arc::new(NearHoverQuadNoYaw::new(
            &params.control_lower,
            &params.control_upper,
        )?);
        if dynamics.state_dim() != params.state_dim || dynamics.control_dim() != params.control_dim
        {
            return Err(TrackerError::InvalidParams(format!(
                "the dynamics have a {} dimensional state and {} dimensional control, but {} and \
                {} were configured",
                dynamics.state_dim(),
                dynamics.control_dim(),
                params.state_dim,
                params.control_dim
            )));
        }

        // Collision space from the spatial part of the state bounds
        let lower = Vector3::from_fn(|axis, _| params.state_lower[dynamics.spatial_dimension(axis)]);
        let upper = Vector3::from_fn(|axis, _| params.state_upper[dynamics.spatial_dimension(axis)]);
        let space: Arc<dyn CollisionSpace> = Arc::new(BallsInBox::new(lower, upper)?);

        // One planner per value function, in priority order
        let mut planners: Vec<Arc<dyn Planner>> = Vec::with_capacity(params.value_functions.len());
        for vf_params in &params.value_functions {
            let vf: Arc<dyn ValueFunction> =
                Arc::new(PointMassValueFunction::new(vf_params, dynamics.clone())?);

            info!(
                "Value function {} has tracking bound {:?} m",
                vf.id().0,
                vf.tracking_bounds().as_slice()
            );

            planners.push(Arc::new(GeometricPlanner::new(
                planner_params.clone(),
                vf,
                space.clone(),
            )));
        }

        let shared = Arc::new(Shared {
            meta_planner: MetaPlanner::new(meta_planner_params, space.clone()),
            space,
            planners,
            trajectory: RwLock::new(None),
            generation: AtomicU64::new(0),
        });

        let start = params
            .start_m
            .map(Vector3::from)
            .unwrap_or_else(|| 0.5 * (lower + upper));
        let goal = params
            .goal_m
            .map(Vector3::from)
            .unwrap_or_else(|| upper - Vector3::repeat(params.goal_margin_m));

        let worker = if params.background_replanning {
            Some(Worker::start(shared.clone())?)
        } else {
            None
        };

        if let Some(session) = session {
            self.arch_status = Archiver::from_path(session, "tracker_status.csv")?;
        }

        let mut core = Core {
            state: dynamics.state_at_rest(&start),
            params,
            dynamics,
            shared,
            pose_source,
            viz,
            prev_position: None,
            goal,
            worker,
            num_replans: 0,
        };

        info!(
            "Tracker initialised, planning from {:?} to {:?}",
            start.as_slice(),
            goal.as_slice()
        );

        self.mode = if core.replan_sync(start_time_s)? {
            TrackerMode::Tracking
        } else {
            warn!("Initial plan failed, will retry every tick");
            TrackerMode::Planning
        };
        self.core = Some(core);

        Ok(())
    }

    /// Run one control tick.
    ///
    /// Outputs `None` when no control can be computed this tick, either because there is no
    /// trajectory yet or because the true position is unavailable.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let (demand, mut report) = self.tick(input_data.time_s)?;

        let core = self.core.as_ref().ok_or(TrackerError::NotInitialised)?;
        report.time_s = input_data.time_s;
        report.mode = self.mode;
        report.num_replans = core.num_replans;
        report.num_obstacles = core.shared.space.num_obstacles();

        trace!("{:?}", report);

        if self.arch_status.is_active() {
            self.arch_status.serialise(report.to_tm(demand.as_ref()))?;
        }

        Ok((demand, report))
    }
}

impl Tracker {
    /// Handle an obstacle observation.
    ///
    /// Returns true if the obstacle was new, in which case it has been added to the collision
    /// space and a replan triggered. Repeated observations of a known obstacle do nothing.
    pub fn on_obstacle(&mut self, obs: &ObstacleObs, time_s: f64) -> Result<bool, TrackerError> {
        let core = self.core.as_mut().ok_or(TrackerError::NotInitialised)?;

        if !core
            .shared
            .space
            .insert_if_new(Vector3::from(obs.centre_m), obs.radius_m)
        {
            trace!("Obstacle at {:?} already known", obs.centre_m);
            return Ok(false);
        }

        info!(
            "New obstacle at {:?} with radius {:.2} m, replanning",
            obs.centre_m, obs.radius_m
        );
        core.num_replans += 1;

        self.mode = if core.worker.is_some() {
            core.replan_background(time_s)?;
            TrackerMode::Replanning
        } else {
            core.replan_sync(time_s)?;
            core.mode_after_plan()?
        };

        Ok(true)
    }

    pub fn mode(&self) -> TrackerMode {
        self.mode
    }

    /// Number of replans triggered since initialisation, not counting the initial plan.
    pub fn num_replans(&self) -> u64 {
        self.core.as_ref().map_or(0, |c| c.num_replans)
    }

    /// The current trajectory.
    pub fn trajectory(&self) -> Option<Arc<Trajectory>> {
        self.core.as_ref()?.shared.trajectory().ok()?
    }

    pub fn space(&self) -> Option<Arc<dyn CollisionSpace>> {
        Some(self.core.as_ref()?.shared.space.clone())
    }

    pub fn dynamics(&self) -> Option<Arc<dyn Dynamics>> {
        Some(self.core.as_ref()?.dynamics.clone())
    }

    /// Planners in priority order.
    pub fn planners(&self) -> Option<&[Arc<dyn Planner>]> {
        Some(&self.core.as_ref()?.shared.planners)
    }

    pub fn goal(&self) -> Option<Vector3<f64>> {
        Some(self.core.as_ref()?.goal)
    }

    /// The true position of the vehicle as last read.
    pub fn position(&self) -> Option<Vector3<f64>> {
        Some(self.core.as_ref()?.position())
    }

    fn tick(&mut self, time_s: f64) -> Result<(Option<ControlDemand>, StatusReport), TrackerError> {
        let core = self.core.as_mut().ok_or(TrackerError::NotInitialised)?;
        let mut report = StatusReport::default();

        if let Some(mode) = core.poll_worker()? {
            self.mode = mode;
        }

        // Without a trajectory keep trying to plan, unless the worker is already on it
        let mut traj = core.shared.trajectory()?;
        if traj.is_none() && self.mode != TrackerMode::Replanning {
            core.num_replans += 1;
            core.replan_sync(time_s)?;
            traj = core.shared.trajectory()?;
        }

        let mut traj = match traj {
            Some(t) => t,
            None => {
                if self.mode != TrackerMode::Replanning {
                    self.mode = TrackerMode::Planning;
                }
                debug!("No trajectory, no control this tick");
                return Ok((None, report));
            }
        };

        if self.mode == TrackerMode::Planning {
            info!("Trajectory available, tracking");
            self.mode = TrackerMode::Tracking;
        }

        // Stale trajectory, replanned from the last known state
        if traj.last_time().map_or(true, |t| time_s > t) {
            if core.is_goal_held(&traj) {
                report.goal_held = true;
            } else {
                warn!(
                    "Trajectory ended at {:.3} s but it is now {:.3} s, replanning",
                    traj.last_time().unwrap_or(f64::NAN),
                    time_s
                );
                report.traj_stale = true;
                core.num_replans += 1;

                // Supersedes any background replan
                if core.replan_sync(time_s)? {
                    if let Some(t) = core.shared.trajectory()? {
                        traj = t;
                    }
                }
                self.mode = TrackerMode::Tracking;
            }
        }

        // True state
        let position = match core
            .pose_source
            .lookup(&core.params.frames.fixed, &core.params.frames.tracker)
        {
            Ok(p) => p,
            Err(e) => {
                warn!("Localisation unavailable, skipping control tick: {}", e);
                report.loc_unavailable = true;
                return Ok((None, report));
            }
        };
        core.update_state(&position);
        report.position_m = Some(position);

        // Reference and active value function
        let (reference, value_fn) =
            match (traj.get_state(time_s), traj.get_value_function(time_s)) {
                (Some(r), Some(v)) => (r, v),
                _ => {
                    error!("Trajectory has no samples, no control this tick");
                    return Ok((None, report));
                }
            };

        let relative = &core.state - &reference;
        let control = core.saturate(value_fn.optimal_control(&relative));

        let demand = ControlDemand::from_slice(time_s, control.as_slice());
        if demand.is_none() {
            error!("Optimal control {:?} is not finite, no demand sent", control.as_slice());
        }

        let reference_m = core.dynamics.puncture(&reference);
        let bound = value_fn.tracking_bounds();

        report.reference_m = Some(reference_m);
        report.relative_state_norm = relative.norm();
        report.value = value_fn.value(&relative);
        report.priority = value_fn.priority(&relative);
        report.value_fn_id = Some(value_fn.id());
        report.tracking_bound_m = Some(bound);

        // Visualisation
        let frames = &core.params.frames;
        publish_tracking_bound(core.viz.as_ref(), &frames.planner, &bound, time_s);
        core.shared
            .space
            .visualize(core.viz.as_ref(), &frames.fixed, time_s);
        traj.visualize(
            core.viz.as_ref(),
            &frames.fixed,
            core.dynamics.as_ref(),
            time_s,
        );

        Ok((demand, report))
    }
}

impl Core {
    fn position(&self) -> Vector3<f64> {
        self.dynamics.puncture(&self.state)
    }

    /// Update the state estimate from a new position. Velocity is the backward difference over
    /// one time step, and zero on the first tick.
    fn update_state(&mut self, position: &Vector3<f64>) {
        let velocity = match self.prev_position {
            Some(prev) => (position - prev) / self.params.time_step_s,
            None => Vector3::zeros(),
        };
        self.prev_position = Some(*position);

        for axis in 0..NUM_SPATIAL_AXES {
            self.state[self.dynamics.spatial_dimension(axis)] = position[axis];
            self.state[self.dynamics.velocity_dimension(axis)] = velocity[axis];
        }
    }

    /// Clamp a control to the dynamics' bounds. Non-finite components are left as they are.
    fn saturate(&self, mut control: State) -> State {
        let lower = self.dynamics.control_lower();
        let upper = self.dynamics.control_upper();

        for i in 0..control.len() {
            control[i] = clamp(&control[i], &lower[i], &upper[i]);
        }

        control
    }

    /// True if both the trajectory and the last known position of the vehicle have reached the
    /// goal.
    fn is_goal_held(&self, traj: &Trajectory) -> bool {
        let tolerance = self.params.goal_tolerance_m;

        let traj_at_goal = traj.samples().last().map_or(false, |s| {
            (self.dynamics.puncture(&s.state) - self.goal).norm() <= tolerance
        });

        traj_at_goal && (self.position() - self.goal).norm() <= tolerance
    }

    /// Plan from the current position on this thread. Returns true if a new trajectory was
    /// adopted, false if planning failed and the previous one is still in use.
    fn replan_sync(&mut self, time_s: f64) -> Result<bool, TrackerError> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let start = self.position();

        match self
            .shared
            .meta_planner
            .plan(&start, &self.goal, time_s, &self.shared.planners)
        {
            Ok(traj) => {
                let adopted = self.shared.adopt(traj, generation)?;
                if adopted {
                    info!("Replan {} adopted", generation);
                }
                Ok(adopted)
            }
            Err(e) => {
                warn!("Planning failed, keeping the previous trajectory: {}", e);
                Ok(false)
            }
        }
    }

    /// Ask the worker to plan from the current position.
    fn replan_background(&mut self, time_s: f64) -> Result<(), TrackerError> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let start = self.position();

        match self.worker {
            Some(ref worker) => {
                worker.sender.send(WorkerSignal::Replan {
                    generation,
                    start,
                    goal: self.goal,
                    start_time_s: time_s,
                })?;
                debug!("Replan {} sent to the worker", generation);
                Ok(())
            }
            None => self.replan_sync(time_s).map(|_| ()),
        }
    }

    fn mode_after_plan(&self) -> Result<TrackerMode, TrackerError> {
        Ok(match self.shared.trajectory()? {
            Some(_) => TrackerMode::Tracking,
            None => TrackerMode::Planning,
        })
    }

    /// Handle every signal waiting from the worker, returning the mode to switch to if the
    /// latest replan has finished.
    fn poll_worker(&mut self) -> Result<Option<TrackerMode>, TrackerError> {
        let mut new_mode = None;
        let mut disconnected = false;

        if let Some(ref worker) = self.worker {
            let latest = self.shared.generation.load(Ordering::SeqCst);

            loop {
                let signal = match worker.reciever.try_recv() {
                    Ok(s) => s,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                };

                match signal {
                    WorkerSignal::Complete(generation) => {
                        info!("Background replan {} adopted", generation);
                        if generation == latest {
                            new_mode = Some(TrackerMode::Tracking);
                        }
                    }
                    WorkerSignal::Discarded(generation) => {
                        warn!("Background replan {} was superseded and discarded", generation);
                    }
                    WorkerSignal::Failed(generation, e) => {
                        warn!(
                            "Background replan {} failed, keeping the previous trajectory: {}",
                            generation, e
                        );
                        if generation == latest {
                            new_mode = Some(self.mode_after_plan()?);
                        }
                    }
                    WorkerSignal::Error(e) => return Err(*e),
                    s => warn!("Unexpected signal from the replanning worker: {:?}", s),
                }
            }
        }

        if disconnected {
            error!("Replanning worker has stopped, replanning synchronously from now on");
            self.worker = None;
            new_mode = Some(self.mode_after_plan()?);
        }

        Ok(new_mode)
    }
}

impl Shared {
    fn trajectory(&self) -> Result<Option<Arc<Trajectory>>, TrackerError> {
        Ok(self.trajectory.read()?.clone())
    }

    /// Swap in a new trajectory if `generation` is still the latest. Returns true if adopted.
    fn adopt(&self, traj: Trajectory, generation: u64) -> Result<bool, TrackerError> {
        let mut current = self.trajectory.write()?;

        if generation != self.generation.load(Ordering::SeqCst) {
            return Ok(false);
        }

        session::save_with_timestamp("trajectories/traj.json", traj.snapshot());
        *current = Some(Arc::new(traj));

        Ok(true)
    }
}

impl Worker {
    fn start(shared: Arc<Shared>) -> Result<Self, TrackerError> {
        let (sender, rx) = channel();
        let (tx, reciever) = channel();

        let jh = thread::Builder::new()
            .name("tracker::worker".into())
            .spawn(move || worker_thread(shared, tx, rx))
            .map_err(TrackerError::WorkerStartError)?;

        Ok(Self {
            jh: Some(jh),
            sender,
            reciever,
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // The worker may already have stopped, in which case there's nobody to tell
        self.sender.send(WorkerSignal::Stop).ok();

        if let Some(jh) = self.jh.take() {
            match jh.join() {
                Ok(Ok(())) => (),
                Ok(Err(e)) => error!("Replanning worker stopped with an error: {}", e),
                Err(_) => error!("Replanning worker panicked"),
            }
        }
    }
}

impl TrackerMode {
    pub fn name(&self) -> &'static str {
        match self {
            TrackerMode::Uninitialized => "Uninitialized",
            TrackerMode::Planning => "Planning",
            TrackerMode::Tracking => "Tracking",
            TrackerMode::Replanning => "Replanning",
        }
    }
}

impl Default for TrackerMode {
    fn default() -> Self {
        TrackerMode::Uninitialized
    }
}

impl StatusReport {
    /// Flatten the report, and the demand produced alongside it, into a telemetry frame. Missing
    /// quantities are NaN.
    pub fn to_tm(&self, demand: Option<&ControlDemand>) -> TrackerTm {
        let nan3 = Vector3::repeat(f64::NAN);
        let pos = self.position_m.unwrap_or(nan3);
        let reference = self.reference_m.unwrap_or(nan3);
        let bound = self.tracking_bound_m.unwrap_or(nan3);
        let control = demand.map_or([f64::NAN; 3], |d| d.to_array());

        TrackerTm {
            time_s: self.time_s,
            mode: self.mode.name().into(),
            demand_valid: demand.is_some(),
            pitch_rad: control[0],
            roll_rad: control[1],
            thrust_ms2: control[2],
            pos_x_m: pos[0],
            pos_y_m: pos[1],
            pos_z_m: pos[2],
            ref_x_m: reference[0],
            ref_y_m: reference[1],
            ref_z_m: reference[2],
            value: self.value,
            priority: self.priority,
            value_fn_id: self.value_fn_id.map_or(u32::MAX, |id| id.0),
            bound_x_m: bound[0],
            bound_y_m: bound[1],
            bound_z_m: bound[2],
            num_replans: self.num_replans,
            num_obstacles: self.num_obstacles,
            traj_stale: self.traj_stale,
            loc_unavailable: self.loc_unavailable,
        }
    }
}

impl From<DynamicsError> for TrackerError {
    fn from(e: DynamicsError) -> Self {
        Self::DynamicsError(e)
    }
}

impl From<ValueFunctionError> for TrackerError {
    fn from(e: ValueFunctionError) -> Self {
        Self::ValueFunctionError(e)
    }
}

impl From<SpaceError> for TrackerError {
    fn from(e: SpaceError) -> Self {
        Self::SpaceError(e)
    }
}

impl From<ArchiveError> for TrackerError {
    fn from(e: ArchiveError) -> Self {
        Self::ArchiveError(e)
    }
}

impl<G> From<PoisonError<G>> for TrackerError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

impl From<SendError<WorkerSignal>> for TrackerError {
    fn from(e: SendError<WorkerSignal>) -> Self {
        Self::SendError(e.0)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Publish the tracking tube as a box centred on the planner frame's origin.
fn publish_tracking_bound(sink: &dyn VizSink, frame_id: &str, bound: &Vector3<f64>, time_s: f64) {
    if !sink.has_subscribers(VizChannel::TrackingBound) {
        return;
    }

    sink.publish(
        VizChannel::TrackingBound,
        Marker {
            ns: "tracking_bound".into(),
            id: 0,
            frame_id: frame_id.into(),
            time_s,
            shape: MarkerShape::Cube {
                centre: [0.0; 3],
                scale: (2.0 * bound).into(),
            },
            colour: TRACKING_BOUND_COLOUR,
        },
    );
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::viz::SceneVizSink;
    use std::{thread, time::Duration};

    fn params() -> (TrackerParams, GeometricPlannerParams, MetaPlannerParams) {
        let mut tracker: TrackerParams =
            util::params::from_str(include_str!("../../../params/tracker.toml")).unwrap();
        tracker.background_replanning = false;

        (
            tracker,
            util::params::from_str(include_str!("../../../params/planner.toml")).unwrap(),
            util::params::from_str(include_str!("../../../params/meta_planner.toml")).unwrap(),
        )
    }

    fn init(tracker_params: TrackerParams) -> (Tracker, PoseStore, Arc<SceneVizSink>) {
        let (_, planner_params, meta_planner_params) = params();
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
                None,
            )
            .unwrap();

        (tracker, pose, viz)
    }

    fn obs(centre_m: [f64; 3], radius_m: f64) -> ObstacleObs {
        ObstacleObs { centre_m, radius_m }
    }

    /// Every sample of the current trajectory is valid in the current space.
    fn assert_trajectory_valid(tracker: &Tracker) {
        let traj = tracker.trajectory().unwrap();
        let space = tracker.space().unwrap();
        let dynamics = tracker.dynamics().unwrap();

        for s in traj.samples() {
            let p = dynamics.puncture(&s.state);
            assert!(
                space.is_valid(&p, s.value_fn.as_ref(), s.value_fn.as_ref()),
                "sample at {:?} is invalid",
                p
            );
        }
    }

    #[test]
    fn test_uninitialised() {
        let mut tracker = Tracker::default();
        assert_eq!(tracker.mode(), TrackerMode::Uninitialized);
        assert!(matches!(
            tracker.proc(&TickInput { time_s: 0.0 }),
            Err(TrackerError::NotInitialised)
        ));
        assert!(matches!(
            tracker.on_obstacle(&obs([0.0; 3], 1.0), 0.0),
            Err(TrackerError::NotInitialised)
        ));
    }

    #[test]
    fn test_init_rejects_bad_params() {
        let (mut tracker_params, planner_params, meta_planner_params) = params();
        tracker_params.state_dim = 4;

        let mut tracker = Tracker::default();
        let res = tracker.init(
            TrackerInitData {
                params: tracker_params,
                planner_params,
                meta_planner_params,
                pose_source: Box::new(PoseStore::new()),
                viz: Arc::new(SceneVizSink::new()),
                start_time_s: 0.0,
            },
            None,
        );

        assert!(matches!(res, Err(TrackerError::InvalidParams(_))));
        assert_eq!(tracker.mode(), TrackerMode::Uninitialized);
    }

    #[test]
    fn test_init_rejects_bad_planner_params() {
        let try_init = |planner_params: GeometricPlannerParams,
                        meta_planner_params: MetaPlannerParams| {
            let (tracker_params, _, _) = params();
            let mut tracker = Tracker::default();
            let res = tracker.init(
                TrackerInitData {
                    params: tracker_params,
                    planner_params,
                    meta_planner_params,
                    pose_source: Box::new(PoseStore::new()),
                    viz: Arc::new(SceneVizSink::new()),
                    start_time_s: 0.0,
                },
                None,
            );
            assert_eq!(tracker.mode(), TrackerMode::Uninitialized);
            res
        };

        let (_, planner_params, meta_planner_params) = params();

        let mut p = planner_params.clone();
        p.dimensions = vec![0, 1, 3];
        assert!(matches!(
            try_init(p, meta_planner_params.clone()),
            Err(TrackerError::InvalidParams(_))
        ));

        let mut p = planner_params.clone();
        p.resolution_m = 0.0;
        assert!(matches!(
            try_init(p, meta_planner_params.clone()),
            Err(TrackerError::InvalidParams(_))
        ));

        let mut p = planner_params.clone();
        p.step_m = 0.0;
        assert!(matches!(
            try_init(p, meta_planner_params.clone()),
            Err(TrackerError::InvalidParams(_))
        ));

        let mut mp = meta_planner_params;
        mp.max_connection_radius_m = -1.0;
        assert!(matches!(
            try_init(planner_params, mp),
            Err(TrackerError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_init_rejects_short_state() {
        // Consistent lengths, but too few dimensions for the spatial axes of the dynamics
        let (mut tracker_params, planner_params, meta_planner_params) = params();
        tracker_params.state_dim = 4;
        tracker_params.state_lower.truncate(4);
        tracker_params.state_upper.truncate(4);
        assert!(tracker_params.validate().is_ok());

        let mut tracker = Tracker::default();
        let res = tracker.init(
            TrackerInitData {
                params: tracker_params,
                planner_params,
                meta_planner_params,
                pose_source: Box::new(PoseStore::new()),
                viz: Arc::new(SceneVizSink::new()),
                start_time_s: 0.0,
            },
            None,
        );

        assert!(matches!(res, Err(TrackerError::InvalidParams(_))));
    }

    #[test]
    fn test_initial_plan_and_tick() {
        let (tracker_params, _, _) = params();
        let (mut tracker, pose, viz) = init(tracker_params);

        assert_eq!(tracker.mode(), TrackerMode::Tracking);
        assert_eq!(tracker.num_replans(), 0);
        assert_eq!(tracker.goal().unwrap(), Vector3::repeat(18.5));

        // Trajectory runs from the centre to the goal
        let traj = tracker.trajectory().unwrap();
        let dynamics = tracker.dynamics().unwrap();
        assert!(traj.is_valid());
        assert_eq!(traj.first_time(), Some(0.0));
        assert_eq!(dynamics.puncture(&traj.samples()[0].state), Vector3::zeros());
        assert_eq!(
            dynamics.puncture(&traj.samples().last().unwrap().state),
            Vector3::repeat(18.5)
        );

        // On the reference at rest, the demand is within the control bounds
        pose.set_position(Vector3::zeros());
        let (demand, report) = tracker.proc(&TickInput { time_s: 0.0 }).unwrap();
        let demand = demand.unwrap();
        let [pitch, roll, thrust] = demand.to_array();
        assert!(pitch.abs() <= 0.1 && roll.abs() <= 0.1);
        assert!(thrust >= 7.81 && thrust <= 11.81);

        assert_eq!(report.mode, TrackerMode::Tracking);
        assert_eq!(report.value_fn_id, Some(ValueFunctionId(0)));
        assert!(report.value.is_finite());
        assert!(!report.traj_stale && !report.loc_unavailable);

        // Every channel was published
        assert_eq!(viz.markers(VizChannel::TrackingBound).len(), 1);
        assert!(!viz.markers(VizChannel::Environment).is_empty());
        assert!(!viz.markers(VizChannel::Trajectory).is_empty());

        // Telemetry carries the demand
        let tm = report.to_tm(Some(&demand));
        assert!(tm.demand_valid);
        assert_eq!(tm.mode, "Tracking");
        assert_eq!(tm.thrust_ms2, thrust);
    }

    #[test]
    fn test_velocity_estimate() {
        let (tracker_params, _, _) = params();
        let dt = tracker_params.time_step_s;
        let (mut tracker, pose, _) = init(tracker_params);

        // Moving backwards along x relative to a reference at rest near the start means
        // accelerating forward, which is positive pitch
        pose.set_position(Vector3::zeros());
        tracker.proc(&TickInput { time_s: 0.0 }).unwrap();
        pose.set_position(Vector3::new(-0.05, 0.0, 0.0));
        let (demand, report) = tracker.proc(&TickInput { time_s: dt }).unwrap();

        assert!(report.relative_state_norm > 2.0);
        assert_eq!(demand.unwrap().pitch_rad, 0.1);
    }

    #[test]
    fn test_loc_unavailable_skips_tick() {
        let (tracker_params, _, _) = params();
        let (mut tracker, _pose, _) = init(tracker_params);

        let (demand, report) = tracker.proc(&TickInput { time_s: 0.0 }).unwrap();
        assert!(demand.is_none());
        assert!(report.loc_unavailable);
        assert_eq!(report.mode, TrackerMode::Tracking);

        let tm = report.to_tm(None);
        assert!(!tm.demand_valid);
        assert!(tm.pitch_rad.is_nan());
    }

    #[test]
    fn test_duplicate_obstacle_replans_once() {
        let (tracker_params, _, _) = params();
        let (mut tracker, _, _) = init(tracker_params);

        assert!(tracker.on_obstacle(&obs([9.0, 9.0, 9.0], 2.0), 1.0).unwrap());
        assert!(!tracker.on_obstacle(&obs([9.0, 9.0, 9.0], 2.0), 1.1).unwrap());

        assert_eq!(tracker.num_replans(), 1);
        assert_eq!(tracker.space().unwrap().num_obstacles(), 1);
        assert_eq!(tracker.mode(), TrackerMode::Tracking);
        assert_trajectory_valid(&tracker);
        assert_eq!(tracker.trajectory().unwrap().first_time(), Some(1.0));
    }

    #[test]
    fn test_stale_trajectory_replans_before_control() {
        let (tracker_params, _, _) = params();
        let (mut tracker, pose, _) = init(tracker_params);
        let end_s = tracker.trajectory().unwrap().last_time().unwrap();

        pose.set_position(Vector3::zeros());
        let (demand, report) = tracker.proc(&TickInput { time_s: end_s + 10.0 }).unwrap();

        assert!(report.traj_stale);
        assert!(demand.is_some());
        assert_eq!(tracker.num_replans(), 1);
        assert_eq!(
            tracker.trajectory().unwrap().first_time(),
            Some(end_s + 10.0)
        );
    }

    #[test]
    fn test_stale_trajectory_replanned_without_localisation() {
        let (tracker_params, _, _) = params();
        let (mut tracker, _pose, _) = init(tracker_params);
        let end_s = tracker.trajectory().unwrap().last_time().unwrap();

        // No position has ever been published
        let (demand, report) = tracker.proc(&TickInput { time_s: end_s + 1.0 }).unwrap();

        assert!(report.traj_stale);
        assert!(report.loc_unavailable);
        assert!(demand.is_none());
        assert_eq!(tracker.num_replans(), 1);

        // Planned from the last known position, the start
        let traj = tracker.trajectory().unwrap();
        let dynamics = tracker.dynamics().unwrap();
        assert_eq!(traj.first_time(), Some(end_s + 1.0));
        assert_eq!(dynamics.puncture(&traj.samples()[0].state), Vector3::zeros());
    }

    #[test]
    fn test_superseded_replan_is_cancelled() {
        let (tracker_params, planner_params, mut meta_planner_params) = params();
        // Long enough that the request could never finish during the test
        meta_planner_params.max_iterations = usize::MAX;

        let dynamics: Arc<dyn Dynamics> = Arc::new(
            NearHoverQuadNoYaw::new(&tracker_params.control_lower, &tracker_params.control_upper)
                .unwrap(),
        );
        let space: Arc<dyn CollisionSpace> =
            Arc::new(BallsInBox::new(Vector3::repeat(-20.0), Vector3::repeat(20.0)).unwrap());
        let vf: Arc<dyn ValueFunction> = Arc::new(
            PointMassValueFunction::new(&tracker_params.value_functions[0], dynamics).unwrap(),
        );
        let shared = Arc::new(Shared {
            meta_planner: MetaPlanner::new(meta_planner_params, space.clone()),
            planners: vec![Arc::new(GeometricPlanner::new(planner_params, vf, space.clone()))],
            space,
            trajectory: RwLock::new(None),
            generation: AtomicU64::new(1),
        });

        let worker = Worker::start(shared.clone()).unwrap();

        // The goal is outside the environment, so only cancelling ends the plan
        worker
            .sender
            .send(WorkerSignal::Replan {
                generation: 1,
                start: Vector3::zeros(),
                goal: Vector3::new(50.0, 0.0, 0.0),
                start_time_s: 0.0,
            })
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        shared.generation.store(2, Ordering::SeqCst);

        match worker.reciever.recv_timeout(Duration::from_secs(10)) {
            Ok(WorkerSignal::Discarded(1)) => (),
            other => panic!("expected replan 1 to be discarded, got {:?}", other),
        }
        assert!(shared.trajectory().unwrap().is_none());
    }

    #[test]
    fn test_goal_hold() {
        let (mut tracker_params, _, _) = params();
        tracker_params.start_m = Some([5.0, 5.0, 5.0]);
        tracker_params.goal_m = Some([5.0, 5.0, 5.2]);
        let (mut tracker, pose, _) = init(tracker_params);

        // Past the end of the trajectory while at the goal, hold rather than replan
        pose.set_position(Vector3::new(5.0, 5.0, 5.2));
        let (demand, report) = tracker.proc(&TickInput { time_s: 100.0 }).unwrap();

        assert!(report.goal_held);
        assert!(!report.traj_stale);
        assert!(demand.is_some());
        assert_eq!(tracker.num_replans(), 0);
    }

    #[test]
    fn test_planning_retried_without_trajectory() {
        let (mut tracker_params, _, _) = params();
        // The goal sits outside the environment so nothing can be planned
        tracker_params.goal_m = Some([50.0, 0.0, 0.0]);
        let (mut tracker, pose, _) = init(tracker_params);

        assert_eq!(tracker.mode(), TrackerMode::Planning);
        assert!(tracker.trajectory().is_none());

        pose.set_position(Vector3::zeros());
        let (demand, report) = tracker.proc(&TickInput { time_s: 0.0 }).unwrap();
        assert!(demand.is_none());
        assert_eq!(report.mode, TrackerMode::Planning);
        assert_eq!(tracker.num_replans(), 1);
    }

    #[test]
    fn test_background_replanning() {
        let (mut tracker_params, _, _) = params();
        tracker_params.background_replanning = true;
        let (mut tracker, pose, _) = init(tracker_params);
        pose.set_position(Vector3::zeros());

        // Two obstacles in quick succession, only the result of the last request is kept
        assert!(tracker.on_obstacle(&obs([9.0, 9.0, 9.0], 2.0), 0.0).unwrap());
        assert!(tracker.on_obstacle(&obs([4.0, 6.0, 5.0], 1.0), 0.0).unwrap());
        assert_eq!(tracker.mode(), TrackerMode::Replanning);

        let mut time_s = 0.0;
        for _ in 0..500 {
            let (demand, _) = tracker.proc(&TickInput { time_s }).unwrap();
            assert!(demand.is_some());

            if tracker.mode() == TrackerMode::Tracking {
                break;
            }

            thread::sleep(Duration::from_millis(10));
            time_s += 0.01;
        }

        assert_eq!(tracker.mode(), TrackerMode::Tracking);
        assert_eq!(tracker.num_replans(), 2);
        assert_trajectory_valid(&tracker);
    }
}
