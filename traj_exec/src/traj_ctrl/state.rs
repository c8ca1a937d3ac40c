//! Trajectory control module state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::{sync::Arc, time::Instant};

use log::{debug, info, trace, warn};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

// Internal
use super::{ConfigError, InputSnapshot, Params};
use crate::{
    cost::CostEvaluator,
    cost_field::{CostField, CostFieldError, CostFieldParams},
    loc::RobotState,
    model::{Control, DifferentialDrive, MotionModel, WheelRates},
    path::{Path, PathError},
    rollout::{cycle_rng, ControlSequence, Particle, RolloutSampler},
};
use util::params;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Sampling based trajectory controller.
///
/// Each time a new path or robot state arrives (and both are known) one control cycle is run:
///  1. Rebuild the cost field if the path has changed since it was last built.
///  2. Sample candidate control sequences around the nominal sequence.
///  3. Roll out and score every candidate.
///  4. Select the lowest cost candidate, the lowest index winning any tie.
///  5. Emit the first control of the selected candidate.
pub struct TrajCtrl<M = DifferentialDrive> {
    params: Params,

    model: M,
    sampler: RolloutSampler,
    evaluator: CostEvaluator,

    /// Executing mode
    mode: TrajCtrlMode,

    /// Latest known robot state
    state: Option<RobotState>,

    /// Latest known path and the version assigned to it on arrival
    path: Option<(u64, Arc<Path>)>,
    path_count: u64,

    /// The cost field and the path version it was built from
    ///
    /// The field covers as much of the path as fits, and always the region the vehicle can reach
    /// within one horizon.
    field: Option<(u64, Arc<CostField>)>,

    /// Obstacles added to the cost field whenever it is built
    obstacles: Option<ObstacleSet>,

    /// Sequence selected in the previous cycle, used as the next nominal sequence
    warm_start: Option<ControlSequence>,

    /// Number of cycles run since creation or the last reset
    cycle_index: u64,

    /// Result of the most recent cycle
    last_result: Option<Arc<OptimizationResult>>,

    /// Versions of the latest mailbox inputs already consumed
    seen_state_version: u64,
    seen_path_version: u64,
}

/// All candidates evaluated in one cycle.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Scored candidates, in sampling order
    pub particles: Vec<Particle>,

    /// Index into `particles` of the selected candidate
    pub best_index: usize,

    /// The cost field the candidates were scored against
    pub cost_field: Arc<CostField>,
}

/// Velocity command for the vehicle.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct VelocityCommand {
    pub control: Control,
    pub wheel_rates: WheelRates,
}

/// Obstacle points supplied by an external mapping source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleSet {
    pub points_m: Vec<Vector2<f64>>,

    /// Cells within this distance of any point receive the added cost
    ///
    /// Units: meters
    pub radius_m: f64,

    pub added_cost: f64,
}

/// The output of a completed cycle.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub command: VelocityCommand,
    pub report: StatusReport,

    /// Full optimisation result, only present when `debug` is set in the parameters
    pub diagnostics: Option<Arc<OptimizationResult>>,
}

/// The status report containing monitoring quantities for one cycle.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Index of the cycle, starting at zero
    pub cycle_index: u64,

    /// Number of candidates evaluated
    pub num_particles: usize,

    /// Index of the selected candidate
    pub best_index: usize,

    /// Cost of the selected candidate
    pub best_cost: f64,

    /// True if the cost field was rebuilt this cycle
    pub field_rebuilt: bool,

    /// Time taken to run the cycle
    ///
    /// Units: seconds
    pub cycle_duration_s: f64,

    /// True if the cycle took longer than one timestep
    pub budget_exceeded: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The possible modes of TrajCtrl.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrajCtrlMode {
    /// The state or the path is not yet known
    Idle,

    /// Both inputs are known, waiting for the next trigger
    Ready,

    /// A cycle is executing
    Cycling,
}

/// The result of a trigger.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// A cycle completed and produced a command
    Command(CycleOutput),

    /// No cycle was run
    Idle(IdleReason),

    /// The cycle was skipped because the inputs are unusable
    Fault(Fault),
}

/// Reasons that no cycle was run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IdleReason {
    MissingState,
    MissingPath,
    MissingStateAndPath,

    /// A mailbox snapshot contained nothing newer than the previous one
    NoNewInput,
}

/// Faults which cause a cycle to be skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    #[error("The robot state is not finite: {0:?}")]
    NonFiniteState(RobotState),

    #[error("The path cannot be tracked: {0}")]
    InvalidPath(PathError),

    #[error("Could not build the cost field: {0}")]
    CostField(CostFieldError),

    #[error("The selected command is not finite: {0:?}")]
    NonFiniteCommand(Control),

    #[error("The selected control sequence is empty")]
    EmptySequence,
}

/// Reasons for rebuilding the cost field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FieldRebuild {
    /// No field has been built, or the obstacles changed
    NoField,

    PathChanged,

    /// The vehicle could leave the field within one horizon
    HorizonLeavesField,
}

/// Errors which can occur while initialising TrajCtrl.
#[derive(Debug, thiserror::Error)]
pub enum TrajCtrlError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(params::LoadError),

    #[error("Invalid parameters: {0}")]
    InvalidParams(ConfigError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrajCtrl<DifferentialDrive> {
    /// Create a new controller for a differential drive vehicle.
    pub fn new(params: Params) -> Result<Self, ConfigError> {
        params.validate()?;

        let model = DifferentialDrive::new(params.diff_drive_params());

        Self::with_model(params, model)
    }

    /// Initialise the controller from a parameter file.
    ///
    /// The path is relative to the `params` directory in the software root.
    pub fn init(params_path: &str) -> Result<Self, TrajCtrlError> {
        let params: Params = params::load(params_path).map_err(TrajCtrlError::ParamLoadError)?;

        Self::new(params).map_err(TrajCtrlError::InvalidParams)
    }
}

impl<M: MotionModel> TrajCtrl<M> {
    /// Create a new controller using the given motion model.
    pub fn with_model(params: Params, model: M) -> Result<Self, ConfigError> {
        params.validate()?;

        let sampler = RolloutSampler::new(
            params.sampling,
            params.horizon,
            params.num_samples,
            params.timestep_s,
            params.velocity_limit_ms,
        );
        let evaluator = CostEvaluator::new(
            params.cost_coefficients,
            params.velocity_limit_ms,
            params.timestep_s,
        );

        info!(
            "TrajCtrl initialised: {} samples over {} steps of {} s, velocity limit {} m/s, seed {:?}",
            params.num_samples,
            params.horizon,
            params.timestep_s,
            params.velocity_limit_ms,
            params.sampling.seed
        );

        Ok(Self {
            params,
            model,
            sampler,
            evaluator,
            mode: TrajCtrlMode::Idle,
            state: None,
            path: None,
            path_count: 0,
            field: None,
            obstacles: None,
            warm_start: None,
            cycle_index: 0,
            last_result: None,
            seen_state_version: 0,
            seen_path_version: 0,
        })
    }

    /// Set a new path and run a cycle.
    pub fn set_path(&mut self, path: Path) -> CycleOutcome {
        self.set_shared_path(Arc::new(path))
    }

    /// Set a new, already shared, path and run a cycle.
    pub fn set_shared_path(&mut self, path: Arc<Path>) -> CycleOutcome {
        self.store_path(path);
        self.cycle()
    }

    /// Set a new robot state and run a cycle.
    pub fn set_state(&mut self, state: RobotState) -> CycleOutcome {
        self.store_state(state);
        self.cycle()
    }

    /// Process the latest inputs from a mailbox.
    ///
    /// Any input newer than the last one processed replaces the current value, and then a single
    /// cycle is run. If neither input is new no cycle is run.
    pub fn proc(&mut self, snapshot: &InputSnapshot) -> CycleOutcome {
        let mut triggered = false;

        if let Some((version, ref path)) = snapshot.path {
            if version > self.seen_path_version {
                self.seen_path_version = version;
                self.store_path(path.clone());
                triggered = true;
            }
        }

        if let Some((version, state)) = snapshot.state {
            if version > self.seen_state_version {
                self.seen_state_version = version;
                self.store_state(state);
                triggered = true;
            }
        }

        if triggered {
            self.cycle()
        } else {
            CycleOutcome::Idle(IdleReason::NoNewInput)
        }
    }

    /// Replace the obstacles added to the cost field, or remove them with `None`.
    ///
    /// Does not run a cycle. The field is rebuilt with the new obstacles on the next cycle.
    pub fn set_obstacles(&mut self, obstacles: Option<ObstacleSet>) {
        self.obstacles = obstacles;
        self.field = None;
    }

    /// Return to the state just after creation, keeping only the parameters and obstacles.
    ///
    /// The latest state, path and cost field are dropped along with the previously selected
    /// sequence and the cycle count, so the controller is Idle until both inputs arrive again.
    /// With a seed set, the cycles following a reset repeat those following creation given the
    /// same inputs. Mailbox inputs already consumed are accepted again by the next `proc`.
    pub fn reset(&mut self) {
        self.state = None;
        self.path = None;
        self.field = None;
        self.warm_start = None;
        self.cycle_index = 0;
        self.last_result = None;
        self.seen_state_version = 0;
        self.seen_path_version = 0;
        self.mode = TrajCtrlMode::Idle;
    }

    pub fn mode(&self) -> TrajCtrlMode {
        self.mode
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// The result of the most recent completed cycle.
    pub fn last_result(&self) -> Option<&Arc<OptimizationResult>> {
        self.last_result.as_ref()
    }

    /// The current cost field, if one has been built.
    pub fn cost_field(&self) -> Option<&Arc<CostField>> {
        self.field.as_ref().map(|(_, f)| f)
    }

    fn store_path(&mut self, path: Arc<Path>) {
        self.path_count += 1;
        self.path = Some((self.path_count, path));
        self.update_mode();
    }

    fn store_state(&mut self, state: RobotState) {
        self.state = Some(state);
        self.update_mode();
    }

    fn update_mode(&mut self) {
        self.mode = match (&self.state, &self.path) {
            (Some(_), Some(_)) => TrajCtrlMode::Ready,
            _ => TrajCtrlMode::Idle,
        };
    }

    /// Run one control cycle.
    fn cycle(&mut self) -> CycleOutcome {
        let (state, (path_version, path)) = match (self.state, self.path.clone()) {
            (Some(s), Some(p)) => (s, p),
            (None, Some(_)) => return self.idle(IdleReason::MissingState),
            (Some(_), None) => return self.idle(IdleReason::MissingPath),
            (None, None) => return self.idle(IdleReason::MissingStateAndPath),
        };

        self.mode = TrajCtrlMode::Cycling;
        let outcome = self.run_cycle(&state, path_version, &path);
        self.mode = TrajCtrlMode::Ready;

        if let CycleOutcome::Fault(ref fault) = outcome {
            warn!("TrajCtrl cycle skipped: {}", fault);
        }

        outcome
    }

    fn idle(&self, reason: IdleReason) -> CycleOutcome {
        trace!("TrajCtrl idle: {:?}", reason);
        CycleOutcome::Idle(reason)
    }

    fn run_cycle(&mut self, state: &RobotState, path_version: u64, path: &Path) -> CycleOutcome {
        let start = Instant::now();

        // ---- INPUT VALIDATION ----

        if !state.is_finite() {
            return CycleOutcome::Fault(Fault::NonFiniteState(*state));
        }

        if let Err(e) = path.validate() {
            return CycleOutcome::Fault(Fault::InvalidPath(e));
        }

        // ---- COST FIELD ----

        let reach_m = self.params.horizon_reach_m();

        let cached = match self.field {
            None => Err(FieldRebuild::NoField),
            Some((version, _)) if version != path_version => Err(FieldRebuild::PathChanged),
            Some((_, ref f)) if !f.contains_region(&state.position_m, reach_m) => {
                Err(FieldRebuild::HorizonLeavesField)
            }
            Some((_, ref f)) => Ok(f.clone()),
        };

        let field_rebuilt = cached.is_err();
        let field = match cached {
            Ok(f) => f,
            Err(reason) => match self.build_field(path, state, reach_m) {
                Ok(f) => {
                    debug!(
                        "Cost field rebuilt ({:?}) for path version {} with origin {:?}",
                        reason,
                        path_version,
                        [f.origin_m().x, f.origin_m().y]
                    );
                    self.field = Some((path_version, f.clone()));
                    f
                }
                Err(e) => return CycleOutcome::Fault(Fault::CostField(e)),
            },
        };

        // ---- SAMPLE, ROLLOUT AND SCORE ----

        let mut rng = cycle_rng(self.params.sampling.seed, self.cycle_index);
        let nominal = self.sampler.nominal(self.warm_start.as_deref());
        let sequences = self.sampler.sample(&self.model, state, &nominal, &mut rng);

        let particles: Vec<Particle> = sequences
            .into_iter()
            .map(|seq| {
                let mut particle = self.sampler.rollout(&self.model, state, seq);
                particle.cost = self.evaluator.score(&particle, &field);
                particle
            })
            .collect();

        // ---- SELECTION ----

        // Strictly lower cost is required to replace the best, so ties go to the lowest index
        let mut best_index = 0;
        for (i, particle) in particles.iter().enumerate().skip(1) {
            if particle.cost < particles[best_index].cost {
                best_index = i;
            }
        }

        let best = &particles[best_index];
        let best_cost = best.cost;

        // Only reachable with a zero horizon, which validation rejects
        let first = match best.first_control() {
            Some(c) => c,
            None => return CycleOutcome::Fault(Fault::EmptySequence),
        };

        let limit = self.params.velocity_limit_ms;
        let control = Control::new(first.speed_ms.max(-limit).min(limit), first.turn_rate_rads);

        if !control.is_finite() {
            return CycleOutcome::Fault(Fault::NonFiniteCommand(control));
        }

        self.warm_start = Some(best.controls.clone());

        let result = Arc::new(OptimizationResult {
            particles,
            best_index,
            cost_field: field,
        });
        self.last_result = Some(result.clone());

        // ---- REPORTING ----

        let cycle_duration_s = start.elapsed().as_secs_f64();
        let budget_exceeded = cycle_duration_s > self.params.timestep_s;
        if budget_exceeded {
            warn!(
                "TrajCtrl cycle {} took {:.4} s, longer than the {} s timestep",
                self.cycle_index, cycle_duration_s, self.params.timestep_s
            );
        }

        let report = StatusReport {
            cycle_index: self.cycle_index,
            num_particles: result.particles.len(),
            best_index,
            best_cost,
            field_rebuilt,
            cycle_duration_s,
            budget_exceeded,
        };

        trace!(
            "TrajCtrl cycle {}: selected {} of {} (cost {:.4}), command v = {:.3} m/s, w = {:.3} rad/s",
            self.cycle_index,
            best_index,
            report.num_particles,
            best_cost,
            control.speed_ms,
            control.turn_rate_rads
        );

        self.cycle_index += 1;

        CycleOutcome::Command(CycleOutput {
            command: VelocityCommand {
                control,
                wheel_rates: control.to_wheel_rates(self.params.axle_length_m),
            },
            report,
            diagnostics: if self.params.debug {
                Some(result)
            } else {
                None
            },
        })
    }
}

impl<M: MotionModel> TrajCtrl<M> {
    /// Build a cost field for the path, placed to cover the vehicle's reach over one horizon.
    fn build_field(
        &self,
        path: &Path,
        state: &RobotState,
        reach_m: f64,
    ) -> Result<Arc<CostField>, CostFieldError> {
        let centre_m = field_centre_m(&self.params.cost_field, path, &state.position_m, reach_m);
        let mut field = CostField::build_centred(self.params.cost_field, path, centre_m)?;

        if let Some(ref obs) = self.obstacles {
            field.inject_obstacles(&obs.points_m, obs.radius_m, obs.added_cost);
        }

        Ok(Arc::new(field))
    }
}

impl OptimizationResult {
    /// The selected particle.
    pub fn best(&self) -> &Particle {
        &self.particles[self.best_index]
    }
}

impl CycleOutcome {
    /// The emitted command, if the cycle produced one.
    pub fn command(&self) -> Option<&VelocityCommand> {
        match self {
            CycleOutcome::Command(out) => Some(&out.command),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Centre of a field which covers the square of half-width `reach_m` around the vehicle, and as
/// much of the path's bounding box as the extent allows.
///
/// If the path and the vehicle's reach fit together the field is centred on both.
fn field_centre_m(
    params: &CostFieldParams,
    path: &Path,
    position_m: &Vector2<f64>,
    reach_m: f64,
) -> Vector2<f64> {
    let reach = Vector2::repeat(reach_m);

    let wanted_m = match path.bounds() {
        Some(b) => {
            0.5 * (b.min_m.inf(&(position_m - reach)) + b.max_m.sup(&(position_m + reach)))
        }
        None => *position_m,
    };

    Vector2::new(
        centre_on_axis(wanted_m.x, position_m.x, reach_m, params.width_m),
        centre_on_axis(wanted_m.y, position_m.y, reach_m, params.height_m),
    )
}

/// Move `wanted` as little as possible so that `position +/- reach` stays within `extent`.
fn centre_on_axis(wanted: f64, position: f64, reach: f64, extent: f64) -> f64 {
    let slack = 0.5 * extent - reach;

    if slack <= 0.0 {
        position
    } else {
        wanted.max(position - slack).min(position + slack)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::traj_ctrl::{params::test::test_params, InputMailbox};

    fn straight_path() -> Path {
        Path::from_points(vec![(0.0, 0.0), (10.0, 0.0)])
    }

    fn expect_command(outcome: CycleOutcome) -> CycleOutput {
        match outcome {
            CycleOutcome::Command(out) => out,
            other => panic!("Expected a command, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_until_both_inputs_known() {
        let mut ctrl = TrajCtrl::new(test_params()).unwrap();
        assert_eq!(ctrl.mode(), TrajCtrlMode::Idle);

        let outcome = ctrl.set_state(RobotState::new(0.0, 0.0, 0.0));
        assert!(matches!(
            outcome,
            CycleOutcome::Idle(IdleReason::MissingPath)
        ));
        assert_eq!(ctrl.mode(), TrajCtrlMode::Idle);
        assert!(ctrl.last_result().is_none());
        assert!(ctrl.cost_field().is_none());

        let mut ctrl = TrajCtrl::new(test_params()).unwrap();
        let outcome = ctrl.set_path(straight_path());
        assert!(matches!(
            outcome,
            CycleOutcome::Idle(IdleReason::MissingState)
        ));

        let outcome = ctrl.set_state(RobotState::new(0.0, 0.0, 0.0));
        assert!(outcome.command().is_some());
        assert_eq!(ctrl.mode(), TrajCtrlMode::Ready);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut p = test_params();
        p.num_samples = 0;

        assert_eq!(
            TrajCtrl::new(p).err(),
            Some(ConfigError::ZeroCount("num_samples"))
        );
    }

    #[test]
    fn test_single_sample_selects_first() {
        let mut p = test_params();
        p.num_samples = 1;
        p.debug = true;
        let mut ctrl = TrajCtrl::new(p).unwrap();

        ctrl.set_path(straight_path());

        for i in 0..5 {
            let out = expect_command(ctrl.set_state(RobotState::new(i as f64 * 0.1, -1.0, 0.3)));

            assert_eq!(out.report.best_index, 0);
            assert_eq!(out.report.num_particles, 1);
            assert_eq!(out.diagnostics.unwrap().best_index, 0);
        }
    }

    #[test]
    fn test_ties_select_lowest_index() {
        // Without perturbation every candidate is identical
        let mut p = test_params();
        p.sampling.linear_std_ms = 0.0;
        p.sampling.angular_std_rads = 0.0;
        p.debug = true;
        let mut ctrl = TrajCtrl::new(p).unwrap();

        ctrl.set_path(straight_path());
        let out = expect_command(ctrl.set_state(RobotState::new(1.0, 1.0, 0.0)));

        let result = out.diagnostics.unwrap();
        assert!(result
            .particles
            .iter()
            .all(|pt| pt.cost == result.particles[0].cost));
        assert_eq!(result.best_index, 0);
    }

    #[test]
    fn test_selects_minimum_cost() {
        let mut p = test_params();
        p.debug = true;
        let mut ctrl = TrajCtrl::new(p).unwrap();

        ctrl.set_path(straight_path());
        let out = expect_command(ctrl.set_state(RobotState::new(0.0, -1.0, 0.0)));
        let result = out.diagnostics.unwrap();

        let min = result
            .particles
            .iter()
            .map(|pt| pt.cost)
            .fold(std::f64::INFINITY, f64::min);

        assert_eq!(result.best().cost, min);
        assert_eq!(out.report.best_cost, min);
        assert!(result.particles[..result.best_index]
            .iter()
            .all(|pt| pt.cost > min));
        assert_eq!(
            out.command.control,
            result.best().first_control().unwrap()
        );
    }

    #[test]
    fn test_seeded_runs_are_deterministic() {
        let states = [
            RobotState::new(0.0, -2.0, 0.0),
            RobotState::new(0.1, -1.9, 0.05).with_twist(Control::new(0.2, 0.2)),
            RobotState::new(0.2, -1.8, 0.1).with_twist(Control::new(0.4, 0.3)),
        ];

        let run = |ctrl: &mut TrajCtrl| -> Vec<Control> {
            ctrl.set_path(straight_path());
            states
                .iter()
                .map(|s| ctrl.set_state(*s).command().unwrap().control)
                .collect()
        };

        let mut a = TrajCtrl::new(test_params()).unwrap();
        let mut b = TrajCtrl::new(test_params()).unwrap();

        let first = run(&mut a);
        assert_eq!(first, run(&mut b));

        a.reset();
        assert_eq!(a.mode(), TrajCtrlMode::Idle);
        assert!(a.cost_field().is_none());
        assert_eq!(first, run(&mut a));
    }

    #[test]
    fn test_candidates_respect_acceleration_bound() {
        let mut p = test_params();
        p.debug = true;
        let bound = p.acceleration_bound;
        let dt = p.timestep_s;
        let mut ctrl = TrajCtrl::new(p).unwrap();
        let eps = 1e-9;

        ctrl.set_path(straight_path());
        let state = RobotState::new(2.0, 1.0, 1.0).with_twist(Control::new(0.5, -0.4));
        let out = expect_command(ctrl.set_state(state));

        for particle in out.diagnostics.unwrap().particles.iter() {
            let mut prev = state.twist;

            for c in particle.controls.iter() {
                let lin_acc = (c.speed_ms - prev.speed_ms) / dt;
                let ang_acc = (c.turn_rate_rads - prev.turn_rate_rads) / dt;

                assert!(lin_acc >= bound.lower - eps && lin_acc <= bound.upper + eps);
                assert!(ang_acc >= bound.lower - eps && ang_acc <= bound.upper + eps);

                prev = *c;
            }
        }
    }

    #[test]
    fn test_turns_towards_path() {
        let mut ctrl = TrajCtrl::new(test_params()).unwrap();

        ctrl.set_path(straight_path());
        let out = expect_command(ctrl.set_state(RobotState::new(0.0, -2.0, 0.0)));

        assert!(out.command.control.turn_rate_rads > 0.0);
        assert!(out.command.wheel_rates.right_ms > out.command.wheel_rates.left_ms);
    }

    #[test]
    fn test_turns_towards_path_longer_than_field() {
        let mut p = test_params();
        p.cost_field.width_m = 20.0;
        p.cost_field.height_m = 20.0;
        p.debug = true;
        let mut ctrl = TrajCtrl::new(p).unwrap();

        ctrl.set_path(Path::from_points(vec![(0.0, 0.0), (40.0, 0.0)]));
        let out = expect_command(ctrl.set_state(RobotState::new(0.0, -2.0, 0.0)));

        let result = out.diagnostics.unwrap();
        let field = &result.cost_field;

        // Every rollout is scored inside the field, none against the sentinel
        assert!(field.contains_region(&Vector2::new(0.0, -2.0), 2.0));
        assert!(result
            .particles
            .iter()
            .flat_map(|pt| pt.states.iter())
            .all(|st| field.query(&st.position_m) < field.max_cost()));

        assert!(out.command.control.turn_rate_rads > 0.0);
    }

    #[test]
    fn test_cost_field_follows_vehicle_along_long_path() {
        let mut p = test_params();
        p.cost_field.width_m = 20.0;
        p.cost_field.height_m = 20.0;
        let mut ctrl = TrajCtrl::new(p).unwrap();

        ctrl.set_path(Path::from_points(vec![(0.0, 0.0), (40.0, 0.0)]));
        let out = expect_command(ctrl.set_state(RobotState::new(0.0, -2.0, 0.0)));
        assert!(out.report.field_rebuilt);

        // Field spans x in [-2, 18], so the reach around x = 7 is still covered
        let out = expect_command(ctrl.set_state(RobotState::new(7.0, -1.0, 0.0)));
        assert!(!out.report.field_rebuilt);

        // Reach around x = 17 extends past the field
        let out = expect_command(ctrl.set_state(RobotState::new(17.0, -1.0, 0.0)));
        assert!(out.report.field_rebuilt);
        assert!(ctrl
            .cost_field()
            .unwrap()
            .contains_region(&Vector2::new(17.0, -1.0), 2.0));
    }

    #[test]
    fn test_degenerate_path_faults() {
        let mut ctrl = TrajCtrl::new(test_params()).unwrap();
        ctrl.set_state(RobotState::new(0.0, 0.0, 0.0));

        let outcome = ctrl.set_path(Path::from_points(vec![(1.0, 1.0)]));
        assert!(matches!(
            outcome,
            CycleOutcome::Fault(Fault::InvalidPath(PathError::SinglePoint))
        ));
        assert!(outcome.command().is_none());

        let outcome = ctrl.set_path(Path::new_empty());
        assert!(matches!(
            outcome,
            CycleOutcome::Fault(Fault::InvalidPath(PathError::Empty))
        ));
        assert!(ctrl.last_result().is_none());

        // Recovers once a usable path arrives
        assert!(ctrl.set_path(straight_path()).command().is_some());
    }

    #[test]
    fn test_non_finite_state_faults() {
        let mut ctrl = TrajCtrl::new(test_params()).unwrap();
        ctrl.set_path(straight_path());

        let outcome = ctrl.set_state(RobotState::new(std::f64::NAN, 0.0, 0.0));
        assert!(matches!(
            outcome,
            CycleOutcome::Fault(Fault::NonFiniteState(_))
        ));
        assert_eq!(ctrl.mode(), TrajCtrlMode::Ready);
    }

    #[test]
    fn test_command_within_velocity_limit() {
        let mut p = test_params();
        p.velocity_limit_ms = 0.8;
        p.sampling.nominal_speed_ms = 0.8;
        p.sampling.linear_std_ms = 2.0;
        p.cost_coefficients.velocity = 0.0;
        let limit = p.velocity_limit_ms;
        let mut ctrl = TrajCtrl::new(p).unwrap();

        ctrl.set_path(Path::from_points(vec![(0.0, 0.0), (20.0, 0.0)]));

        let mut state = RobotState::new(0.0, 0.5, 0.0).with_twist(Control::new(0.7, 0.0));
        for _ in 0..20 {
            let cmd = ctrl.set_state(state).command().unwrap().control;
            assert!(cmd.speed_ms.abs() <= limit);

            state = ctrl.model().predict(&state, &cmd, 0.1);
        }

        // Already moving faster than the limit
        let fast = RobotState::new(0.0, 0.0, 0.0).with_twist(Control::new(1.5, 0.0));
        let cmd = ctrl.set_state(fast).command().unwrap().control;
        assert!(cmd.speed_ms.abs() <= limit);
    }

    #[test]
    fn test_large_velocity_cost_within_limit() {
        // Nominal at the limit with wide sampling, so most candidates ask for more than 1 m/s
        let mut p = test_params();
        p.velocity_limit_ms = 1.0;
        p.cost_coefficients.velocity = 1000.0;
        p.sampling.nominal_speed_ms = 1.0;
        p.sampling.linear_std_ms = 1.5;
        p.debug = true;
        let mut ctrl = TrajCtrl::new(p).unwrap();

        ctrl.set_path(Path::from_points(vec![(0.0, 0.0), (30.0, 0.0)]));

        let mut state = RobotState::new(0.0, 0.2, 0.0).with_twist(Control::new(1.0, 0.0));
        for _ in 0..15 {
            let out = expect_command(ctrl.set_state(state));
            let cmd = out.command.control;

            assert!(cmd.speed_ms.abs() <= 1.0);
            assert!(out
                .diagnostics
                .unwrap()
                .particles
                .iter()
                .flat_map(|pt| pt.controls.iter())
                .all(|c| c.speed_ms.abs() <= 1.0));

            state = ctrl.model().predict(&state, &cmd, 0.1);
        }
    }

    #[test]
    fn test_init_from_params_file() {
        let root = std::env::temp_dir().join("traj_ctrl_init_test");
        std::fs::create_dir_all(root.join("params")).unwrap();

        let valid = r#"
            timestep_s = 0.1
            horizon = 20
            num_samples = 16
            velocity_limit_ms = 1.0
            axle_length_m = 0.5

            [cost_coefficients]
            path = 1.0
            velocity = 10.0
            acceleration = 0.01
            angular_acceleration = 0.01

            [acceleration_bound]
            lower = -3.0
            upper = 2.0

            [cost_field]
            width_m = 20.0
            height_m = 20.0
            resolution_m = 0.1

            [sampling]
            linear_std_ms = 0.3
            angular_std_rads = 0.8
            step_jitter_ratio = 0.2
            max_sigma = 3.0
            nominal_speed_ms = 0.5
            seed = 7
        "#;
        std::fs::write(root.join("params").join("valid.toml"), valid).unwrap();
        std::fs::write(
            root.join("params").join("invalid.toml"),
            valid.replace("num_samples = 16", "num_samples = 0"),
        )
        .unwrap();

        std::env::set_var(util::host::SW_ROOT_ENV_VAR, &root);

        let ctrl = TrajCtrl::init("valid.toml").unwrap();
        assert_eq!(ctrl.params().num_samples, 16);
        assert_eq!(ctrl.params().sampling.seed, Some(7));
        assert_eq!(ctrl.mode(), TrajCtrlMode::Idle);

        assert!(matches!(
            TrajCtrl::init("invalid.toml"),
            Err(TrajCtrlError::InvalidParams(ConfigError::ZeroCount("num_samples")))
        ));
        assert!(matches!(
            TrajCtrl::init("missing.toml"),
            Err(TrajCtrlError::ParamLoadError(params::LoadError::FileLoadError(_)))
        ));
    }

    #[test]
    fn test_cost_field_reused_until_path_changes() {
        let mut p = test_params();
        p.debug = true;
        let mut ctrl = TrajCtrl::new(p).unwrap();

        ctrl.set_state(RobotState::new(0.0, 0.0, 0.0));
        let first = expect_command(ctrl.set_path(straight_path()));
        assert!(first.report.field_rebuilt);

        let second = expect_command(ctrl.set_state(RobotState::new(0.1, 0.0, 0.0)));
        assert!(!second.report.field_rebuilt);
        assert!(Arc::ptr_eq(
            &first.diagnostics.unwrap().cost_field,
            &second.diagnostics.unwrap().cost_field
        ));

        let third = expect_command(ctrl.set_path(Path::from_points(vec![(0.0, 0.0), (0.0, 10.0)])));
        assert!(third.report.field_rebuilt);
        assert_eq!(third.report.cycle_index, 2);
    }

    #[test]
    fn test_obstacles_applied_to_field() {
        let mut ctrl = TrajCtrl::new(test_params()).unwrap();

        ctrl.set_path(straight_path());
        ctrl.set_state(RobotState::new(0.0, 0.0, 0.0));

        let obstacle = Vector2::new(3.0, 0.0);
        let clear = ctrl.cost_field().unwrap().query(&obstacle);

        ctrl.set_obstacles(Some(ObstacleSet {
            points_m: vec![obstacle],
            radius_m: 0.5,
            added_cost: 5.0,
        }));
        assert!(ctrl.cost_field().is_none());

        let out = expect_command(ctrl.set_state(RobotState::new(0.0, 0.0, 0.0)));
        assert!(out.report.field_rebuilt);
        assert!((ctrl.cost_field().unwrap().query(&obstacle) - (clear + 5.0)).abs() < 1e-9);

        ctrl.set_obstacles(None);
        ctrl.set_state(RobotState::new(0.0, 0.0, 0.0));
        assert!((ctrl.cost_field().unwrap().query(&obstacle) - clear).abs() < 1e-9);
    }

    #[test]
    fn test_report_serialises() {
        let mut ctrl = TrajCtrl::new(test_params()).unwrap();

        ctrl.set_path(straight_path());
        let out = expect_command(ctrl.set_state(RobotState::new(0.0, -0.5, 0.0)));

        let json = serde_json::to_value(&out.report).unwrap();
        assert_eq!(json["cycle_index"], 0);
        assert_eq!(json["num_particles"], 64);
        assert_eq!(json["field_rebuilt"], true);

        let json = serde_json::to_value(&out.command).unwrap();
        assert!(json["control"]["speed_ms"].is_number());
        assert!(json["wheel_rates"]["left_ms"].is_number());
    }

    #[test]
    fn test_proc_mailbox() {
        let mailbox = InputMailbox::new();
        let mut ctrl = TrajCtrl::new(test_params()).unwrap();

        assert!(matches!(
            ctrl.proc(&mailbox.snapshot()),
            CycleOutcome::Idle(IdleReason::NoNewInput)
        ));

        mailbox.push_path(straight_path());
        mailbox.push_state(RobotState::new(0.0, -1.0, 0.0));
        mailbox.push_state(RobotState::new(0.5, -1.0, 0.0));

        let out = expect_command(ctrl.proc(&mailbox.snapshot()));
        assert!(out.report.field_rebuilt);
        assert_eq!(out.report.cycle_index, 0);

        assert!(matches!(
            ctrl.proc(&mailbox.snapshot()),
            CycleOutcome::Idle(IdleReason::NoNewInput)
        ));

        mailbox.push_state(RobotState::new(0.6, -1.0, 0.0));
        let out = expect_command(ctrl.proc(&mailbox.snapshot()));
        assert!(!out.report.field_rebuilt);
        assert_eq!(out.report.cycle_index, 1);
    }
}
