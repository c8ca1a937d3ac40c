//! Trajectory control executable entry point.
//!
//! # Architecture
//!
//! The executable hosts the trajectory controller against a simulated differential drive plant:
//!
//!     - Initialise session, logging and the controller
//!     - Start the path source thread, which publishes reference paths into the input mailbox
//!     - Main loop:
//!         - Publish the simulated vehicle state into the input mailbox
//!         - Run the controller on the latest inputs
//!         - Integrate the plant with the emitted command
//!         - Save diagnostics if enabled
//!         - Sleep until the end of the cycle period

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, error, info, warn};
use nalgebra::Vector2;
use serde::Serialize;
use std::env;
use std::thread;
use std::time::{Duration, Instant};

// Internal
use traj_lib::{
    cost_field::FieldSample,
    loc::RobotState,
    model::MotionModel,
    path::Path,
    rollout::Particle,
    traj_ctrl::{
        CycleOutcome, IdleReason, InputMailbox, ObstacleSet, Params, StatusReport, TrajCtrl,
        VelocityCommand,
    },
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Default parameter file, relative to the params directory.
const DEFAULT_PARAMS_FILE: &str = "traj_ctrl.toml";

/// Maximum number of cycles to run before giving up on reaching the goal.
const MAX_NUM_CYCLES: u64 = 1200;

/// Diagnostics are saved every this many cycles when debug is set in the parameters.
const DIAGNOSTIC_PERIOD_CYCLES: u64 = 10;

/// Distance from the end of the final path at which the goal is considered reached.
const GOAL_TOLERANCE_M: f64 = 0.25;

/// Time after which the path source replaces the first path with the second.
const PATH_SWITCH_DELAY_S: f64 = 15.0;

/// Spacing of the waypoints of the published paths.
const PATH_SEPARATION_M: f64 = 0.1;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Everything needed to visualise one cycle offline.
#[derive(Serialize)]
struct DiagnosticBundle {
    report: StatusReport,
    command: VelocityCommand,
    best_index: usize,
    particles: Vec<Particle>,
    field: Vec<FieldSample>,
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
        Session::new("traj_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Trajectory Control Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- INITIALISE MODULES ----

    let args: Vec<String> = env::args().collect();

    debug!("CLI arguments: {:?}", args);

    let mut traj_ctrl = match args.len() {
        1 => TrajCtrl::init(DEFAULT_PARAMS_FILE).wrap_err("Failed to initialise TrajCtrl")?,
        2 => {
            info!("Loading parameters from \"{}\"", &args[1]);
            let params: Params = util::params::load_from(&args[1])
                .wrap_err("Could not load the trajectory control parameters")?;
            TrajCtrl::new(params).wrap_err("Failed to initialise TrajCtrl")?
        }
        n => {
            return Err(eyre!(
                "Expected either zero or one argument, found {}",
                n - 1
            ))
        }
    };
    info!("TrajCtrl init complete");

    let timestep_s = traj_ctrl.params().timestep_s;

    // A single obstacle just beside the first path
    traj_ctrl.set_obstacles(Some(ObstacleSet {
        points_m: vec![Vector2::new(4.0, 0.3)],
        radius_m: 0.3,
        added_cost: 2.0,
    }));

    let mailbox = InputMailbox::new();

    // ---- PATH SOURCE ----

    let first_path = Path::direct(
        Vector2::new(0.0, 0.0),
        Vector2::new(8.0, 0.0),
        PATH_SEPARATION_M,
    )
    .wrap_err("Could not build the first path")?;
    let second_path = Path::direct(
        Vector2::new(8.0, 0.0),
        Vector2::new(8.0, 6.0),
        PATH_SEPARATION_M,
    )
    .wrap_err("Could not build the second path")?;

    let goal_m = second_path
        .waypoints
        .last()
        .map(|w| w.position_m)
        .ok_or_else(|| eyre!("Second path has no waypoints"))?;

    let path_source = {
        let mailbox = mailbox.clone();
        thread::spawn(move || {
            info!("Publishing first path ({} points)", first_path.len());
            mailbox.push_path(first_path);

            thread::sleep(Duration::from_secs_f64(PATH_SWITCH_DELAY_S));

            info!("Publishing second path ({} points)", second_path.len());
            mailbox.push_path(second_path);
        })
    };

    // ---- MAIN LOOP ----

    let mut plant = RobotState::new(0.0, -1.0, 0.0);
    let mut num_faults = 0u64;
    let mut num_overruns = 0u64;
    let mut goal_reached = false;

    info!("Begining main loop\n");

    for cycle in 0..MAX_NUM_CYCLES {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        mailbox.push_state(plant);

        match traj_ctrl.proc(&mailbox.snapshot()) {
            CycleOutcome::Command(output) => {
                plant = traj_ctrl
                    .model()
                    .predict(&plant, &output.command.control, timestep_s);

                if output.report.budget_exceeded {
                    num_overruns += 1;
                }

                if let Some(ref result) = output.diagnostics {
                    if cycle % DIAGNOSTIC_PERIOD_CYCLES == 0 {
                        session.save(
                            format!("diagnostics/cycle_{:05}.json", output.report.cycle_index),
                            DiagnosticBundle {
                                report: output.report,
                                command: output.command,
                                best_index: result.best_index,
                                particles: result.particles.clone(),
                                field: result.cost_field.samples(),
                            },
                        );
                    }
                }
            }
            CycleOutcome::Idle(IdleReason::MissingPath) => {
                debug!("Waiting for a path");
            }
            CycleOutcome::Idle(_) => (),
            CycleOutcome::Fault(_) => {
                num_faults += 1;
            }
        }

        if (plant.position_m - goal_m).norm() < GOAL_TOLERANCE_M {
            info!("Goal reached after {} cycles", cycle + 1);
            goal_reached = true;
            break;
        }

        // Get cycle duration
        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match Duration::from_secs_f64(timestep_s).checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - timestep_s
            ),
        }
    }

    if !goal_reached {
        error!("Goal not reached within {} cycles", MAX_NUM_CYCLES);
    }

    info!(
        "Final state: position ({:.3}, {:.3}) m, heading {:.3} rad",
        plant.position_m.x, plant.position_m.y, plant.heading_rad
    );
    info!(
        "{} faulted cycles, {} cycles over budget",
        num_faults, num_overruns
    );

    if path_source.join().is_err() {
        warn!("Path source thread panicked");
    }

    session.exit();

    Ok(())
}
