//! # Trajectory control library.
//!
//! This library allows the executable and benchmarks to access items defined inside the
//! trajectory control crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Cost evaluator - scores candidate trajectories
pub mod cost;

/// Cost field - gridded distance to the reference path
pub mod cost_field;

/// Localisation types - the state of the vehicle
pub mod loc;

/// Motion models - predicts how the vehicle moves under a control
pub mod model;

/// Reference paths
pub mod path;

/// Rollout sampler - draws and simulates candidate control sequences
pub mod rollout;

/// Trajectory control module - keeps the vehicle on the given path
pub mod traj_ctrl;
