//! # Trajectory control module
//!
//! Trajectory control keeps the vehicle on a reference path by repeatedly optimising a short
//! horizon of velocity commands.
//!
//! Each cycle a set of candidate control sequences is drawn around a nominal sequence (the
//! previous cycle's winner, shifted one step). Every candidate is forward simulated with the
//! differential drive model and scored against a cost field giving the distance to the path,
//! with additional penalties on speed above the limit and on linear and angular acceleration.
//! The first control of the cheapest candidate is sent to the vehicle.
//!
//! The cost field is only rebuilt when the path changes, as building it is the most expensive
//! part of the cycle.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod inputs;
pub mod params;
pub mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use inputs::{InputMailbox, InputSnapshot};
pub use params::{ConfigError, Params};
pub use state::*;
