//! Differential drive motion model
//!
//! The two wheels of a differential drive vehicle share a common axle, so its motion reduces to
//! that of a unicycle: a linear speed along the heading and a turn rate about the axle centre.
//! The wheel rates themselves can be recovered using the axle length, see
//! [`Control::to_wheel_rates`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use util::maths::wrap_to_pi;

use super::{Control, MotionModel};
use crate::loc::RobotState;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Limits on the rate of change of a velocity.
///
/// Both limits are signed: `lower` is the most negative allowed rate of change (braking) and
/// `upper` the most positive. They are applied exactly as given, so a vehicle which can brake
/// harder than it can accelerate is described by `|lower| > upper`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccelBound {
    /// Units: meters/second^2 (linear) or radians/second^2 (angular)
    pub lower: f64,

    /// Units: meters/second^2 (linear) or radians/second^2 (angular)
    pub upper: f64,
}

/// Parameters of the differential drive model.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffDriveParams {
    /// Bound applied to both the linear and angular acceleration
    pub acceleration_bound: AccelBound,

    /// Distance between the two wheels
    ///
    /// Units: meters
    pub axle_length_m: f64,
}

/// Kinematic differential drive model.
#[derive(Debug, Clone)]
pub struct DifferentialDrive {
    params: DiffDriveParams,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl AccelBound {
    /// Clamp the change `desired - prev` so that `change / dt_s` lies within the bound.
    pub fn clamp_change(&self, prev: f64, desired: f64, dt_s: f64) -> f64 {
        let change = (desired - prev).max(self.lower * dt_s).min(self.upper * dt_s);

        prev + change
    }
}

impl DifferentialDrive {
    pub fn new(params: DiffDriveParams) -> Self {
        Self { params }
    }
}

impl MotionModel for DifferentialDrive {
    /// Integrate heading, then position along the new heading.
    fn predict(&self, state: &RobotState, control: &Control, dt_s: f64) -> RobotState {
        let heading_rad = wrap_to_pi(state.heading_rad + control.turn_rate_rads * dt_s);

        let mut position_m = state.position_m;
        position_m.x += control.speed_ms * heading_rad.cos() * dt_s;
        position_m.y += control.speed_ms * heading_rad.sin() * dt_s;

        RobotState {
            position_m,
            heading_rad,
            twist: *control,
        }
    }

    fn clamp_acceleration(&self, prev: &Control, desired: &Control, dt_s: f64) -> Control {
        let bound = &self.params.acceleration_bound;

        Control {
            speed_ms: bound.clamp_change(prev.speed_ms, desired.speed_ms, dt_s),
            turn_rate_rads: bound.clamp_change(prev.turn_rate_rads, desired.turn_rate_rads, dt_s),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
