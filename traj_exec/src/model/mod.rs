//! # Motion models
//!
//! A motion model predicts how the vehicle's state evolves under a control input, and limits how
//! quickly that control input may change. The rollout sampler, cost evaluator and trajectory
//! controller only interact with the vehicle through the [`MotionModel`] trait, so any vehicle
//! which can be described by a linear and angular velocity can be swapped in.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod diff_drive;

pub use diff_drive::{AccelBound, DiffDriveParams, DifferentialDrive};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::loc::RobotState;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A kinematic model of the vehicle.
pub trait MotionModel {
    /// Predict the state after applying `control` for `dt_s` seconds.
    ///
    /// Must be pure: the same inputs always produce the same output.
    fn predict(&self, state: &RobotState, control: &Control, dt_s: f64) -> RobotState;

    /// Limit the change from `prev` to `desired` over `dt_s` seconds to the model's acceleration
    /// capabilities.
    fn clamp_acceleration(&self, prev: &Control, desired: &Control, dt_s: f64) -> Control;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A velocity control input.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Control {
    /// Linear speed along the heading
    ///
    /// Units: meters/second
    pub speed_ms: f64,

    /// Angular rate about the vertical, positive anticlockwise
    ///
    /// Units: radians/second
    pub turn_rate_rads: f64,
}

/// Speeds of the two wheels of a differential drive vehicle.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WheelRates {
    /// Left wheel ground speed
    ///
    /// Units: meters/second
    pub left_ms: f64,

    /// Right wheel ground speed
    ///
    /// Units: meters/second
    pub right_ms: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Control {
    pub fn new(speed_ms: f64, turn_rate_rads: f64) -> Self {
        Self {
            speed_ms,
            turn_rate_rads,
        }
    }

    /// Convert a pair of wheel rates into the equivalent unicycle control.
    pub fn from_wheel_rates(rates: WheelRates, axle_length_m: f64) -> Self {
        Self {
            speed_ms: 0.5 * (rates.left_ms + rates.right_ms),
            turn_rate_rads: (rates.right_ms - rates.left_ms) / axle_length_m,
        }
    }

    /// Convert into the wheel rates which would produce this control.
    pub fn to_wheel_rates(&self, axle_length_m: f64) -> WheelRates {
        let half_diff = 0.5 * self.turn_rate_rads * axle_length_m;

        WheelRates {
            left_ms: self.speed_ms - half_diff,
            right_ms: self.speed_ms + half_diff,
        }
    }

    /// Returns true if both components are finite.
    pub fn is_finite(&self) -> bool {
        self.speed_ms.is_finite() && self.turn_rate_rads.is_finite()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wheel_rate_conversion() {
        let axle = 0.52;
        let ctrl = Control::new(0.8, -0.4);

        let rates = ctrl.to_wheel_rates(axle);
        assert!(rates.left_ms > rates.right_ms);

        let back = Control::from_wheel_rates(rates, axle);
        assert!((back.speed_ms - ctrl.speed_ms).abs() < 1e-12);
        assert!((back.turn_rate_rads - ctrl.turn_rate_rads).abs() < 1e-12);
    }

    #[test]
    fn test_point_turn_rates() {
        let rates = Control::new(0.0, 1.0).to_wheel_rates(1.0);

        assert_eq!(rates.left_ms, -0.5);
        assert_eq!(rates.right_ms, 0.5);
    }
}
