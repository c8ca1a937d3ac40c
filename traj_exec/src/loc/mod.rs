//! # Localisation interface
//!
//! The controller does not perform localisation itself, it consumes the latest estimate of the
//! vehicle's pose and twist from an external source. This module defines that estimate.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::model::{Control, WheelRates};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The estimated state of the vehicle.
///
/// Position and heading are in the same frame as the reference path.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RobotState {
    /// Position of the vehicle
    pub position_m: Vector2<f64>,

    /// Heading (angle to the positive X axis) in the range (-pi, pi]
    pub heading_rad: f64,

    /// Current linear and angular velocity of the vehicle
    pub twist: Control,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RobotState {
    /// Create a new stationary state at the given pose.
    pub fn new(x_m: f64, y_m: f64, heading_rad: f64) -> Self {
        Self {
            position_m: Vector2::new(x_m, y_m),
            heading_rad,
            twist: Control::default(),
        }
    }

    /// Set the twist of the state.
    pub fn with_twist(mut self, twist: Control) -> Self {
        self.twist = twist;
        self
    }

    /// Set the twist of the state from measured wheel rates.
    pub fn with_wheel_rates(mut self, rates: WheelRates, axle_length_m: f64) -> Self {
        self.twist = Control::from_wheel_rates(rates, axle_length_m);
        self
    }

    /// Returns true if every quantity in the state is finite.
    pub fn is_finite(&self) -> bool {
        self.position_m.iter().all(|v| v.is_finite())
            && self.heading_rad.is_finite()
            && self.twist.is_finite()
    }
}
