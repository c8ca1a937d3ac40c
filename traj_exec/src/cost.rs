//! # Cost evaluation
//!
//! Scores a particle against the cost field and the vehicle's dynamic limits. The cost is a
//! non-negative weighted sum of four terms:
//!
//! - path: mean cost field value over every state of the trajectory,
//! - velocity: sum over steps of the squared excess of |v| above the velocity limit,
//! - acceleration: sum over steps of |dv/dt|,
//! - angular acceleration: sum over steps of |dw/dt|.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{cost_field::CostField, rollout::Particle};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Weights applied to each term of the cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostCoefficients {
    pub path: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub angular_acceleration: f64,
}

/// The weighted terms making up the cost of a particle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CostBreakdown {
    pub path: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub angular_acceleration: f64,
    pub total: f64,
}

/// Scores particles.
#[derive(Debug, Clone)]
pub struct CostEvaluator {
    coefficients: CostCoefficients,
    velocity_limit_ms: f64,
    timestep_s: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CostEvaluator {
    pub fn new(coefficients: CostCoefficients, velocity_limit_ms: f64, timestep_s: f64) -> Self {
        Self {
            coefficients,
            velocity_limit_ms,
            timestep_s,
        }
    }

    /// Total cost of the particle.
    pub fn score(&self, particle: &Particle, field: &CostField) -> f64 {
        self.breakdown(particle, field).total
    }

    /// Cost of the particle split into its weighted terms.
    ///
    /// Step differences are taken between consecutive states, so the first step is measured from
    /// the twist of the initial state.
    pub fn breakdown(&self, particle: &Particle, field: &CostField) -> CostBreakdown {
        let coeffs = &self.coefficients;

        let path_mean = if particle.states.is_empty() {
            0.0
        } else {
            particle
                .states
                .iter()
                .map(|s| field.query(&s.position_m))
                .sum::<f64>()
                / particle.states.len() as f64
        };

        let mut velocity = 0.0;
        let mut acceleration = 0.0;
        let mut angular_acceleration = 0.0;

        for pair in particle.states.windows(2) {
            let (prev, next) = (&pair[0].twist, &pair[1].twist);

            velocity += velocity_penalty(next.speed_ms, self.velocity_limit_ms);
            acceleration += ((next.speed_ms - prev.speed_ms) / self.timestep_s).abs();
            angular_acceleration +=
                ((next.turn_rate_rads - prev.turn_rate_rads) / self.timestep_s).abs();
        }

        let mut breakdown = CostBreakdown {
            path: coeffs.path * path_mean,
            velocity: coeffs.velocity * velocity,
            acceleration: coeffs.acceleration * acceleration,
            angular_acceleration: coeffs.angular_acceleration * angular_acceleration,
            total: 0.0,
        };

        let total = breakdown.path
            + breakdown.velocity
            + breakdown.acceleration
            + breakdown.angular_acceleration;

        breakdown.total = if total.is_finite() { total } else { std::f64::MAX };

        breakdown
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Penalty for exceeding the velocity limit, zero within the limit and quadratic beyond it.
pub fn velocity_penalty(speed_ms: f64, limit_ms: f64) -> f64 {
    let excess = speed_ms.abs() - limit_ms;

    if excess > 0.0 {
        excess * excess
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
