//! # Rollout sampler
//!
//! Generates the candidate control sequences evaluated in each control cycle and forward
//! simulates them into trajectories ("particles").
//!
//! Each candidate is the nominal sequence plus a random perturbation. The perturbation is a
//! single offset per candidate, drawn from a truncated normal distribution, plus smaller
//! independent per-step jitter. Every step of every candidate is then passed through the
//! velocity limit and the motion model's acceleration clamp, so all candidates are feasible.
//!
//! The first candidate is always the unperturbed nominal sequence.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::{
    loc::RobotState,
    model::{Control, MotionModel},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Multiplier used to decorrelate the seeds of consecutive cycles.
const CYCLE_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A sequence of controls, one per step of the horizon.
pub type ControlSequence = Vec<Control>;

/// One candidate trajectory.
#[derive(Debug, Clone, Serialize)]
pub struct Particle {
    /// States along the trajectory, starting with the initial state. Contains one more state than
    /// there are controls.
    pub states: Vec<RobotState>,

    /// The controls which produced the trajectory
    pub controls: ControlSequence,

    /// Cost of the trajectory, zero until it has been scored
    pub cost: f64,
}

/// Parameters of the perturbation applied to the nominal control sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Standard deviation of the per-candidate linear speed offset
    ///
    /// Units: meters/second
    pub linear_std_ms: f64,

    /// Standard deviation of the per-candidate turn rate offset
    ///
    /// Units: radians/second
    pub angular_std_rads: f64,

    /// Standard deviation of the per-step jitter, as a fraction of the offset standard deviation
    pub step_jitter_ratio: f64,

    /// Perturbations are truncated to this many standard deviations
    pub max_sigma: f64,

    /// Speed of the nominal sequence used before any sequence has been selected
    ///
    /// Units: meters/second
    pub nominal_speed_ms: f64,

    /// Seed for the random perturbations. If `None` every cycle is seeded from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Samples and simulates candidate control sequences.
#[derive(Debug, Clone)]
pub struct RolloutSampler {
    params: SamplingParams,
    horizon: usize,
    num_samples: usize,
    timestep_s: f64,
    velocity_limit_ms: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Particle {
    /// The first control of the particle, which is the one to be executed.
    pub fn first_control(&self) -> Option<Control> {
        self.controls.first().copied()
    }
}

impl RolloutSampler {
    pub fn new(
        params: SamplingParams,
        horizon: usize,
        num_samples: usize,
        timestep_s: f64,
        velocity_limit_ms: f64,
    ) -> Self {
        Self {
            params,
            horizon,
            num_samples,
            timestep_s,
            velocity_limit_ms,
        }
    }

    /// Build the nominal sequence for this cycle.
    ///
    /// If a sequence was selected in the previous cycle it is shifted forward one step, repeating
    /// its final control. Otherwise a constant forward sequence is used.
    pub fn nominal(&self, previous: Option<&[Control]>) -> ControlSequence {
        match previous {
            Some(prev) if !prev.is_empty() => {
                let last = prev[prev.len() - 1];

                prev.iter()
                    .skip(1)
                    .copied()
                    .chain(std::iter::repeat(last))
                    .take(self.horizon)
                    .collect()
            }
            _ => vec![Control::new(self.params.nominal_speed_ms, 0.0); self.horizon],
        }
    }

    /// Draw `num_samples` feasible control sequences around `nominal`.
    ///
    /// The first sequence is the feasible version of `nominal` itself. All random draws come from
    /// `rng`, so a seeded generator gives reproducible sequences.
    pub fn sample<M, R>(
        &self,
        model: &M,
        state: &RobotState,
        nominal: &[Control],
        rng: &mut R,
    ) -> Vec<ControlSequence>
    where
        M: MotionModel,
        R: Rng + ?Sized,
    {
        let mut sequences = Vec::with_capacity(self.num_samples);

        if self.num_samples == 0 {
            return sequences;
        }

        sequences.push(self.make_feasible(model, state, nominal));

        let jitter_linear = self.params.linear_std_ms * self.params.step_jitter_ratio;
        let jitter_angular = self.params.angular_std_rads * self.params.step_jitter_ratio;

        for _ in 1..self.num_samples {
            let offset = Control::new(
                self.truncated_normal(rng, self.params.linear_std_ms),
                self.truncated_normal(rng, self.params.angular_std_rads),
            );

            let perturbed: ControlSequence = nominal
                .iter()
                .map(|c| {
                    Control::new(
                        c.speed_ms + offset.speed_ms + self.truncated_normal(rng, jitter_linear),
                        c.turn_rate_rads
                            + offset.turn_rate_rads
                            + self.truncated_normal(rng, jitter_angular),
                    )
                })
                .collect();

            sequences.push(self.make_feasible(model, state, &perturbed));
        }

        sequences
    }

    /// Apply the velocity limit and acceleration clamp to every step of a sequence.
    ///
    /// The acceleration of the first step is measured from the current twist of `state`.
    pub fn make_feasible<M: MotionModel>(
        &self,
        model: &M,
        state: &RobotState,
        desired: &[Control],
    ) -> ControlSequence {
        let mut prev = state.twist;

        desired
            .iter()
            .map(|d| {
                let limited = Control::new(
                    d.speed_ms
                        .max(-self.velocity_limit_ms)
                        .min(self.velocity_limit_ms),
                    d.turn_rate_rads,
                );

                prev = model.clamp_acceleration(&prev, &limited, self.timestep_s);
                prev
            })
            .collect()
    }

    /// Forward simulate a control sequence from the given state.
    ///
    /// Deterministic: contains no randomness.
    pub fn rollout<M: MotionModel>(
        &self,
        model: &M,
        state: &RobotState,
        controls: ControlSequence,
    ) -> Particle {
        let mut states = Vec::with_capacity(controls.len() + 1);
        states.push(*state);

        for control in controls.iter() {
            let next = model.predict(&states[states.len() - 1], control, self.timestep_s);
            states.push(next);
        }

        Particle {
            states,
            controls,
            cost: 0.0,
        }
    }

    fn truncated_normal<R: Rng + ?Sized>(&self, rng: &mut R, std_dev: f64) -> f64 {
        let z: f64 = StandardNormal.sample(rng);

        z.max(-self.params.max_sigma).min(self.params.max_sigma) * std_dev
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Create the private random generator for one control cycle.
///
/// With a seed the generator depends only on the seed and the cycle index.
pub fn cycle_rng(seed: Option<u64>, cycle_index: u64) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s ^ cycle_index.wrapping_mul(CYCLE_SEED_MIX)),
        None => StdRng::from_entropy(),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
