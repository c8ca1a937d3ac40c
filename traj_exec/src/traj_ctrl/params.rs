//! Trajectory control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use crate::{
    cost::CostCoefficients,
    cost_field::CostFieldParams,
    model::{AccelBound, DiffDriveParams},
    rollout::SamplingParams,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for trajectory control
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Params {
    /// Duration of one step of the horizon
    ///
    /// Units: seconds
    pub timestep_s: f64,

    /// Number of steps simulated for each candidate trajectory
    pub horizon: usize,

    /// Number of candidate trajectories evaluated each cycle
    pub num_samples: usize,

    /// Maximum linear speed of the vehicle
    ///
    /// Units: meters/second
    pub velocity_limit_ms: f64,

    /// Weights of each cost term
    pub cost_coefficients: CostCoefficients,

    /// Bound on linear and angular acceleration, `lower <= 0 <= upper`
    pub acceleration_bound: AccelBound,

    /// Distance between the drive wheels
    ///
    /// Units: meters
    pub axle_length_m: f64,

    /// Extent and resolution of the cost field
    pub cost_field: CostFieldParams,

    /// Perturbation of the nominal control sequence
    pub sampling: SamplingParams,

    /// If true each cycle's output includes the full optimisation result
    #[serde(default)]
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Invalid parameter values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be finite and greater than zero, found {1}")]
    NotPositive(&'static str, f64),

    #[error("{0} must be finite and not negative, found {1}")]
    Negative(&'static str, f64),

    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),

    #[error("Acceleration bound must satisfy lower <= 0 <= upper, found lower = {0}, upper = {1}")]
    InvalidAccelBound(f64, f64),

    #[error("Nominal speed {0} m/s exceeds the velocity limit of {1} m/s")]
    NominalSpeedExceedsLimit(f64, f64),

    #[error(
        "The cost field ({1} m across) must be wider than the distance reachable in one horizon \
        in both directions ({0} m)"
    )]
    FieldSmallerThanReach(f64, f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    /// Check every parameter is within its valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("timestep_s", self.timestep_s)?;
        count("horizon", self.horizon)?;
        count("num_samples", self.num_samples)?;
        positive("velocity_limit_ms", self.velocity_limit_ms)?;
        positive("axle_length_m", self.axle_length_m)?;

        let c = &self.cost_coefficients;
        non_negative("cost_coefficients.path", c.path)?;
        non_negative("cost_coefficients.velocity", c.velocity)?;
        non_negative("cost_coefficients.acceleration", c.acceleration)?;
        non_negative(
            "cost_coefficients.angular_acceleration",
            c.angular_acceleration,
        )?;

        let b = &self.acceleration_bound;
        if !(b.lower.is_finite() && b.upper.is_finite() && b.lower <= 0.0 && b.upper >= 0.0) {
            return Err(ConfigError::InvalidAccelBound(b.lower, b.upper));
        }

        positive("cost_field.width_m", self.cost_field.width_m)?;
        positive("cost_field.height_m", self.cost_field.height_m)?;
        positive("cost_field.resolution_m", self.cost_field.resolution_m)?;

        let reach_m = self.horizon_reach_m();
        let min_extent_m = self.cost_field.width_m.min(self.cost_field.height_m);
        if 2.0 * reach_m >= min_extent_m {
            return Err(ConfigError::FieldSmallerThanReach(2.0 * reach_m, min_extent_m));
        }

        let s = &self.sampling;
        non_negative("sampling.linear_std_ms", s.linear_std_ms)?;
        non_negative("sampling.angular_std_rads", s.angular_std_rads)?;
        non_negative("sampling.step_jitter_ratio", s.step_jitter_ratio)?;
        positive("sampling.max_sigma", s.max_sigma)?;
        if !s.nominal_speed_ms.is_finite() || s.nominal_speed_ms.abs() > self.velocity_limit_ms {
            return Err(ConfigError::NominalSpeedExceedsLimit(
                s.nominal_speed_ms,
                self.velocity_limit_ms,
            ));
        }

        Ok(())
    }

    /// Furthest distance the vehicle can travel along either axis within one horizon.
    ///
    /// Units: meters
    pub fn horizon_reach_m(&self) -> f64 {
        self.velocity_limit_ms * self.horizon as f64 * self.timestep_s
    }

    /// Parameters of the differential drive model described by these parameters.
    pub fn diff_drive_params(&self) -> DiffDriveParams {
        DiffDriveParams {
            acceleration_bound: self.acceleration_bound,
            axle_length_m: self.axle_length_m,
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive(name, value))
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative(name, value))
    }
}

fn count(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::ZeroCount(name))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Parameters used throughout the trajectory control tests.
    pub(crate) fn test_params() -> Params {
        Params {
            timestep_s: 0.1,
            horizon: 20,
            num_samples: 64,
            velocity_limit_ms: 1.0,
            cost_coefficients: CostCoefficients {
                path: 1.0,
                velocity: 10.0,
                acceleration: 0.01,
                angular_acceleration: 0.01,
            },
            acceleration_bound: AccelBound {
                lower: -3.0,
                upper: 2.0,
            },
            axle_length_m: 0.5,
            cost_field: CostFieldParams {
                width_m: 30.0,
                height_m: 30.0,
                resolution_m: 0.1,
            },
            sampling: SamplingParams {
                linear_std_ms: 0.3,
                angular_std_rads: 0.8,
                step_jitter_ratio: 0.2,
                max_sigma: 3.0,
                nominal_speed_ms: 0.5,
                seed: Some(1234),
            },
            debug: false,
        }
    }

    #[test]
    fn test_valid() {
        assert_eq!(test_params().validate(), Ok(()));
    }

    #[test]
    fn test_invalid_values() {
        let mut p = test_params();
        p.timestep_s = 0.0;
        assert_eq!(p.validate(), Err(ConfigError::NotPositive("timestep_s", 0.0)));

        let mut p = test_params();
        p.horizon = 0;
        assert_eq!(p.validate(), Err(ConfigError::ZeroCount("horizon")));

        let mut p = test_params();
        p.num_samples = 0;
        assert_eq!(p.validate(), Err(ConfigError::ZeroCount("num_samples")));

        let mut p = test_params();
        p.cost_field.resolution_m = -0.1;
        assert_eq!(
            p.validate(),
            Err(ConfigError::NotPositive("cost_field.resolution_m", -0.1))
        );

        let mut p = test_params();
        p.cost_coefficients.velocity = -1.0;
        assert_eq!(
            p.validate(),
            Err(ConfigError::Negative("cost_coefficients.velocity", -1.0))
        );

        let mut p = test_params();
        p.acceleration_bound = AccelBound {
            lower: 0.5,
            upper: 1.0,
        };
        assert_eq!(p.validate(), Err(ConfigError::InvalidAccelBound(0.5, 1.0)));

        let mut p = test_params();
        p.sampling.nominal_speed_ms = 1.5;
        assert_eq!(
            p.validate(),
            Err(ConfigError::NominalSpeedExceedsLimit(1.5, 1.0))
        );

        // 1 m/s for 20 steps of 0.1 s reaches 2 m either way
        let mut p = test_params();
        p.cost_field.height_m = 4.0;
        assert_eq!(
            p.validate(),
            Err(ConfigError::FieldSmallerThanReach(4.0, 4.0))
        );

        let mut p = test_params();
        p.timestep_s = std::f64::NAN;
        assert!(matches!(
            p.validate(),
            Err(ConfigError::NotPositive("timestep_s", _))
        ));
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            timestep_s = 0.1
            horizon = 20
            num_samples = 100
            velocity_limit_ms = 1.0
            axle_length_m = 0.52

            [cost_coefficients]
            path = 1.0
            velocity = 10.0
            acceleration = 0.05
            angular_acceleration = 0.05

            [acceleration_bound]
            lower = -2.0
            upper = 1.0

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
        "#;

        let params: Params = util::params::parse(toml_str).unwrap();

        assert_eq!(params.horizon, 20);
        assert_eq!(params.acceleration_bound.lower, -2.0);
        assert_eq!(params.sampling.seed, None);
        assert_eq!(params.debug, false);
        assert_eq!(params.validate(), Ok(()));
    }
}
