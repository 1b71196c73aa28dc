//! Power analysis for two-proportion experiments

use serde::{Deserialize, Serialize};

use super::statistical::normal_quantile;
use crate::domain::experiment::{validate_significance_level, ExperimentValidationError};

/// Default minimum number of visitors per arm
pub const DEFAULT_PER_ARM_FLOOR: u64 = 1000;

/// Largest treatment rate the planner will assume
const MAX_TREATMENT_RATE: f64 = 0.9999;

/// Inputs of a sample size calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSizeParams {
    /// Two-sided significance level (alpha)
    pub significance_level: f64,
    /// Desired power (1 - beta)
    pub power: f64,
    /// Relative lift over the baseline to detect, e.g. 0.2 for +20%
    pub minimum_detectable_effect: f64,
    /// Baseline conversion rate of the control
    pub baseline_rate: f64,
}

impl Default for SampleSizeParams {
    fn default() -> Self {
        Self {
            significance_level: 0.05,
            power: 0.8,
            minimum_detectable_effect: 0.2,
            baseline_rate: 0.1,
        }
    }
}

impl SampleSizeParams {
    pub fn validate(&self) -> Result<(), ExperimentValidationError> {
        validate_significance_level(self.significance_level)?;

        if !(self.power > 0.0 && self.power < 1.0) {
            return Err(ExperimentValidationError::InvalidPower(self.power));
        }

        if !(self.baseline_rate > 0.0 && self.baseline_rate < 1.0) {
            return Err(ExperimentValidationError::InvalidBaselineRate(
                self.baseline_rate,
            ));
        }

        if !(self.minimum_detectable_effect.is_finite() && self.minimum_detectable_effect > 0.0) {
            return Err(ExperimentValidationError::InvalidMinimumDetectableEffect(
                self.minimum_detectable_effect,
            ));
        }

        Ok(())
    }
}

/// Result of planning an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSizePlan {
    /// Visitors required per arm before flooring
    pub required_per_arm: u64,
    /// Visitors per arm after applying the floor
    pub per_arm: u64,
    pub arms: usize,
    /// per_arm × arms
    pub total: u64,
}

/// Minimum-sample calculator for a two-proportion z-test
#[derive(Debug, Clone, Copy)]
pub struct SampleSizePlanner {
    per_arm_floor: u64,
}

impl Default for SampleSizePlanner {
    fn default() -> Self {
        Self::new(DEFAULT_PER_ARM_FLOOR)
    }
}

impl SampleSizePlanner {
    pub fn new(per_arm_floor: u64) -> Self {
        Self { per_arm_floor }
    }

    pub fn per_arm_floor(&self) -> u64 {
        self.per_arm_floor
    }

    /// Visitors required per arm, floored at the configured minimum
    pub fn per_arm(&self, params: &SampleSizeParams) -> Result<u64, ExperimentValidationError> {
        Ok(required_per_arm(params)?.max(self.per_arm_floor))
    }

    /// Plan the total sample for an experiment with `arms` arms
    pub fn plan(
        &self,
        params: &SampleSizeParams,
        arms: usize,
    ) -> Result<SampleSizePlan, ExperimentValidationError> {
        let required = required_per_arm(params)?;
        let per_arm = required.max(self.per_arm_floor);

        Ok(SampleSizePlan {
            required_per_arm: required,
            per_arm,
            arms,
            total: per_arm.saturating_mul(arms as u64),
        })
    }
}

/// Per-arm sample size with the default floor
pub fn compute_sample_size(
    significance_level: f64,
    power: f64,
    minimum_detectable_effect: f64,
    baseline_rate: f64,
) -> Result<u64, ExperimentValidationError> {
    SampleSizePlanner::default().per_arm(&SampleSizeParams {
        significance_level,
        power,
        minimum_detectable_effect,
        baseline_rate,
    })
}

/// n = ⌈(z₁₋α/₂ + z₁₋β)² · (p₁(1−p₁) + p₂(1−p₂)) / (p₁ − p₂)²⌉
fn required_per_arm(params: &SampleSizeParams) -> Result<u64, ExperimentValidationError> {
    params.validate()?;

    let p1 = params.baseline_rate;
    let p2 = (p1 * (1.0 + params.minimum_detectable_effect)).min(MAX_TREATMENT_RATE);
    let difference = p2 - p1;
    if difference <= 0.0 {
        return Err(ExperimentValidationError::InvalidMinimumDetectableEffect(
            params.minimum_detectable_effect,
        ));
    }

    let z_alpha = normal_quantile(1.0 - params.significance_level / 2.0);
    let z_beta = normal_quantile(params.power);
    let variance = p1 * (1.0 - p1) + p2 * (1.0 - p2);

    let n = (z_alpha + z_beta).powi(2) * variance / difference.powi(2);

    Ok(n.ceil() as u64)
}
