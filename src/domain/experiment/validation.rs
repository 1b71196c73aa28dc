//! Experiment validation utilities

use thiserror::Error;

/// Maximum length for experiment IDs
pub const MAX_EXPERIMENT_ID_LENGTH: usize = 50;

/// Maximum length for variant IDs
pub const MAX_VARIANT_ID_LENGTH: usize = 50;

/// Allowed deviation of the traffic allocation sum from 1.0
pub const TRAFFIC_SUM_TOLERANCE: f64 = 0.01;

/// Validation errors for experiments, variants and interaction events
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExperimentValidationError {
    #[error("Experiment ID cannot be empty")]
    EmptyId,

    #[error("Experiment ID exceeds maximum length of {0} characters")]
    IdTooLong(usize),

    #[error("Experiment ID must start with a letter or number")]
    InvalidIdStart,

    #[error("Experiment ID must end with a letter or number")]
    InvalidIdEnd,

    #[error("Experiment ID contains invalid character: '{0}'")]
    InvalidIdCharacter(char),

    #[error("Experiment ID cannot contain consecutive hyphens")]
    ConsecutiveHyphens,

    #[error("Variant ID cannot be empty")]
    EmptyVariantId,

    #[error("Variant ID exceeds maximum length of {0} characters")]
    VariantIdTooLong(usize),

    #[error("Variant ID must start with a letter or number")]
    InvalidVariantIdStart,

    #[error("Variant ID must end with a letter or number")]
    InvalidVariantIdEnd,

    #[error("Variant ID contains invalid character: '{0}'")]
    InvalidVariantIdCharacter(char),

    #[error("Variant ID cannot contain consecutive hyphens")]
    VariantIdConsecutiveHyphens,

    #[error("Experiment name cannot be empty")]
    EmptyName,

    #[error("Traffic allocations must sum to 1.0 (±{TRAFFIC_SUM_TOLERANCE}), got {0:.4}")]
    InvalidTrafficSum(f64),

    #[error("Traffic allocation for variant '{0}' must be within [0, 1], got {1}")]
    TrafficOutOfRange(String, f64),

    #[error("Experiment must have at least one treatment variant")]
    NoTreatments,

    #[error("Duplicate variant ID: '{0}'")]
    DuplicateVariantId(String),

    #[error("Significance level must be within (0, 1), got {0}")]
    InvalidSignificanceLevel(f64),

    #[error("Statistical power must be within (0, 1), got {0}")]
    InvalidPower(f64),

    #[error("Baseline rate must be within (0, 1), got {0}")]
    InvalidBaselineRate(f64),

    #[error("Minimum detectable effect must be positive, got {0}")]
    InvalidMinimumDetectableEffect(f64),

    #[error("Minimum sample size {0} is below the floor of {1}")]
    SampleSizeBelowFloor(u64, u64),

    #[error("Minimum duration must be at least 1 day, got {0}")]
    InvalidMinimumDuration(u32),

    #[error("Maximum duration ({0} days) cannot be shorter than minimum duration ({1} days)")]
    MaxDurationBeforeMin(u32, u32),

    #[error("Invalid experiment status transition from {0} to {1}")]
    InvalidStatusTransition(String, String),

    #[error("Invalid interaction field '{0}': {1}")]
    InvalidInteraction(String, String),
}

/// Validate an experiment ID
pub fn validate_experiment_id(id: &str) -> Result<(), ExperimentValidationError> {
    validate_slug(
        id,
        MAX_EXPERIMENT_ID_LENGTH,
        SlugErrors {
            empty: ExperimentValidationError::EmptyId,
            too_long: ExperimentValidationError::IdTooLong,
            bad_start: ExperimentValidationError::InvalidIdStart,
            bad_end: ExperimentValidationError::InvalidIdEnd,
            bad_char: ExperimentValidationError::InvalidIdCharacter,
            double_hyphen: ExperimentValidationError::ConsecutiveHyphens,
        },
    )
}

/// Validate a variant ID
pub fn validate_variant_id(id: &str) -> Result<(), ExperimentValidationError> {
    validate_slug(
        id,
        MAX_VARIANT_ID_LENGTH,
        SlugErrors {
            empty: ExperimentValidationError::EmptyVariantId,
            too_long: ExperimentValidationError::VariantIdTooLong,
            bad_start: ExperimentValidationError::InvalidVariantIdStart,
            bad_end: ExperimentValidationError::InvalidVariantIdEnd,
            bad_char: ExperimentValidationError::InvalidVariantIdCharacter,
            double_hyphen: ExperimentValidationError::VariantIdConsecutiveHyphens,
        },
    )
}

/// Validate that traffic allocations are individually in [0, 1] and sum to 1 ± tolerance
pub fn validate_traffic_allocation<'a>(
    allocations: impl IntoIterator<Item = (&'a str, f64)>,
) -> Result<(), ExperimentValidationError> {
    let mut total = 0.0;

    for (variant_id, allocation) in allocations {
        if !(0.0..=1.0).contains(&allocation) {
            return Err(ExperimentValidationError::TrafficOutOfRange(
                variant_id.to_string(),
                allocation,
            ));
        }
        total += allocation;
    }

    // 1e-9 absorbs float rounding at the boundary (0.5 + 0.51 != 1.01 exactly)
    if (total - 1.0).abs() > TRAFFIC_SUM_TOLERANCE + 1e-9 {
        return Err(ExperimentValidationError::InvalidTrafficSum(total));
    }

    Ok(())
}

/// Validate a significance level (alpha)
pub fn validate_significance_level(alpha: f64) -> Result<(), ExperimentValidationError> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(ExperimentValidationError::InvalidSignificanceLevel(alpha))
    }
}

/// Validate the duration bounds in days
pub fn validate_durations(min_days: u32, max_days: u32) -> Result<(), ExperimentValidationError> {
    if min_days < 1 {
        return Err(ExperimentValidationError::InvalidMinimumDuration(min_days));
    }

    if max_days < min_days {
        return Err(ExperimentValidationError::MaxDurationBeforeMin(
            max_days, min_days,
        ));
    }

    Ok(())
}

struct SlugErrors {
    empty: ExperimentValidationError,
    too_long: fn(usize) -> ExperimentValidationError,
    bad_start: ExperimentValidationError,
    bad_end: ExperimentValidationError,
    bad_char: fn(char) -> ExperimentValidationError,
    double_hyphen: ExperimentValidationError,
}

fn validate_slug(
    id: &str,
    max_length: usize,
    errors: SlugErrors,
) -> Result<(), ExperimentValidationError> {
    let (Some(first_char), Some(last_char)) = (id.chars().next(), id.chars().last()) else {
        return Err(errors.empty);
    };

    if id.len() > max_length {
        return Err((errors.too_long)(max_length));
    }

    if !first_char.is_ascii_alphanumeric() {
        return Err(errors.bad_start);
    }

    if !last_char.is_ascii_alphanumeric() {
        return Err(errors.bad_end);
    }

    let mut prev_was_hyphen = false;

    for ch in id.chars() {
        if ch == '-' {
            if prev_was_hyphen {
                return Err(errors.double_hyphen);
            }
            prev_was_hyphen = true;
        } else if ch.is_ascii_alphanumeric() {
            prev_was_hyphen = false;
        } else {
            return Err((errors.bad_char)(ch));
        }
    }

    Ok(())
}
