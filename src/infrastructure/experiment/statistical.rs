//! Statistical functions for A/B testing
//!
//! Chi-square and Welch's t-test on aggregated counts. Distribution tails and
//! quantiles come from `statrs`.

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};

// ============================================================================
// Distributions
// ============================================================================

/// Standard normal cumulative distribution function
pub fn normal_cdf(x: f64) -> f64 {
    Normal::standard().cdf(x)
}

/// Inverse of the standard normal CDF
///
/// Returns ±infinity at the bounds and NaN outside them.
pub fn normal_quantile(p: f64) -> f64 {
    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }

    Normal::standard().inverse_cdf(p)
}

/// Survival function of the chi-square distribution with one degree of freedom
pub fn chi_square_sf_1df(statistic: f64) -> f64 {
    if statistic.is_nan() || statistic <= 0.0 {
        return 1.0;
    }

    ChiSquared::new(1.0).map_or(1.0, |dist| dist.sf(statistic).clamp(0.0, 1.0))
}

/// Two-tailed p-value of a t statistic with `df` degrees of freedom
///
/// Degenerate degrees of freedom give 1.0.
pub fn student_t_two_tailed(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return if t.is_nan() { 1.0 } else { 0.0 };
    }

    StudentsT::new(0.0, 1.0, df).map_or(1.0, |dist| (2.0 * dist.sf(t.abs())).clamp(0.0, 1.0))
}

/// Two-sided critical value of the t distribution at the given confidence level
///
/// Falls back to the normal quantile when `df` is not a valid parameter.
pub fn student_t_critical(level: f64, df: f64) -> f64 {
    let upper = 1.0 - (1.0 - level) / 2.0;

    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) if (0.0..1.0).contains(&upper) => dist.inverse_cdf(upper),
        _ => normal_quantile(upper),
    }
}

// ============================================================================
// Tests on aggregates
// ============================================================================

/// Result of a chi-square test of independence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquareOutcome {
    pub statistic: f64,
    pub p_value: f64,
    /// Cramér's V (√(χ²/n) for a 2x2 table)
    pub cramers_v: f64,
}

/// Chi-square test on a 2x2 conversion table with Yates' continuity correction
///
/// Returns `None` when a row or column total is zero (some expected count
/// would be zero).
pub fn chi_square_2x2(
    control_visitors: u64,
    control_conversions: u64,
    treatment_visitors: u64,
    treatment_conversions: u64,
) -> Option<ChiSquareOutcome> {
    let observed = [
        [
            control_conversions as f64,
            control_visitors.saturating_sub(control_conversions) as f64,
        ],
        [
            treatment_conversions as f64,
            treatment_visitors.saturating_sub(treatment_conversions) as f64,
        ],
    ];

    let rows = [observed[0][0] + observed[0][1], observed[1][0] + observed[1][1]];
    let cols = [observed[0][0] + observed[1][0], observed[0][1] + observed[1][1]];
    let n = rows[0] + rows[1];

    if rows.iter().chain(cols.iter()).any(|&total| total == 0.0) {
        return None;
    }

    let mut statistic = 0.0;
    for (i, row) in observed.iter().enumerate() {
        for (j, &obs) in row.iter().enumerate() {
            let expected = rows[i] * cols[j] / n;
            let deviation = (obs - expected).abs();
            let corrected = deviation - deviation.min(0.5);
            statistic += corrected * corrected / expected;
        }
    }

    Some(ChiSquareOutcome {
        statistic,
        p_value: chi_square_sf_1df(statistic),
        cramers_v: (statistic / n).sqrt(),
    })
}

/// Summary statistics of one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSummary {
    pub count: u64,
    pub mean: f64,
    /// Sample variance (n-1 denominator)
    pub variance: f64,
}

impl SampleSummary {
    pub fn new(count: u64, mean: f64, variance: f64) -> Self {
        Self {
            count,
            mean,
            variance,
        }
    }
}

/// Result of Welch's t-test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchOutcome {
    /// t statistic of treatment minus control
    pub t: f64,
    /// Welch-Satterthwaite degrees of freedom
    pub df: f64,
    pub p_value: f64,
    /// Standard error of the mean difference
    pub std_error: f64,
}

/// Welch's t-test for two independent samples given their summaries
///
/// Returns `None` if either sample has fewer than 2 observations or both
/// variances are zero.
pub fn welch_t_test(control: SampleSummary, treatment: SampleSummary) -> Option<WelchOutcome> {
    if control.count < 2 || treatment.count < 2 {
        return None;
    }

    let n1 = control.count as f64;
    let n2 = treatment.count as f64;
    let v1 = control.variance / n1;
    let v2 = treatment.variance / n2;

    let std_error = (v1 + v2).sqrt();
    if std_error == 0.0 || !std_error.is_finite() {
        return None;
    }

    let t = (treatment.mean - control.mean) / std_error;

    let df_denominator = v1.powi(2) / (n1 - 1.0) + v2.powi(2) / (n2 - 1.0);
    if df_denominator == 0.0 {
        return None;
    }
    let df = (v1 + v2).powi(2) / df_denominator;

    Some(WelchOutcome {
        t,
        df,
        p_value: student_t_two_tailed(t, df),
        std_error,
    })
}

/// Cohen's d with pooled standard deviation (0 when the pooled SD is 0)
pub fn cohens_d(control: SampleSummary, treatment: SampleSummary) -> f64 {
    let n1 = control.count as f64;
    let n2 = treatment.count as f64;
    if n1 + n2 <= 2.0 {
        return 0.0;
    }

    let pooled = (((n1 - 1.0) * control.variance + (n2 - 1.0) * treatment.variance)
        / (n1 + n2 - 2.0))
        .sqrt();

    if pooled == 0.0 || !pooled.is_finite() {
        0.0
    } else {
        (treatment.mean - control.mean) / pooled
    }
}

/// Wald interval for the difference of two proportions (treatment - control)
pub fn wald_interval(
    control_rate: f64,
    control_visitors: u64,
    treatment_rate: f64,
    treatment_visitors: u64,
    level: f64,
) -> (f64, f64) {
    let diff = treatment_rate - control_rate;
    if control_visitors == 0 || treatment_visitors == 0 {
        return (diff, diff);
    }

    let z = normal_quantile(1.0 - (1.0 - level) / 2.0);
    let se = (control_rate * (1.0 - control_rate) / control_visitors as f64
        + treatment_rate * (1.0 - treatment_rate) / treatment_visitors as f64)
        .sqrt();

    (diff - z * se, diff + z * se)
}
