//! Experiment result types for snapshots, progress and statistical analysis

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{Experiment, ExperimentId, ExperimentStatus, MetricKind};
use super::variant::{RunningStats, Variant, VariantId};

// ============================================================================
// StatisticalTest
// ============================================================================

/// Hypothesis test used for a significance evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticalTest {
    /// Chi-square test of independence on a 2x2 table, Yates-corrected
    ChiSquare,
    /// Welch's unequal-variance two-sample t-test
    WelchT,
}

impl StatisticalTest {
    /// Test appropriate for a primary metric
    pub fn for_metric(metric: MetricKind) -> Self {
        match metric {
            MetricKind::Proportion => Self::ChiSquare,
            MetricKind::Continuous { .. } => Self::WelchT,
        }
    }
}

// ============================================================================
// ConfidenceInterval
// ============================================================================

/// Confidence interval for the treatment minus control difference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    /// Coverage level, e.g. 0.95
    pub level: f64,
}

impl ConfidenceInterval {
    pub fn new(lower: f64, upper: f64, level: f64) -> Self {
        Self {
            lower,
            upper,
            level,
        }
    }

    /// Check if the interval contains a value
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

// ============================================================================
// SignificanceResult
// ============================================================================

/// Outcome of one significance evaluation of the primary metric
///
/// "Not yet significant" and "not enough data" are both represented here with
/// `significant = false`; neither is an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub test: StatisticalTest,
    pub metric: MetricKind,
    /// Chi-square or t statistic
    pub statistic: f64,
    pub p_value: f64,
    /// Cramér's V for proportions, |Cohen's d| for continuous metrics
    pub effect_size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<ConfidenceInterval>,
    pub significance_level: f64,
    pub significant: bool,
    pub control_value: f64,
    pub treatment_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment_variant_id: Option<VariantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<VariantId>,
    /// Why the evaluation could not be performed, if it could not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl SignificanceResult {
    /// Non-significant result for an evaluation that lacked usable data
    pub fn insufficient(
        metric: MetricKind,
        significance_level: f64,
        note: impl Into<String>,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            test: StatisticalTest::for_metric(metric),
            metric,
            statistic: 0.0,
            p_value: 1.0,
            effect_size: 0.0,
            confidence_interval: None,
            significance_level,
            significant: false,
            control_value: 0.0,
            treatment_value: 0.0,
            treatment_variant_id: None,
            winner: None,
            note: Some(note.into()),
            evaluated_at,
        }
    }

    /// Attach the observed arm values
    pub fn with_values(mut self, control_value: f64, treatment_value: f64) -> Self {
        self.control_value = control_value;
        self.treatment_value = treatment_value;
        self
    }

    /// Relative change of the treatment over control (0 when control is 0)
    pub fn relative_lift(&self) -> f64 {
        relative_lift(self.control_value, self.treatment_value)
    }

    /// Confidence score derived from the p-value
    pub fn confidence(&self) -> f64 {
        (1.0 - self.p_value).clamp(0.0, 1.0)
    }
}

/// `(treatment - control) / control`, or 0 when control is 0
pub fn relative_lift(control: f64, treatment: f64) -> f64 {
    if control == 0.0 {
        0.0
    } else {
        (treatment - control) / control
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Aggregates of one arm copied out of the experiment lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSnapshot {
    pub variant_id: VariantId,
    pub name: String,
    pub visitors: u64,
    pub conversions: u64,
    /// Current value of the primary metric
    pub value: f64,
    /// Per-visitor statistics of the primary metric when it is continuous
    pub stats: RunningStats,
    pub engagement_score: f64,
}

impl ArmSnapshot {
    pub fn from_variant(variant: &Variant, metric: MetricKind) -> Self {
        let stats = match metric {
            MetricKind::Proportion => RunningStats::new(),
            MetricKind::Continuous { metric } => variant.continuous_stats(metric),
        };

        Self {
            variant_id: variant.id().clone(),
            name: variant.name().to_string(),
            visitors: variant.visitors(),
            conversions: variant.conversions(),
            value: variant.metric_value(metric),
            stats,
            engagement_score: variant.engagement_score(),
        }
    }
}

/// Everything the analyzer and the early-stopping controller read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub experiment_id: ExperimentId,
    pub status: ExperimentStatus,
    pub metric: MetricKind,
    pub significance_level: f64,
    pub minimum_sample_size: u64,
    pub minimum_duration_days: u32,
    pub maximum_duration_days: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub control: ArmSnapshot,
    pub treatments: Vec<ArmSnapshot>,
}

impl AnalysisSnapshot {
    /// Visitors across all arms
    pub fn total_visitors(&self) -> u64 {
        self.control.visitors + self.treatments.iter().map(|t| t.visitors).sum::<u64>()
    }

    /// Whole days elapsed since start (0 if never started)
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> i64 {
        self.started_at
            .map(|started| (now - started).num_days().max(0))
            .unwrap_or(0)
    }
}

// ============================================================================
// Progress / status report
// ============================================================================

/// Progress towards the planned sample size and minimum duration, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub visitors: f64,
    pub time: f64,
    /// The larger of the two
    pub overall: f64,
}

impl Progress {
    pub fn new(visitors: f64, time: f64) -> Self {
        Self {
            visitors,
            time,
            overall: visitors.max(time),
        }
    }
}

/// Immutable view of an experiment returned by status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentStatusReport {
    pub experiment: Experiment,
    pub progress: Progress,
    pub elapsed_days: i64,
    pub generated_at: DateTime<Utc>,
}

impl ExperimentStatusReport {
    pub fn new(experiment: Experiment, now: DateTime<Utc>) -> Self {
        let progress = experiment.progress(now);
        let elapsed_days = experiment.elapsed_days(now);

        Self {
            experiment,
            progress,
            elapsed_days,
            generated_at: now,
        }
    }
}
