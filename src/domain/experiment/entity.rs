//! Experiment domain entities and the experiment state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::result::{AnalysisSnapshot, ArmSnapshot, Progress, SignificanceResult};
use super::validation::{validate_experiment_id, ExperimentValidationError};
use super::variant::{InteractionEvent, Variant, VariantId};
use crate::domain::DomainError;

// ============================================================================
// ExperimentId
// ============================================================================

/// Unique identifier for an experiment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Create a new experiment ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ExperimentValidationError> {
        let id = id.into();
        validate_experiment_id(&id)?;
        Ok(Self(id))
    }

    /// Generate a new unique experiment ID
    pub fn generate() -> Self {
        Self(format!("exp-{}", uuid::Uuid::new_v4()))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExperimentId {
    type Error = ExperimentValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExperimentId> for String {
    fn from(id: ExperimentId) -> Self {
        id.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExperimentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ExperimentStatus
// ============================================================================

/// Status of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Experiment is configured but not yet collecting data
    #[default]
    Planning,
    /// Experiment is collecting interactions
    Running,
    /// Experiment is temporarily not collecting interactions
    Paused,
    /// Experiment finished and was analyzed
    Completed,
    /// Experiment was aborted without analysis
    Cancelled,
}

impl ExperimentStatus {
    /// Check if the experiment accepts interactions
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if the experiment reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Check if a transition to the target status is valid
    pub fn can_transition_to(&self, target: ExperimentStatus) -> bool {
        matches!(
            (self, target),
            (Self::Planning, Self::Running)
                | (Self::Running, Self::Paused)
                | (Self::Paused, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Cancelled)
                | (Self::Paused, Self::Completed)
                | (Self::Paused, Self::Cancelled)
        )
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ============================================================================
// MetricKind
// ============================================================================

/// Continuous per-visitor metrics that can serve as a primary metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuousMetric {
    TimeOnPage,
    ScrollDepth,
    RevenuePerVisitor,
}

impl ContinuousMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeOnPage => "time_on_page",
            Self::ScrollDepth => "scroll_depth",
            Self::RevenuePerVisitor => "revenue_per_visitor",
        }
    }

    /// Human-readable label used in insight text
    pub fn label(&self) -> &'static str {
        match self {
            Self::TimeOnPage => "time on page",
            Self::ScrollDepth => "scroll depth",
            Self::RevenuePerVisitor => "revenue per visitor",
        }
    }
}

/// Primary metric of an experiment, tagged by the statistical test it needs
///
/// `Proportion` is the visitor conversion rate and is tested with a
/// chi-square test; `Continuous` metrics are tested with Welch's t-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    #[default]
    Proportion,
    Continuous { metric: ContinuousMetric },
}

impl MetricKind {
    /// Convenience constructor for a continuous metric
    pub fn continuous(metric: ContinuousMetric) -> Self {
        Self::Continuous { metric }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proportion => "conversion_rate",
            Self::Continuous { metric } => metric.as_str(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Proportion => "conversion rate",
            Self::Continuous { metric } => metric.label(),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// StopReason
// ============================================================================

/// Why an experiment left the running/paused states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Stopped by an operator; the final counters are analyzed
    Manual,
    /// Early stop after the primary metric reached significance
    SignificanceReached,
    /// Forced stop once the maximum duration elapsed
    MaxDurationReached,
    /// Aborted without analysis
    Cancelled,
}

impl StopReason {
    /// Terminal status this reason leads to
    pub fn terminal_status(&self) -> ExperimentStatus {
        match self {
            Self::Cancelled => ExperimentStatus::Cancelled,
            Self::Manual | Self::SignificanceReached | Self::MaxDurationReached => {
                ExperimentStatus::Completed
            }
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual stop"),
            Self::SignificanceReached => write!(f, "significance reached"),
            Self::MaxDurationReached => write!(f, "max duration reached"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ============================================================================
// Experiment
// ============================================================================

/// An A/B test over one control and an ordered set of treatments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    id: ExperimentId,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    status: ExperimentStatus,
    primary_metric: MetricKind,
    secondary_metrics: Vec<String>,
    significance_level: f64,
    minimum_sample_size: u64,
    minimum_duration_days: u32,
    maximum_duration_days: u32,
    control: Variant,
    treatments: Vec<Variant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    winner_variant_id: Option<VariantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    significance: Option<SignificanceResult>,
    insights: Vec<String>,
    recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_reason: Option<StopReason>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ended_at: Option<DateTime<Utc>>,
}

impl Experiment {
    /// Create a new experiment in Planning status
    pub fn new(
        id: ExperimentId,
        name: impl Into<String>,
        control: Variant,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            status: ExperimentStatus::Planning,
            primary_metric: MetricKind::default(),
            secondary_metrics: Vec::new(),
            significance_level: 0.05,
            minimum_sample_size: 0,
            minimum_duration_days: 1,
            maximum_duration_days: 30,
            control,
            treatments: Vec::new(),
            winner_variant_id: None,
            significance: None,
            insights: Vec::new(),
            recommendations: Vec::new(),
            stop_reason: None,
            created_at,
            started_at: None,
            ended_at: None,
        }
    }

    // Builder methods

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_treatment(mut self, variant: Variant) -> Self {
        self.treatments.push(variant);
        self
    }

    pub fn with_primary_metric(mut self, metric: MetricKind) -> Self {
        self.primary_metric = metric;
        self
    }

    pub fn with_secondary_metrics(mut self, metrics: Vec<String>) -> Self {
        self.secondary_metrics = metrics;
        self
    }

    pub fn with_significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = alpha;
        self
    }

    pub fn with_minimum_sample_size(mut self, size: u64) -> Self {
        self.minimum_sample_size = size;
        self
    }

    pub fn with_duration_days(mut self, minimum: u32, maximum: u32) -> Self {
        self.minimum_duration_days = minimum;
        self.maximum_duration_days = maximum;
        self
    }

    // Getters

    pub fn id(&self) -> &ExperimentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    pub fn primary_metric(&self) -> MetricKind {
        self.primary_metric
    }

    pub fn secondary_metrics(&self) -> &[String] {
        &self.secondary_metrics
    }

    pub fn significance_level(&self) -> f64 {
        self.significance_level
    }

    pub fn minimum_sample_size(&self) -> u64 {
        self.minimum_sample_size
    }

    pub fn minimum_duration_days(&self) -> u32 {
        self.minimum_duration_days
    }

    pub fn maximum_duration_days(&self) -> u32 {
        self.maximum_duration_days
    }

    pub fn control(&self) -> &Variant {
        &self.control
    }

    pub fn treatments(&self) -> &[Variant] {
        &self.treatments
    }

    /// Control first, then treatments in order
    pub fn variants(&self) -> impl Iterator<Item = &Variant> {
        std::iter::once(&self.control).chain(self.treatments.iter())
    }

    pub fn variant(&self, id: &VariantId) -> Option<&Variant> {
        self.variants().find(|v| v.id() == id)
    }

    pub fn winner_variant_id(&self) -> Option<&VariantId> {
        self.winner_variant_id.as_ref()
    }

    /// Winning variant, if one was declared
    pub fn winner(&self) -> Option<&Variant> {
        self.winner_variant_id
            .as_ref()
            .and_then(|id| self.variant(id))
    }

    /// Latest significance evaluation, if any was performed
    pub fn significance(&self) -> Option<&SignificanceResult> {
        self.significance.as_ref()
    }

    pub fn statistical_significance(&self) -> bool {
        self.significance.as_ref().is_some_and(|s| s.significant)
    }

    pub fn p_value(&self) -> Option<f64> {
        self.significance.as_ref().map(|s| s.p_value)
    }

    pub fn effect_size(&self) -> Option<f64> {
        self.significance.as_ref().map(|s| s.effect_size)
    }

    pub fn insights(&self) -> &[String] {
        &self.insights
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Visitors across all arms
    pub fn total_visitors(&self) -> u64 {
        self.variants().map(Variant::visitors).sum()
    }

    /// Whole days elapsed since the experiment started (0 if never started)
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> i64 {
        self.started_at
            .map(|started| (now - started).num_days().max(0))
            .unwrap_or(0)
    }

    /// Progress towards the planned sample size and minimum duration
    pub fn progress(&self, now: DateTime<Utc>) -> Progress {
        let visitors = if self.minimum_sample_size == 0 {
            1.0
        } else {
            (self.total_visitors() as f64 / self.minimum_sample_size as f64).min(1.0)
        };

        let time = if self.started_at.is_none() {
            0.0
        } else {
            (self.elapsed_days(now) as f64 / self.minimum_duration_days.max(1) as f64).min(1.0)
        };

        Progress::new(visitors, time)
    }

    /// Copy of the aggregates the analyzer and early-stopping controller need
    pub fn analysis_snapshot(&self) -> AnalysisSnapshot {
        let metric = self.primary_metric;

        AnalysisSnapshot {
            experiment_id: self.id.clone(),
            status: self.status,
            metric,
            significance_level: self.significance_level,
            minimum_sample_size: self.minimum_sample_size,
            minimum_duration_days: self.minimum_duration_days,
            maximum_duration_days: self.maximum_duration_days,
            started_at: self.started_at,
            control: ArmSnapshot::from_variant(&self.control, metric),
            treatments: self
                .treatments
                .iter()
                .map(|v| ArmSnapshot::from_variant(v, metric))
                .collect(),
        }
    }

    // Status transitions

    /// Start collecting interactions (Planning -> Running)
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), ExperimentValidationError> {
        self.require_status(ExperimentStatus::Planning, ExperimentStatus::Running)?;
        self.transition(ExperimentStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Pause the experiment (Running -> Paused)
    pub fn pause(&mut self) -> Result<(), ExperimentValidationError> {
        self.transition(ExperimentStatus::Paused)
    }

    /// Resume the experiment (Paused -> Running)
    pub fn resume(&mut self) -> Result<(), ExperimentValidationError> {
        self.require_status(ExperimentStatus::Paused, ExperimentStatus::Running)?;
        self.transition(ExperimentStatus::Running)
    }

    /// Move to the terminal status implied by `reason`
    pub fn finish(
        &mut self,
        reason: StopReason,
        now: DateTime<Utc>,
    ) -> Result<(), ExperimentValidationError> {
        self.transition(reason.terminal_status())?;
        self.stop_reason = Some(reason);
        self.ended_at = Some(now);
        Ok(())
    }

    /// Planning and Paused both lead to Running, so the entry point must match
    fn require_status(
        &self,
        expected: ExperimentStatus,
        target: ExperimentStatus,
    ) -> Result<(), ExperimentValidationError> {
        if self.status != expected {
            return Err(ExperimentValidationError::InvalidStatusTransition(
                self.status.to_string(),
                target.to_string(),
            ));
        }
        Ok(())
    }

    fn transition(&mut self, target: ExperimentStatus) -> Result<(), ExperimentValidationError> {
        if !self.status.can_transition_to(target) {
            return Err(ExperimentValidationError::InvalidStatusTransition(
                self.status.to_string(),
                target.to_string(),
            ));
        }
        self.status = target;
        Ok(())
    }

    // Data

    /// Apply a visitor interaction to one arm
    ///
    /// Only legal while Running; counters are frozen in every other state.
    pub fn record_interaction(
        &mut self,
        variant_id: &VariantId,
        event: &InteractionEvent,
        now: DateTime<Utc>,
    ) -> Result<&Variant, DomainError> {
        if !self.status.is_running() {
            return Err(DomainError::invalid_state(format!(
                "Experiment '{}' is {} and does not accept interactions",
                self.id, self.status
            )));
        }

        let experiment_id = &self.id;
        let variant = std::iter::once(&mut self.control)
            .chain(self.treatments.iter_mut())
            .find(|v| v.id() == variant_id)
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "Variant '{}' not found in experiment '{}'",
                    variant_id, experiment_id
                ))
            })?;

        variant
            .apply_interaction(event, now)
            .map_err(|e| DomainError::validation(e.to_string()))?;

        Ok(variant)
    }

    /// Whether a newer evaluation than `result` is already stored
    pub fn supersedes(&self, result: &SignificanceResult) -> bool {
        self.significance
            .as_ref()
            .is_some_and(|current| current.evaluated_at > result.evaluated_at)
    }

    /// Store the outcome of a significance evaluation
    pub fn apply_significance(&mut self, result: SignificanceResult) {
        self.winner_variant_id = result.winner.clone();
        self.significance = Some(result);
    }

    /// Store the insights and recommendations produced at completion
    pub fn set_findings(&mut self, insights: Vec<String>, recommendations: Vec<String>) {
        self.insights = insights;
        self.recommendations = recommendations;
    }
}
