//! Learning records distilled from completed experiments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{ExperimentId, MetricKind};

// ============================================================================
// LearningRecordId
// ============================================================================

/// Unique identifier for a learning record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearningRecordId(String);

impl LearningRecordId {
    /// Generate a new unique ID
    pub fn generate() -> Self {
        Self(format!("lrn-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LearningRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// PatternType
// ============================================================================

/// Which side of the experiment the learned pattern came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    TreatmentWon,
    ControlWon,
}

// ============================================================================
// LearningRecord
// ============================================================================

/// A reusable finding from a significant experiment. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub id: LearningRecordId,
    pub experiment_id: ExperimentId,
    pub pattern_type: PatternType,
    /// Primary metric the pattern was learned on
    pub metric: MetricKind,
    /// Payload differences of the winner relative to the loser
    pub insights: Vec<String>,
    /// Relative lift of the winner over control on the primary metric
    pub improvement: f64,
    /// 1 - p
    pub confidence: f64,
    pub context_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl LearningRecord {
    pub fn new(
        experiment_id: ExperimentId,
        pattern_type: PatternType,
        metric: MetricKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LearningRecordId::generate(),
            experiment_id,
            pattern_type,
            metric,
            insights: Vec::new(),
            improvement: 0.0,
            confidence: 0.0,
            context_tags: Vec::new(),
            created_at,
        }
    }

    pub fn with_insights(mut self, insights: Vec<String>) -> Self {
        self.insights = insights;
        self
    }

    pub fn with_improvement(mut self, improvement: f64) -> Self {
        self.improvement = improvement;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_context_tags(mut self, tags: Vec<String>) -> Self {
        self.context_tags = tags;
        self
    }
}

// ============================================================================
// LearningSummary
// ============================================================================

/// How often an insight string appears across learning records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightFrequency {
    pub insight: String,
    pub occurrences: usize,
}

/// State of the optional predictive model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub configured: bool,
    /// Training samples submitted for retraining so far
    pub training_samples_submitted: u64,
}

/// Aggregate view over completed experiments and the learning store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSummary {
    pub total_experiments_completed: usize,
    pub successful_experiments: usize,
    /// successful / completed, 0 when nothing completed
    pub success_rate: f64,
    /// Mean improvement over records with a positive improvement
    pub average_improvement: f64,
    pub total_learning_records: usize,
    pub top_insights: Vec<InsightFrequency>,
    pub model_performance: ModelPerformance,
}
