//! Experiment domain module for A/B testing
//!
//! Types and traits for content/design experiments, the interaction counters
//! of their variants, significance results and the learning records that
//! completed experiments leave behind.

mod entity;
mod learning;
mod prediction;
mod repository;
mod result;
mod validation;
mod variant;

pub use entity::{
    ContinuousMetric, Experiment, ExperimentId, ExperimentStatus, MetricKind, StopReason,
};
pub use learning::{
    InsightFrequency, LearningRecord, LearningRecordId, LearningSummary, ModelPerformance,
    PatternType,
};
pub use prediction::{FeatureVector, PredictiveModel, Prediction, TrainingSample};
pub use repository::{ExperimentQuery, PersistenceCollaborator};
pub use result::{
    relative_lift, AnalysisSnapshot, ArmSnapshot, ConfidenceInterval, ExperimentStatusReport,
    Progress, SignificanceResult, StatisticalTest,
};
pub use validation::{
    validate_durations, validate_experiment_id, validate_significance_level,
    validate_traffic_allocation, validate_variant_id, ExperimentValidationError,
    TRAFFIC_SUM_TOLERANCE,
};
pub use variant::{
    engagement_score, InteractionEvent, RunningStats, Variant, VariantId, ENGAGEMENT_TIME_CAP_SECS,
};

#[cfg(test)]
pub use prediction::MockPredictiveModel;
#[cfg(test)]
pub use repository::MockPersistenceCollaborator;
