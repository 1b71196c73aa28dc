//! Domain layer - Core business logic and entities

pub mod clock;
pub mod error;
pub mod experiment;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use experiment::{
    ContinuousMetric, Experiment, ExperimentId, ExperimentQuery, ExperimentStatus,
    ExperimentStatusReport, ExperimentValidationError, FeatureVector, InteractionEvent,
    LearningRecord, LearningSummary, MetricKind, PersistenceCollaborator, Prediction,
    PredictiveModel, SignificanceResult, StopReason, TrainingSample, Variant, VariantId,
};
pub use retry::RetryConfig;
