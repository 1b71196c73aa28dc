//! Infrastructure layer for experiment A/B testing
//!
//! Statistics, sample size planning, early stopping, insight extraction and
//! the learning store that backs optimization recommendations.

mod analyzer;
mod early_stopping;
mod insights;
mod learning_store;
mod recommendation;
mod sample_size;
mod statistical;

pub use analyzer::{SignificanceAnalyzer, DEFAULT_CONFIDENCE_LEVEL};
pub use early_stopping::{EarlyStoppingController, StopDecision};
pub use insights::{payload_diff, Findings, InsightExtractor, PayloadDiff};
pub use learning_store::InMemoryLearningStore;
pub use recommendation::{
    insight_frequencies, OptimizationRecommendations, Recommendation, RecommendationConfig,
    RecommendationEngine, RecommendationSource, FALLBACK_MESSAGE, HIGH_BOUNCE_MESSAGE,
    LOW_SCROLL_MESSAGE,
};
pub use sample_size::{
    compute_sample_size, SampleSizeParams, SampleSizePlan, SampleSizePlanner,
    DEFAULT_PER_ARM_FLOOR,
};
pub use statistical::{
    chi_square_2x2, chi_square_sf_1df, cohens_d, normal_cdf, normal_quantile, student_t_critical,
    student_t_two_tailed, wald_interval, welch_t_test, ChiSquareOutcome, SampleSummary,
    WelchOutcome,
};
