//! Optimization recommendations from learned patterns, heuristics and an
//! optional predictive model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::learning_store::InMemoryLearningStore;
use crate::domain::experiment::{
    FeatureVector, InsightFrequency, LearningRecord, MetricKind, ModelPerformance, Prediction,
    PredictiveModel, TrainingSample, Variant,
};
use crate::domain::DomainError;
use crate::infrastructure::task;

pub const HIGH_BOUNCE_MESSAGE: &str =
    "High bounce rate detected - consider improving page loading speed";
pub const LOW_SCROLL_MESSAGE: &str =
    "Low scroll depth - consider moving key content above the fold";
pub const FALLBACK_MESSAGE: &str =
    "Continue testing with incremental changes to identify improvements";

/// Tunables of the recommendation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Records must improve on their metric by more than this ratio
    pub min_improvement: f64,
    /// Number of most recent qualifying records considered
    pub recent_records: usize,
    /// Insights must appear at least this many times
    pub min_occurrences: usize,
    /// Maximum number of learned-pattern recommendations
    pub max_recommendations: usize,
    pub high_bounce_threshold: f64,
    pub low_scroll_threshold: f64,
    /// Timeout for a single model prediction
    pub prediction_timeout_ms: u64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            min_improvement: 0.05,
            recent_records: 10,
            min_occurrences: 2,
            max_recommendations: 5,
            high_bounce_threshold: 0.7,
            low_scroll_threshold: 0.3,
            prediction_timeout_ms: 2000,
        }
    }
}

/// Where a recommendation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    LearnedPattern,
    Heuristic,
    Fallback,
}

/// A single optimization suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub text: String,
    pub source: RecommendationSource,
    /// Number of learning records the pattern appeared in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<usize>,
}

impl Recommendation {
    fn heuristic(text: &str) -> Self {
        Self {
            text: text.to_string(),
            source: RecommendationSource::Heuristic,
            occurrences: None,
        }
    }
}

/// Recommendations for one variant plus the model's opinion of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendations {
    pub recommendations: Vec<Recommendation>,
    pub prediction: Prediction,
}

impl OptimizationRecommendations {
    /// Recommendation texts in order
    pub fn texts(&self) -> Vec<&str> {
        self.recommendations.iter().map(|r| r.text.as_str()).collect()
    }
}

/// Count insight strings and sort by frequency, ties alphabetically
pub fn insight_frequencies<'a>(
    records: impl IntoIterator<Item = &'a LearningRecord>,
) -> Vec<InsightFrequency> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        for insight in &record.insights {
            *counts.entry(insight.as_str()).or_default() += 1;
        }
    }

    let mut frequencies: Vec<InsightFrequency> = counts
        .into_iter()
        .map(|(insight, occurrences)| InsightFrequency {
            insight: insight.to_string(),
            occurrences,
        })
        .collect();
    frequencies.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.insight.cmp(&b.insight))
    });

    frequencies
}

/// Builds recommendations from the learning store
pub struct RecommendationEngine {
    store: Arc<InMemoryLearningStore>,
    model: Option<Arc<dyn PredictiveModel>>,
    config: RecommendationConfig,
    training_samples_submitted: Arc<AtomicU64>,
}

impl std::fmt::Debug for RecommendationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationEngine")
            .field("config", &self.config)
            .field("model_configured", &self.model.is_some())
            .finish()
    }
}

impl RecommendationEngine {
    pub fn new(store: Arc<InMemoryLearningStore>, config: RecommendationConfig) -> Self {
        Self {
            store,
            model: None,
            config,
            training_samples_submitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a predictive model
    pub fn with_model(mut self, model: Arc<dyn PredictiveModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn config(&self) -> &RecommendationConfig {
        &self.config
    }

    pub fn model_performance(&self) -> ModelPerformance {
        ModelPerformance {
            configured: self.model.is_some(),
            training_samples_submitted: self.training_samples_submitted.load(Ordering::Relaxed),
        }
    }

    /// Suggest changes for `variant` based on what worked for `target_metric`
    ///
    /// Never fails because of the model; a missing, failing or slow model
    /// yields a zero-confidence prediction.
    pub async fn recommend(
        &self,
        variant: &Variant,
        target_metric: MetricKind,
    ) -> Result<OptimizationRecommendations, DomainError> {
        let records = self.store.recent_successful(
            target_metric,
            self.config.min_improvement,
            self.config.recent_records,
        )?;

        let mut recommendations: Vec<Recommendation> = insight_frequencies(&records)
            .into_iter()
            .filter(|f| f.occurrences >= self.config.min_occurrences)
            .take(self.config.max_recommendations)
            .map(|f| Recommendation {
                text: format!(
                    "Consider: {} (successful in {} tests)",
                    f.insight, f.occurrences
                ),
                source: RecommendationSource::LearnedPattern,
                occurrences: Some(f.occurrences),
            })
            .collect();

        if variant.bounce_rate() > self.config.high_bounce_threshold {
            recommendations.push(Recommendation::heuristic(HIGH_BOUNCE_MESSAGE));
        }

        if variant.scroll_depth_observations() > 0
            && variant.scroll_depth() < self.config.low_scroll_threshold
        {
            recommendations.push(Recommendation::heuristic(LOW_SCROLL_MESSAGE));
        }

        if recommendations.is_empty() {
            recommendations.push(Recommendation {
                text: FALLBACK_MESSAGE.to_string(),
                source: RecommendationSource::Fallback,
                occurrences: None,
            });
        }

        let prediction = self.predict(variant).await;

        debug!(
            variant_id = %variant.id(),
            metric = %target_metric,
            records = records.len(),
            recommendations = recommendations.len(),
            "Built optimization recommendations"
        );

        Ok(OptimizationRecommendations {
            recommendations,
            prediction,
        })
    }

    /// Ask the model about a variant, bounded by the configured timeout
    pub async fn predict(&self, variant: &Variant) -> Prediction {
        let Some(model) = &self.model else {
            return Prediction::unavailable();
        };

        let features = FeatureVector::from_variant(variant);
        let timeout = Duration::from_millis(self.config.prediction_timeout_ms);

        match tokio::time::timeout(timeout, model.predict(&features)).await {
            Ok(Ok(probability)) if (0.0..=1.0).contains(&probability) => Prediction {
                probability,
                confidence: probability.max(1.0 - probability),
            },
            Ok(Ok(probability)) => {
                warn!(
                    variant_id = %variant.id(),
                    probability,
                    "Predictive model returned an out-of-range probability"
                );
                Prediction::unavailable()
            }
            Ok(Err(e)) => {
                warn!(variant_id = %variant.id(), error = %e, "Predictive model failed");
                Prediction::unavailable()
            }
            Err(_) => {
                warn!(
                    variant_id = %variant.id(),
                    timeout_ms = self.config.prediction_timeout_ms,
                    "Predictive model timed out"
                );
                Prediction::unavailable()
            }
        }
    }

    /// Submit training samples to the model without waiting for it
    pub fn spawn_retrain(&self, samples: Vec<TrainingSample>) -> Option<tokio::task::JoinHandle<()>> {
        let model = self.model.clone()?;
        if samples.is_empty() {
            return None;
        }

        let submitted = samples.len() as u64;
        let handle = task::spawn_detached("model_retrain", async move {
            match model.retrain(&samples).await {
                Ok(()) => debug!(samples = samples.len(), "Predictive model retrained"),
                Err(e) => warn!(error = %e, "Predictive model retraining failed"),
            }
        })?;

        self.training_samples_submitted
            .fetch_add(submitted, Ordering::Relaxed);
        Some(handle)
    }
}
