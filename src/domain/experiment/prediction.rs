//! Pluggable predictive model used to augment recommendations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::entity::MetricKind;
use super::variant::Variant;
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Words in a headline that signal urgency
const URGENCY_WORDS: [&str; 5] = ["now", "today", "limited", "hurry", "last chance"];

// ============================================================================
// FeatureVector
// ============================================================================

/// Numeric features extracted from a variant's payload and metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub headline_length: f64,
    pub cta_count: f64,
    pub has_urgency: f64,
    pub color_count: f64,
    pub is_mobile: f64,
    pub visitors: f64,
    pub bounce_rate: f64,
    pub time_on_page: f64,
    pub scroll_depth: f64,
    pub engagement_score: f64,
}

impl FeatureVector {
    /// Extract features from a variant
    ///
    /// Missing payload keys contribute 0.
    pub fn from_variant(variant: &Variant) -> Self {
        let payload = variant.payload();

        let headline = payload
            .get("headline")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let headline_lower = headline.to_lowercase();

        let cta_count = payload
            .get("cta_buttons")
            .and_then(|v| v.as_array())
            .map(|a| a.len() as f64)
            .or_else(|| payload.get("cta_count").and_then(|v| v.as_f64()))
            .unwrap_or(0.0);

        let color_count = payload
            .get("colors")
            .and_then(|v| v.as_array())
            .map(|a| a.len() as f64)
            .unwrap_or(0.0);

        let is_mobile = payload
            .get("mobile_optimized")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Self {
            headline_length: headline.chars().count() as f64,
            cta_count,
            has_urgency: flag(URGENCY_WORDS.iter().any(|w| headline_lower.contains(w))),
            color_count,
            is_mobile: flag(is_mobile),
            visitors: variant.visitors() as f64,
            bounce_rate: variant.bounce_rate(),
            time_on_page: variant.time_on_page(),
            scroll_depth: variant.scroll_depth(),
            engagement_score: variant.engagement_score(),
        }
    }

    /// Features in a fixed order
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.headline_length,
            self.cta_count,
            self.has_urgency,
            self.color_count,
            self.is_mobile,
            self.visitors,
            self.bounce_rate,
            self.time_on_page,
            self.scroll_depth,
            self.engagement_score,
        ]
    }
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

// ============================================================================
// TrainingSample / Prediction
// ============================================================================

/// One labeled example submitted for retraining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: FeatureVector,
    pub metric: MetricKind,
    /// Observed primary-metric value of the arm
    pub outcome: f64,
    /// Whether the arm won its experiment
    pub won: bool,
}

/// Model output attached to a recommendation set
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted success probability in [0, 1]
    pub probability: f64,
    /// 0 when no model answered
    pub confidence: f64,
}

impl Prediction {
    /// Prediction used when the model is absent, failed or timed out
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.confidence > 0.0
    }
}

// ============================================================================
// PredictiveModel
// ============================================================================

/// Optional machine-learning collaborator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PredictiveModel: Send + Sync {
    /// Predict the success probability of a variant
    async fn predict(&self, features: &FeatureVector) -> Result<f64, DomainError>;

    /// Retrain on newly completed experiments
    async fn retrain(&self, samples: &[TrainingSample]) -> Result<(), DomainError>;
}
