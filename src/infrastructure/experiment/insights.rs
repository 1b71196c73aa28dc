//! Insights, recommendations and learning records for completed experiments

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::domain::experiment::{
    relative_lift, Experiment, LearningRecord, PatternType, Variant,
};

/// Output of the extractor for one completed experiment
#[derive(Debug, Clone, PartialEq)]
pub struct Findings {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub learning_record: Option<LearningRecord>,
}

/// One differing payload key between two variants
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadDiff {
    Changed { key: String, from: Value, to: Value },
    Added { key: String, value: Value },
    Removed { key: String },
}

impl PayloadDiff {
    pub fn key(&self) -> &str {
        match self {
            Self::Changed { key, .. } | Self::Added { key, .. } | Self::Removed { key } => key,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Changed { key, from, to } => {
                format!("changed `{}`: `{}` → `{}`", key, display(from), display(to))
            }
            Self::Added { key, value } => format!("added `{}`: `{}`", key, display(value)),
            Self::Removed { key } => format!("removed `{}`", key),
        }
    }
}

/// Key-by-key differences going from `base` to `target`
pub fn payload_diff(base: &Variant, target: &Variant) -> Vec<PayloadDiff> {
    let keys: BTreeSet<&String> = base.payload().keys().chain(target.payload().keys()).collect();

    keys.into_iter()
        .filter_map(|key| match (base.payload().get(key), target.payload().get(key)) {
            (Some(from), Some(to)) if from != to => Some(PayloadDiff::Changed {
                key: key.clone(),
                from: from.clone(),
                to: to.clone(),
            }),
            (None, Some(value)) => Some(PayloadDiff::Added {
                key: key.clone(),
                value: value.clone(),
            }),
            (Some(_), None) => Some(PayloadDiff::Removed { key: key.clone() }),
            _ => None,
        })
        .collect()
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Template-based extractor run once per completed experiment
#[derive(Debug, Clone, Copy, Default)]
pub struct InsightExtractor;

impl InsightExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, experiment: &Experiment, now: DateTime<Utc>) -> Findings {
        let metric = experiment.primary_metric();
        let control = experiment.control();

        let mut insights = Vec::new();
        for treatment in experiment.treatments() {
            insights.push(lift_statement(
                treatment,
                metric.label(),
                control.metric_value(metric),
                treatment.metric_value(metric),
            ));
            insights.push(lift_statement(
                treatment,
                "engagement score",
                control.engagement_score(),
                treatment.engagement_score(),
            ));
        }

        insights.push(match experiment.significance() {
            Some(s) if s.significant => format!(
                "Results are statistically significant (p-value: {:.4})",
                s.p_value
            ),
            Some(s) => format!(
                "Results are not statistically significant (p-value: {:.4})",
                s.p_value
            ),
            None => "No significance evaluation was performed".to_string(),
        });

        let mut recommendations = Vec::new();
        let mut learning_record = None;

        if let Some(winner) = experiment.winner() {
            let loser = if winner.id() == control.id() {
                experiment.treatments().first()
            } else {
                Some(control)
            };
            let diffs = loser.map(|l| payload_diff(l, winner)).unwrap_or_default();

            recommendations.push(format!("Adopt variant {}", winner.name()));
            recommendations.extend(diffs.iter().map(PayloadDiff::describe));

            if let Some(significance) = experiment
                .significance()
                .filter(|s| s.significant)
            {
                let pattern_type = if winner.id() == control.id() {
                    PatternType::ControlWon
                } else {
                    PatternType::TreatmentWon
                };
                let improvement = loser
                    .map(|l| relative_lift(l.metric_value(metric), winner.metric_value(metric)))
                    .unwrap_or(0.0);

                let mut tags = vec![metric.as_str().to_string()];
                tags.extend(diffs.iter().map(|d| d.key().to_string()));

                learning_record = Some(
                    LearningRecord::new(experiment.id().clone(), pattern_type, metric, now)
                        .with_insights(diffs.iter().map(PayloadDiff::describe).collect())
                        .with_improvement(improvement)
                        .with_confidence(significance.confidence())
                        .with_context_tags(tags),
                );
            }
        }

        Findings {
            insights,
            recommendations,
            learning_record,
        }
    }
}

fn lift_statement(variant: &Variant, label: &str, control_value: f64, variant_value: f64) -> String {
    if control_value == 0.0 {
        return format!("Variant {} {}: no control baseline", variant.name(), label);
    }

    let lift = relative_lift(control_value, variant_value) * 100.0;
    if lift > 0.0 {
        format!("Variant {} improved {} by {:.1}%", variant.name(), label, lift)
    } else if lift < 0.0 {
        format!("Variant {} decreased {} by {:.1}%", variant.name(), label, lift.abs())
    } else {
        format!("Variant {} showed no change in {}", variant.name(), label)
    }
}
