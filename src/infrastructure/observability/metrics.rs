//! Experiment metrics recorded through the `metrics` facade
//!
//! No recorder is installed by the crate; hosts that install one (for
//! example a Prometheus exporter) receive these series.

use metrics::{counter, gauge, histogram};

use crate::domain::experiment::{MetricKind, SignificanceResult, StopReason};

/// Publish the crate version as a gauge
pub fn register_info() {
    gauge!("learning_optimizer_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record an accepted visitor interaction
pub fn record_interaction(converted: bool) {
    let labels = [("converted", if converted { "true" } else { "false" }.to_string())];
    counter!("experiment_interactions_total", &labels).increment(1);
}

/// Record a significance evaluation of a primary metric
pub fn record_evaluation(result: &SignificanceResult) {
    let labels = [
        ("metric", result.metric.as_str().to_string()),
        ("significant", result.significant.to_string()),
    ];

    counter!("experiment_evaluations_total", &labels).increment(1);
    histogram!("experiment_p_value", "metric" => result.metric.as_str()).record(result.p_value);
}

/// Record an experiment leaving the running/paused states
pub fn record_completion(reason: StopReason, metric: MetricKind) {
    let labels = [
        ("reason", stop_reason_label(reason).to_string()),
        ("metric", metric.as_str().to_string()),
    ];
    counter!("experiment_completions_total", &labels).increment(1);
}

/// Record a newly stored learning record
pub fn record_learning_record(metric: MetricKind) {
    counter!("experiment_learning_records_total", "metric" => metric.as_str()).increment(1);
}

/// Record a persistence call that failed after all retries
pub fn record_persistence_failure(operation: &'static str) {
    counter!("experiment_persistence_failures_total", "operation" => operation).increment(1);
}

fn stop_reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Manual => "manual",
        StopReason::SignificanceReached => "significance_reached",
        StopReason::MaxDurationReached => "max_duration_reached",
        StopReason::Cancelled => "cancelled",
    }
}
