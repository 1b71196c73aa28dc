//! Early-stopping decisions for running experiments

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::analyzer::SignificanceAnalyzer;
use crate::domain::experiment::{AnalysisSnapshot, SignificanceResult, StopReason};

/// Outcome of one early-stop check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopDecision {
    /// Whole days since the experiment started
    pub elapsed_days: i64,
    /// Minimum sample and minimum duration both reached
    pub preconditions_met: bool,
    /// Significance evaluation, present only when the preconditions held
    pub evaluation: Option<SignificanceResult>,
    /// Set when the experiment must complete now
    pub stop: Option<StopReason>,
}

impl StopDecision {
    fn idle(elapsed_days: i64) -> Self {
        Self {
            elapsed_days,
            preconditions_met: false,
            evaluation: None,
            stop: None,
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stop.is_some()
    }
}

/// Decides whether a running experiment should complete
///
/// The analyzer is only consulted once the total sample and the minimum
/// duration are both reached, so early peeking can never stop a test.
/// Reaching the maximum duration forces completion regardless.
#[derive(Debug, Clone, Copy, Default)]
pub struct EarlyStoppingController {
    analyzer: SignificanceAnalyzer,
}

impl EarlyStoppingController {
    pub fn new(analyzer: SignificanceAnalyzer) -> Self {
        Self { analyzer }
    }

    pub fn analyzer(&self) -> &SignificanceAnalyzer {
        &self.analyzer
    }

    pub fn evaluate(&self, snapshot: &AnalysisSnapshot, now: DateTime<Utc>) -> StopDecision {
        let elapsed_days = snapshot.elapsed_days(now);

        if !snapshot.status.is_running() {
            return StopDecision::idle(elapsed_days);
        }

        let preconditions_met = snapshot.total_visitors() >= snapshot.minimum_sample_size
            && elapsed_days >= i64::from(snapshot.minimum_duration_days);

        let evaluation = preconditions_met.then(|| self.analyzer.analyze(snapshot, now));

        let stop = if evaluation.as_ref().is_some_and(|e| e.significant) {
            Some(StopReason::SignificanceReached)
        } else if elapsed_days >= i64::from(snapshot.maximum_duration_days) {
            Some(StopReason::MaxDurationReached)
        } else {
            None
        };

        StopDecision {
            elapsed_days,
            preconditions_met,
            evaluation,
            stop,
        }
    }
}
