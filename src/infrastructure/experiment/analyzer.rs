//! Significance analysis of an experiment's primary metric

use chrono::{DateTime, Utc};

use super::statistical::{
    chi_square_2x2, cohens_d, student_t_critical, wald_interval, welch_t_test, SampleSummary,
};
use crate::domain::experiment::{
    AnalysisSnapshot, ArmSnapshot, ConfidenceInterval, MetricKind, SignificanceResult,
    StatisticalTest, VariantId,
};

/// Coverage of the reported confidence intervals
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Runs the hypothesis test matching the primary metric of a snapshot
#[derive(Debug, Clone, Copy)]
pub struct SignificanceAnalyzer {
    confidence_level: f64,
}

impl Default for SignificanceAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_LEVEL)
    }
}

impl SignificanceAnalyzer {
    pub fn new(confidence_level: f64) -> Self {
        Self { confidence_level }
    }

    /// Evaluate control against the single treatment
    ///
    /// Missing data yields a non-significant result with p = 1.
    pub fn analyze(&self, snapshot: &AnalysisSnapshot, now: DateTime<Utc>) -> SignificanceResult {
        let metric = snapshot.metric;
        let alpha = snapshot.significance_level;

        let treatment = match snapshot.treatments.as_slice() {
            [treatment] => treatment,
            [] => {
                return SignificanceResult::insufficient(metric, alpha, "no treatment arm", now);
            }
            _ => {
                return SignificanceResult::insufficient(
                    metric,
                    alpha,
                    "only two-arm experiments are analyzed",
                    now,
                );
            }
        };
        let control = &snapshot.control;

        let result = match metric {
            MetricKind::Proportion => self.analyze_proportion(control, treatment, alpha, now),
            MetricKind::Continuous { .. } => {
                self.analyze_continuous(control, treatment, metric, alpha, now)
            }
        };

        SignificanceResult {
            treatment_variant_id: Some(treatment.variant_id.clone()),
            ..result
        }
    }

    fn analyze_proportion(
        &self,
        control: &ArmSnapshot,
        treatment: &ArmSnapshot,
        alpha: f64,
        now: DateTime<Utc>,
    ) -> SignificanceResult {
        let metric = MetricKind::Proportion;

        if control.visitors == 0 || treatment.visitors == 0 {
            return SignificanceResult::insufficient(metric, alpha, "an arm has no visitors", now)
                .with_values(control.value, treatment.value);
        }

        let Some(outcome) = chi_square_2x2(
            control.visitors,
            control.conversions,
            treatment.visitors,
            treatment.conversions,
        ) else {
            return SignificanceResult::insufficient(
                metric,
                alpha,
                "contingency table has a zero expected count",
                now,
            )
            .with_values(control.value, treatment.value);
        };

        let (lower, upper) = wald_interval(
            control.value,
            control.visitors,
            treatment.value,
            treatment.visitors,
            self.confidence_level,
        );

        let significant = outcome.p_value < alpha;

        SignificanceResult {
            test: StatisticalTest::ChiSquare,
            metric,
            statistic: outcome.statistic,
            p_value: outcome.p_value,
            effect_size: outcome.cramers_v,
            confidence_interval: Some(ConfidenceInterval::new(
                lower,
                upper,
                self.confidence_level,
            )),
            significance_level: alpha,
            significant,
            control_value: control.value,
            treatment_value: treatment.value,
            treatment_variant_id: None,
            winner: winner(control, treatment, significant),
            note: None,
            evaluated_at: now,
        }
    }

    fn analyze_continuous(
        &self,
        control: &ArmSnapshot,
        treatment: &ArmSnapshot,
        metric: MetricKind,
        alpha: f64,
        now: DateTime<Utc>,
    ) -> SignificanceResult {
        let control_summary =
            SampleSummary::new(control.stats.count(), control.stats.mean(), control.stats.variance());
        let treatment_summary = SampleSummary::new(
            treatment.stats.count(),
            treatment.stats.mean(),
            treatment.stats.variance(),
        );

        let Some(outcome) = welch_t_test(control_summary, treatment_summary) else {
            return SignificanceResult::insufficient(
                metric,
                alpha,
                "fewer than two observations or zero variance",
                now,
            )
            .with_values(control.value, treatment.value);
        };

        let difference = treatment_summary.mean - control_summary.mean;
        let margin = student_t_critical(self.confidence_level, outcome.df) * outcome.std_error;
        let significant = outcome.p_value < alpha;

        SignificanceResult {
            test: StatisticalTest::WelchT,
            metric,
            statistic: outcome.t,
            p_value: outcome.p_value,
            effect_size: cohens_d(control_summary, treatment_summary).abs(),
            confidence_interval: Some(ConfidenceInterval::new(
                difference - margin,
                difference + margin,
                self.confidence_level,
            )),
            significance_level: alpha,
            significant,
            control_value: control.value,
            treatment_value: treatment.value,
            treatment_variant_id: None,
            winner: winner(control, treatment, significant),
            note: None,
            evaluated_at: now,
        }
    }
}

/// Arm with the higher primary-metric value, only when significant
fn winner(control: &ArmSnapshot, treatment: &ArmSnapshot, significant: bool) -> Option<VariantId> {
    if !significant {
        return None;
    }

    if treatment.value > control.value {
        Some(treatment.variant_id.clone())
    } else if control.value > treatment.value {
        Some(control.variant_id.clone())
    } else {
        None
    }
}
