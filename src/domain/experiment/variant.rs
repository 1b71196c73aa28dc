//! Variant model: one arm of an experiment and its running metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::entity::{ContinuousMetric, MetricKind};
use super::validation::{validate_variant_id, ExperimentValidationError};

/// Time on page (seconds) that saturates the time component of the engagement score
pub const ENGAGEMENT_TIME_CAP_SECS: f64 = 300.0;

const ENGAGEMENT_TIME_WEIGHT: f64 = 0.4;
const ENGAGEMENT_BOUNCE_WEIGHT: f64 = 0.3;
const ENGAGEMENT_SCROLL_WEIGHT: f64 = 0.3;

// ============================================================================
// VariantId
// ============================================================================

/// Unique identifier for a variant within an experiment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariantId(String);

impl VariantId {
    /// Create a new variant ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ExperimentValidationError> {
        let id = id.into();
        validate_variant_id(&id)?;
        Ok(Self(id))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VariantId {
    type Error = ExperimentValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VariantId> for String {
    fn from(id: VariantId) -> Self {
        id.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for VariantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// RunningStats
// ============================================================================

/// Online count, mean and sum of squared deviations of a per-visitor value
///
/// The mean follows `avg' = avg·(n−1)/n + x/n` (or `x` for the first
/// observation) and the squared deviations follow Welford's update, so the
/// sample variance is exact without retaining the raw stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the statistics
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let n = self.count as f64;
        let previous_mean = self.mean;

        self.mean = if self.count > 1 {
            previous_mean * (n - 1.0) / n + value / n
        } else {
            value
        };
        self.m2 += (value - previous_mean) * (value - self.mean);
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Arithmetic mean of the observations (0 when empty)
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (n-1 denominator), 0 with fewer than 2 observations
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count as f64 - 1.0)).max(0.0)
    }

    /// Sample standard deviation
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

// ============================================================================
// InteractionEvent
// ============================================================================

/// A single visitor interaction with a variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub converted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_on_page: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounced: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_depth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_metrics: BTreeMap<String, f64>,
}

impl InteractionEvent {
    /// Create an event with only the conversion flag set
    pub fn new(converted: bool) -> Self {
        Self {
            converted,
            ..Default::default()
        }
    }

    /// Set the time on page in seconds
    pub fn with_time_on_page(mut self, seconds: f64) -> Self {
        self.time_on_page = Some(seconds);
        self
    }

    /// Set whether the visitor bounced
    pub fn with_bounced(mut self, bounced: bool) -> Self {
        self.bounced = Some(bounced);
        self
    }

    /// Set the scroll depth (fraction of the page, 0..=1)
    pub fn with_scroll_depth(mut self, depth: f64) -> Self {
        self.scroll_depth = Some(depth);
        self
    }

    /// Set the revenue attributed to this visit
    pub fn with_revenue(mut self, amount: f64) -> Self {
        self.revenue = Some(amount);
        self
    }

    /// Add a custom metric observation
    pub fn with_custom_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.custom_metrics.insert(name.into(), value);
        self
    }

    /// Reject values that would corrupt the running metrics
    pub fn validate(&self) -> Result<(), ExperimentValidationError> {
        if let Some(seconds) = self.time_on_page {
            check_non_negative("time_on_page", seconds)?;
        }

        if let Some(depth) = self.scroll_depth {
            if !depth.is_finite() {
                return Err(invalid("scroll_depth", "must be a finite number"));
            }
        }

        if let Some(amount) = self.revenue {
            check_non_negative("revenue", amount)?;
        }

        for (name, value) in &self.custom_metrics {
            if !value.is_finite() {
                return Err(invalid(name, "must be a finite number"));
            }
        }

        Ok(())
    }
}

fn check_non_negative(field: &str, value: f64) -> Result<(), ExperimentValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, "must be a finite, non-negative number"));
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> ExperimentValidationError {
    ExperimentValidationError::InvalidInteraction(field.to_string(), reason.to_string())
}

// ============================================================================
// Variant
// ============================================================================

/// One arm of an experiment: configuration plus running metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    id: VariantId,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    traffic_allocation: f64,
    /// Opaque content/design payload compared key by key on completion
    payload: BTreeMap<String, Value>,

    visitors: u64,
    conversions: u64,
    conversion_rate: f64,
    bounce: RunningStats,
    time_on_page: RunningStats,
    scroll_depth: RunningStats,
    engagement_score: f64,
    revenue: f64,
    revenue_per_visitor: f64,
    /// Per-visitor revenue, zero for visits without revenue
    revenue_distribution: RunningStats,
    custom_metrics: BTreeMap<String, RunningStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
}

impl Variant {
    /// Create a new variant with no recorded traffic
    pub fn new(id: VariantId, name: impl Into<String>, traffic_allocation: f64) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            traffic_allocation,
            payload: BTreeMap::new(),
            visitors: 0,
            conversions: 0,
            conversion_rate: 0.0,
            bounce: RunningStats::new(),
            time_on_page: RunningStats::new(),
            scroll_depth: RunningStats::new(),
            engagement_score: 0.0,
            revenue: 0.0,
            revenue_per_visitor: 0.0,
            revenue_distribution: RunningStats::new(),
            custom_metrics: BTreeMap::new(),
            last_updated: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the whole payload
    pub fn with_payload(mut self, payload: BTreeMap<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Add a single payload entry
    pub fn with_payload_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    // Getters

    pub fn id(&self) -> &VariantId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn traffic_allocation(&self) -> f64 {
        self.traffic_allocation
    }

    pub fn payload(&self) -> &BTreeMap<String, Value> {
        &self.payload
    }

    pub fn visitors(&self) -> u64 {
        self.visitors
    }

    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    pub fn conversion_rate(&self) -> f64 {
        self.conversion_rate
    }

    pub fn bounce_rate(&self) -> f64 {
        self.bounce.mean()
    }

    pub fn time_on_page(&self) -> f64 {
        self.time_on_page.mean()
    }

    pub fn scroll_depth(&self) -> f64 {
        self.scroll_depth.mean()
    }

    /// Number of interactions that reported a scroll depth
    pub fn scroll_depth_observations(&self) -> u64 {
        self.scroll_depth.count()
    }

    pub fn engagement_score(&self) -> f64 {
        self.engagement_score
    }

    pub fn revenue(&self) -> f64 {
        self.revenue
    }

    pub fn revenue_per_visitor(&self) -> f64 {
        self.revenue_per_visitor
    }

    /// Running mean of a custom metric, if it was ever reported
    pub fn custom_metric(&self, name: &str) -> Option<f64> {
        self.custom_metrics.get(name).map(RunningStats::mean)
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Per-visitor statistics backing a continuous metric
    pub fn continuous_stats(&self, metric: ContinuousMetric) -> RunningStats {
        match metric {
            ContinuousMetric::TimeOnPage => self.time_on_page,
            ContinuousMetric::ScrollDepth => self.scroll_depth,
            ContinuousMetric::RevenuePerVisitor => self.revenue_distribution,
        }
    }

    /// Current value of the given primary metric
    pub fn metric_value(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::Proportion => self.conversion_rate,
            MetricKind::Continuous { metric } => match metric {
                ContinuousMetric::TimeOnPage => self.time_on_page(),
                ContinuousMetric::ScrollDepth => self.scroll_depth(),
                ContinuousMetric::RevenuePerVisitor => self.revenue_per_visitor,
            },
        }
    }

    // Mutation

    /// Apply a visitor interaction to the counters and derived metrics
    ///
    /// The event is validated before any counter changes, so a rejected event
    /// leaves the variant untouched.
    pub fn apply_interaction(
        &mut self,
        event: &InteractionEvent,
        now: DateTime<Utc>,
    ) -> Result<(), ExperimentValidationError> {
        event.validate()?;

        self.visitors += 1;

        if event.converted {
            self.conversions += 1;
        }

        self.conversion_rate = self.conversions as f64 / self.visitors as f64;

        if let Some(seconds) = event.time_on_page {
            self.time_on_page.push(seconds);
        }

        if let Some(bounced) = event.bounced {
            self.bounce.push(if bounced { 1.0 } else { 0.0 });
        }

        if let Some(depth) = event.scroll_depth {
            self.scroll_depth.push(depth.clamp(0.0, 1.0));
        }

        let revenue = event.revenue.unwrap_or(0.0);
        self.revenue += revenue;
        self.revenue_distribution.push(revenue);
        self.revenue_per_visitor = self.revenue / self.visitors as f64;

        for (name, value) in &event.custom_metrics {
            self.custom_metrics
                .entry(name.clone())
                .or_default()
                .push(*value);
        }

        self.engagement_score = engagement_score(
            self.time_on_page(),
            self.bounce_rate(),
            self.scroll_depth(),
        );
        self.last_updated = Some(now);

        Ok(())
    }
}

/// Composite engagement score in [0, 1]
pub fn engagement_score(time_on_page: f64, bounce_rate: f64, scroll_depth: f64) -> f64 {
    let time_score = (time_on_page / ENGAGEMENT_TIME_CAP_SECS).clamp(0.0, 1.0);
    let bounce_score = 1.0 - bounce_rate;

    ENGAGEMENT_TIME_WEIGHT * time_score
        + ENGAGEMENT_BOUNCE_WEIGHT * bounce_score
        + ENGAGEMENT_SCROLL_WEIGHT * scroll_depth
}
