//! Experiment registry for A/B testing
//!
//! Owns every experiment and its state machine, records visitor interactions,
//! runs early-stopping checks and turns completed experiments into learning
//! records that feed optimization recommendations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::experiment::{
    validate_durations, validate_traffic_allocation, Experiment, ExperimentId, ExperimentQuery,
    ExperimentStatus, ExperimentStatusReport, ExperimentValidationError, FeatureVector,
    InteractionEvent, LearningRecord, LearningSummary, MetricKind, PersistenceCollaborator,
    PredictiveModel, SignificanceResult, StopReason, TrainingSample, Variant, VariantId,
};
use crate::domain::{Clock, DomainError, RetryConfig, SystemClock};
use crate::infrastructure::experiment::{
    insight_frequencies, EarlyStoppingController, InMemoryLearningStore, InsightExtractor,
    OptimizationRecommendations, RecommendationConfig, RecommendationEngine, SampleSizeParams,
    SampleSizePlanner, SignificanceAnalyzer, DEFAULT_CONFIDENCE_LEVEL, DEFAULT_PER_ARM_FLOOR,
};
use crate::infrastructure::{observability, task};
use crate::infrastructure::persistence::PersistenceDispatcher;

/// Smallest minimum sample size an experiment may be created with
pub const DEFAULT_SAMPLE_SIZE_FLOOR: u64 = 100;

/// Number of insights reported in the learning summary
const TOP_INSIGHTS: usize = 10;

// ============================================================================
// Configuration
// ============================================================================

/// Where the early-stop check runs after a recorded interaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyStopDispatch {
    /// On a spawned task; the caller never waits for the analysis
    #[default]
    Background,
    /// Awaited by `record_interaction` before it returns
    Inline,
}

/// Registry tunables
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub sample_size_floor: u64,
    pub per_arm_floor: u64,
    pub confidence_level: f64,
    pub early_stop_dispatch: EarlyStopDispatch,
    pub recommendation: RecommendationConfig,
    pub persistence_retry: RetryConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sample_size_floor: DEFAULT_SAMPLE_SIZE_FLOOR,
            per_arm_floor: DEFAULT_PER_ARM_FLOOR,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            early_stop_dispatch: EarlyStopDispatch::default(),
            recommendation: RecommendationConfig::default(),
            persistence_retry: RetryConfig::default(),
        }
    }
}

impl RegistryConfig {
    pub fn with_early_stop_dispatch(mut self, dispatch: EarlyStopDispatch) -> Self {
        self.early_stop_dispatch = dispatch;
        self
    }

    pub fn with_sample_size_floor(mut self, floor: u64) -> Self {
        self.sample_size_floor = floor;
        self
    }

    pub fn with_recommendation(mut self, config: RecommendationConfig) -> Self {
        self.recommendation = config;
        self
    }

    pub fn with_persistence_retry(mut self, retry: RetryConfig) -> Self {
        self.persistence_retry = retry;
        self
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// Request to create a new experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateExperimentRequest {
    pub name: String,
    pub description: Option<String>,
    pub metric: MetricKind,
    pub secondary_metrics: Vec<String>,
    pub significance_level: f64,
    pub power: f64,
    /// Relative lift the test should be able to detect
    pub minimum_detectable_effect: f64,
    /// Expected control conversion rate
    pub baseline_rate: f64,
    /// Overrides the planned total sample size
    pub minimum_sample_size: Option<u64>,
    pub minimum_duration_days: u32,
    pub maximum_duration_days: u32,
    pub control: CreateVariantRequest,
    pub treatments: Vec<CreateVariantRequest>,
}

impl Default for CreateExperimentRequest {
    fn default() -> Self {
        let params = SampleSizeParams::default();

        Self {
            name: String::new(),
            description: None,
            metric: MetricKind::default(),
            secondary_metrics: Vec::new(),
            significance_level: params.significance_level,
            power: params.power,
            minimum_detectable_effect: params.minimum_detectable_effect,
            baseline_rate: params.baseline_rate,
            minimum_sample_size: None,
            minimum_duration_days: 7,
            maximum_duration_days: 30,
            control: CreateVariantRequest::default(),
            treatments: Vec::new(),
        }
    }
}

impl CreateExperimentRequest {
    fn sample_size_params(&self) -> SampleSizeParams {
        SampleSizeParams {
            significance_level: self.significance_level,
            power: self.power,
            minimum_detectable_effect: self.minimum_detectable_effect,
            baseline_rate: self.baseline_rate,
        }
    }
}

/// Request to create a new variant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateVariantRequest {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub traffic_allocation: f64,
    pub payload: BTreeMap<String, Value>,
}

impl CreateVariantRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, traffic_allocation: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            traffic_allocation,
            ..Default::default()
        }
    }

    pub fn with_payload_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    fn into_variant(self) -> Result<Variant, ExperimentValidationError> {
        let mut variant = Variant::new(VariantId::new(self.id)?, self.name, self.traffic_allocation)
            .with_payload(self.payload);
        if let Some(description) = self.description {
            variant = variant.with_description(description);
        }
        Ok(variant)
    }
}

// ============================================================================
// Experiment Registry
// ============================================================================

type ExperimentMap = HashMap<ExperimentId, Arc<Mutex<Experiment>>>;

/// Result of completing an experiment under its lock
struct Completion {
    experiment: Experiment,
    learning_record: Option<LearningRecord>,
}

/// Entry point for the experimentation engine
///
/// Cloning is cheap; clones share the same experiments and learning store.
#[derive(Clone)]
pub struct ExperimentRegistry {
    experiments: Arc<RwLock<ExperimentMap>>,
    planner: SampleSizePlanner,
    controller: EarlyStoppingController,
    extractor: InsightExtractor,
    store: Arc<InMemoryLearningStore>,
    recommender: Arc<RecommendationEngine>,
    persistence: PersistenceDispatcher,
    clock: Arc<dyn Clock>,
    config: Arc<RegistryConfig>,
}

impl std::fmt::Debug for ExperimentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentRegistry")
            .field("config", &self.config)
            .field("persistence", &self.persistence)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for ExperimentRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ExperimentRegistry {
    /// Create a registry using the system clock and no collaborators
    pub fn new(config: RegistryConfig) -> Self {
        let store = Arc::new(InMemoryLearningStore::new());
        let recommender = RecommendationEngine::new(Arc::clone(&store), config.recommendation.clone());

        Self {
            experiments: Arc::new(RwLock::new(HashMap::new())),
            planner: SampleSizePlanner::new(config.per_arm_floor),
            controller: EarlyStoppingController::new(SignificanceAnalyzer::new(
                config.confidence_level,
            )),
            extractor: InsightExtractor::new(),
            store,
            recommender: Arc::new(recommender),
            persistence: PersistenceDispatcher::disabled(),
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirror every change to a persistence collaborator
    pub fn with_persistence(mut self, collaborator: Arc<dyn PersistenceCollaborator>) -> Self {
        self.persistence =
            PersistenceDispatcher::new(collaborator, self.config.persistence_retry.clone());
        self
    }

    /// Augment recommendations with a predictive model
    pub fn with_model(mut self, model: Arc<dyn PredictiveModel>) -> Self {
        self.recommender = Arc::new(
            RecommendationEngine::new(Arc::clone(&self.store), self.config.recommendation.clone())
                .with_model(model),
        );
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn learning_store(&self) -> &InMemoryLearningStore {
        &self.store
    }

    // ------------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------------

    /// Validate a request, size the test and store the experiment in Planning
    pub fn create(&self, request: CreateExperimentRequest) -> Result<ExperimentId, DomainError> {
        debug!(name = %request.name, "Creating experiment");

        let experiment = self.build_experiment(request).map_err(validation)?;
        let id = experiment.id().clone();

        {
            let mut experiments = self.experiments.write().map_err(|e| {
                DomainError::internal(format!("Failed to acquire write lock: {}", e))
            })?;
            experiments.insert(id.clone(), Arc::new(Mutex::new(experiment.clone())));
        }

        info!(
            experiment_id = %id,
            minimum_sample_size = experiment.minimum_sample_size(),
            arms = experiment.treatments().len() + 1,
            "Experiment created"
        );
        self.persistence.save_experiment(experiment);

        Ok(id)
    }

    fn build_experiment(
        &self,
        request: CreateExperimentRequest,
    ) -> Result<Experiment, ExperimentValidationError> {
        if request.name.trim().is_empty() {
            return Err(ExperimentValidationError::EmptyName);
        }
        if request.treatments.is_empty() {
            return Err(ExperimentValidationError::NoTreatments);
        }

        let mut seen = HashSet::new();
        for variant in std::iter::once(&request.control).chain(request.treatments.iter()) {
            if !seen.insert(variant.id.as_str()) {
                return Err(ExperimentValidationError::DuplicateVariantId(
                    variant.id.clone(),
                ));
            }
        }

        validate_traffic_allocation(
            std::iter::once(&request.control)
                .chain(request.treatments.iter())
                .map(|v| (v.id.as_str(), v.traffic_allocation)),
        )?;
        validate_durations(request.minimum_duration_days, request.maximum_duration_days)?;

        let arms = request.treatments.len() + 1;
        let plan = self.planner.plan(&request.sample_size_params(), arms)?;
        let minimum_sample_size = match request.minimum_sample_size {
            Some(size) if size < self.config.sample_size_floor => {
                return Err(ExperimentValidationError::SampleSizeBelowFloor(
                    size,
                    self.config.sample_size_floor,
                ));
            }
            Some(size) => size,
            None => plan.total,
        };

        let mut experiment = Experiment::new(
            ExperimentId::generate(),
            request.name,
            request.control.into_variant()?,
            self.clock.now(),
        )
        .with_primary_metric(request.metric)
        .with_secondary_metrics(request.secondary_metrics)
        .with_significance_level(request.significance_level)
        .with_minimum_sample_size(minimum_sample_size)
        .with_duration_days(request.minimum_duration_days, request.maximum_duration_days);

        if let Some(description) = request.description {
            experiment = experiment.with_description(description);
        }
        for treatment in request.treatments {
            experiment = experiment.with_treatment(treatment.into_variant()?);
        }

        Ok(experiment)
    }

    /// Immutable view of an experiment with its progress
    pub fn get_status(&self, id: &ExperimentId) -> Result<ExperimentStatusReport, DomainError> {
        let experiment = self.with_experiment(id, |experiment| Ok(experiment.clone()))?;
        Ok(ExperimentStatusReport::new(experiment, self.clock.now()))
    }

    /// List experiments ordered by creation time
    pub fn list(&self, query: &ExperimentQuery) -> Result<Vec<Experiment>, DomainError> {
        let mut experiments = self
            .entries()?
            .into_iter()
            .map(|entry| lock(&entry).map(|experiment| experiment.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        experiments.retain(|experiment| query.matches(experiment));
        experiments.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().as_str().cmp(b.id().as_str()))
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(experiments.into_iter().skip(offset).take(limit).collect())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start collecting interactions (Planning -> Running)
    pub fn start(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        debug!(experiment_id = %id, "Starting experiment");

        let now = self.clock.now();
        let experiment = self.with_experiment(id, |experiment| {
            experiment.start(now).map_err(invalid_state)?;
            Ok(experiment.clone())
        })?;

        info!(experiment_id = %id, "Experiment started");
        self.persistence.save_experiment(experiment.clone());
        Ok(experiment)
    }

    /// Pause a running experiment
    pub fn pause(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        debug!(experiment_id = %id, "Pausing experiment");

        let experiment = self.with_experiment(id, |experiment| {
            experiment.pause().map_err(invalid_state)?;
            Ok(experiment.clone())
        })?;

        info!(experiment_id = %id, "Experiment paused");
        self.persistence.save_experiment(experiment.clone());
        Ok(experiment)
    }

    /// Resume a paused experiment
    pub fn resume(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        debug!(experiment_id = %id, "Resuming experiment");

        let experiment = self.with_experiment(id, |experiment| {
            experiment.resume().map_err(invalid_state)?;
            Ok(experiment.clone())
        })?;

        info!(experiment_id = %id, "Experiment resumed");
        self.persistence.save_experiment(experiment.clone());
        Ok(experiment)
    }

    /// Stop a running or paused experiment
    ///
    /// `Cancelled` discards the results. Every other reason runs a final
    /// significance evaluation on the frozen counters and extracts findings.
    pub fn stop(&self, id: &ExperimentId, reason: StopReason) -> Result<Experiment, DomainError> {
        debug!(experiment_id = %id, reason = %reason, "Stopping experiment");

        let now = self.clock.now();
        let completion = self.with_experiment(id, |experiment| {
            if experiment.status().is_terminal() {
                return Err(DomainError::invalid_state(format!(
                    "Experiment '{}' is already {}",
                    id,
                    experiment.status()
                )));
            }

            let evaluation = (reason != StopReason::Cancelled).then(|| {
                self.controller
                    .analyzer()
                    .analyze(&experiment.analysis_snapshot(), now)
            });
            self.complete_locked(experiment, reason, evaluation, now)
        })?;

        Ok(self.after_completion(completion, reason))
    }

    // ------------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------------

    /// Apply one visitor interaction to an arm of a running experiment
    pub async fn record_interaction(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
        event: InteractionEvent,
    ) -> Result<(), DomainError> {
        let now = self.clock.now();
        let persist = self.persistence.is_enabled();

        let variant = self.with_experiment(experiment_id, |experiment| {
            let variant = experiment.record_interaction(variant_id, &event, now)?;
            Ok(persist.then(|| variant.clone()))
        })?;

        observability::record_interaction(event.converted);
        if let Some(variant) = variant {
            self.persistence.save_variant(experiment_id.clone(), variant);
        }

        match self.config.early_stop_dispatch {
            EarlyStopDispatch::Background if task::runtime_available() => {
                let registry = self.clone();
                let experiment_id = experiment_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = registry.check_early_stop(&experiment_id).await {
                        warn!(experiment_id = %experiment_id, error = %e, "Early-stop check failed");
                    }
                });
            }
            // Off a tokio runtime the check runs on the caller's executor
            EarlyStopDispatch::Background | EarlyStopDispatch::Inline => {
                self.check_early_stop(experiment_id).await?;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Early stopping
    // ------------------------------------------------------------------------

    /// Evaluate the stopping rule for one experiment
    ///
    /// Returns the reason when this call completed the experiment.
    pub async fn check_early_stop(
        &self,
        id: &ExperimentId,
    ) -> Result<Option<StopReason>, DomainError> {
        let snapshot = self.with_experiment(id, |experiment| Ok(experiment.analysis_snapshot()))?;

        let now = self.clock.now();
        let decision = self.controller.evaluate(&snapshot, now);
        if let Some(evaluation) = &decision.evaluation {
            observability::record_evaluation(evaluation);
        }

        let Some(reason) = decision.stop else {
            if let Some(evaluation) = decision.evaluation {
                self.with_experiment(id, |experiment| {
                    if !experiment.status().is_running() {
                        return Ok(());
                    }
                    if experiment.supersedes(&evaluation) {
                        debug!(experiment_id = %id, "Discarding stale evaluation");
                        return Ok(());
                    }
                    experiment.apply_significance(evaluation);
                    Ok(())
                })?;
            }
            return Ok(None);
        };

        let completion = self.with_experiment(id, |experiment| {
            // Another check or a manual stop may have won the race
            if !experiment.status().is_running() {
                return Ok(None);
            }
            self.complete_locked(experiment, reason, decision.evaluation, now)
                .map(Some)
        })?;

        Ok(completion.map(|completion| {
            self.after_completion(completion, reason);
            reason
        }))
    }

    /// Run the early-stop check on every running experiment
    pub async fn check_all(&self) -> Result<Vec<(ExperimentId, StopReason)>, DomainError> {
        let running: Vec<ExperimentId> = self
            .list(&ExperimentQuery::new().with_status(ExperimentStatus::Running))?
            .iter()
            .map(|experiment| experiment.id().clone())
            .collect();

        let results = join_all(running.iter().map(|id| self.check_early_stop(id))).await;

        let mut stopped = Vec::new();
        for (id, result) in running.into_iter().zip(results) {
            match result {
                Ok(Some(reason)) => stopped.push((id, reason)),
                Ok(None) => {}
                Err(e) => {
                    warn!(experiment_id = %id, error = %e, "Early-stop check failed");
                }
            }
        }

        debug!(stopped = stopped.len(), "Early-stop sweep finished");
        Ok(stopped)
    }

    /// Periodically sweep running experiments until the handle is aborted
    ///
    /// Fails with `Internal` when called outside a tokio runtime.
    pub fn spawn_scheduler(&self, interval: Duration) -> Result<JoinHandle<()>, DomainError> {
        let registry = self.clone();

        task::spawn_detached("early_stop_scheduler", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = registry.check_all().await {
                    warn!(error = %e, "Scheduled early-stop sweep failed");
                }
            }
        })
        .ok_or_else(|| DomainError::internal("Early-stop scheduler requires a tokio runtime"))
    }

    // ------------------------------------------------------------------------
    // Learning
    // ------------------------------------------------------------------------

    /// Aggregate view over completed experiments and learned patterns
    pub fn get_learning_summary(&self) -> Result<LearningSummary, DomainError> {
        let completed = self.list(&ExperimentQuery::new().with_status(ExperimentStatus::Completed))?;
        let successful = completed
            .iter()
            .filter(|experiment| experiment.statistical_significance())
            .count();

        let records = self.store.list()?;
        let improvements: Vec<f64> = records
            .iter()
            .map(|record| record.improvement)
            .filter(|improvement| *improvement > 0.0)
            .collect();

        let average_improvement = if improvements.is_empty() {
            0.0
        } else {
            improvements.iter().sum::<f64>() / improvements.len() as f64
        };

        let success_rate = if completed.is_empty() {
            0.0
        } else {
            successful as f64 / completed.len() as f64
        };

        let mut top_insights = insight_frequencies(&records);
        top_insights.truncate(TOP_INSIGHTS);

        Ok(LearningSummary {
            total_experiments_completed: completed.len(),
            successful_experiments: successful,
            success_rate,
            average_improvement,
            total_learning_records: records.len(),
            top_insights,
            model_performance: self.recommender.model_performance(),
        })
    }

    /// Suggest changes for a variant from what worked for `target_metric`
    pub async fn get_optimization_recommendations(
        &self,
        variant: &Variant,
        target_metric: MetricKind,
    ) -> Result<OptimizationRecommendations, DomainError> {
        debug!(variant_id = %variant.id(), metric = %target_metric, "Building recommendations");
        self.recommender.recommend(variant, target_metric).await
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn entries(&self) -> Result<Vec<Arc<Mutex<Experiment>>>, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(experiments.values().cloned().collect())
    }

    /// Run `f` while holding the experiment's lock
    fn with_experiment<T>(
        &self,
        id: &ExperimentId,
        f: impl FnOnce(&mut Experiment) -> Result<T, DomainError>,
    ) -> Result<T, DomainError> {
        let entry = {
            let experiments = self.experiments.read().map_err(|e| {
                DomainError::internal(format!("Failed to acquire read lock: {}", e))
            })?;
            experiments
                .get(id)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("Experiment '{}' not found", id)))?
        };

        let mut experiment = lock(&entry)?;
        f(&mut experiment)
    }

    /// Move an experiment to its terminal state and extract findings
    ///
    /// Must be called with the experiment's lock held.
    fn complete_locked(
        &self,
        experiment: &mut Experiment,
        reason: StopReason,
        evaluation: Option<SignificanceResult>,
        now: DateTime<Utc>,
    ) -> Result<Completion, DomainError> {
        experiment.finish(reason, now).map_err(invalid_state)?;

        if reason == StopReason::Cancelled {
            return Ok(Completion {
                experiment: experiment.clone(),
                learning_record: None,
            });
        }

        if let Some(evaluation) = evaluation {
            experiment.apply_significance(evaluation);
        }

        let findings = self.extractor.extract(experiment, now);
        experiment.set_findings(findings.insights, findings.recommendations);

        Ok(Completion {
            experiment: experiment.clone(),
            learning_record: findings.learning_record,
        })
    }

    /// Side effects of a completion, run after the lock is released
    fn after_completion(&self, completion: Completion, reason: StopReason) -> Experiment {
        let Completion {
            experiment,
            learning_record,
        } = completion;
        let metric = experiment.primary_metric();

        observability::record_completion(reason, metric);

        if let Some(record) = learning_record {
            match self.store.append(record.clone()) {
                Ok(()) => {
                    observability::record_learning_record(metric);
                    self.persistence.save_learning_record(record);
                }
                Err(e) => {
                    warn!(experiment_id = %experiment.id(), error = %e, "Failed to store learning record");
                }
            }
            self.recommender.spawn_retrain(training_samples(&experiment));
        }

        info!(
            experiment_id = %experiment.id(),
            status = %experiment.status(),
            reason = %reason,
            significant = experiment.statistical_significance(),
            winner = experiment.winner_variant_id().map(|v| v.as_str()).unwrap_or("none"),
            "Experiment completed"
        );

        self.persistence.save_experiment(experiment.clone());
        experiment
    }
}

fn lock(
    entry: &Mutex<Experiment>,
) -> Result<std::sync::MutexGuard<'_, Experiment>, DomainError> {
    entry
        .lock()
        .map_err(|e| DomainError::internal(format!("Failed to acquire experiment lock: {}", e)))
}

/// One labeled sample per arm of a completed experiment
fn training_samples(experiment: &Experiment) -> Vec<TrainingSample> {
    let metric = experiment.primary_metric();
    let winner = experiment.winner_variant_id();

    experiment
        .variants()
        .map(|variant| TrainingSample {
            features: FeatureVector::from_variant(variant),
            metric,
            outcome: variant.metric_value(metric),
            won: winner == Some(variant.id()),
        })
        .collect()
}

fn validation(e: ExperimentValidationError) -> DomainError {
    DomainError::validation(e.to_string())
}

fn invalid_state(e: ExperimentValidationError) -> DomainError {
    DomainError::invalid_state(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{ContinuousMetric, MockPredictiveModel, PatternType};
    use crate::domain::ManualClock;
    use crate::infrastructure::experiment::{RecommendationSource, FALLBACK_MESSAGE};
    use crate::infrastructure::persistence::InMemoryPersistence;
    use chrono::Duration as ChronoDuration;

    fn start_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn create_registry() -> (ExperimentRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_time()));
        let registry = ExperimentRegistry::new(
            RegistryConfig::default().with_early_stop_dispatch(EarlyStopDispatch::Inline),
        )
        .with_clock(clock.clone());
        (registry, clock)
    }

    fn create_valid_request() -> CreateExperimentRequest {
        CreateExperimentRequest {
            name: "Headline test".to_string(),
            description: Some("Does a bolder headline convert better?".to_string()),
            control: CreateVariantRequest::new("control", "Control", 0.5)
                .with_payload_entry("headline", "Welcome"),
            treatments: vec![CreateVariantRequest::new("bold", "Bold", 0.5)
                .with_payload_entry("headline", "Start saving today")],
            ..Default::default()
        }
    }

    fn vid(id: &str) -> VariantId {
        VariantId::new(id).unwrap()
    }

    async fn record_arm(
        registry: &ExperimentRegistry,
        id: &ExperimentId,
        variant: &str,
        visitors: u64,
        conversions: u64,
    ) {
        let variant = vid(variant);
        for i in 0..visitors {
            registry
                .record_interaction(id, &variant, InteractionEvent::new(i < conversions))
                .await
                .unwrap();
        }
    }

    /// Running experiment that will not stop on its own
    fn running_experiment(registry: &ExperimentRegistry) -> ExperimentId {
        let id = registry
            .create(CreateExperimentRequest {
                minimum_sample_size: Some(1_000_000),
                ..create_valid_request()
            })
            .unwrap();
        registry.start(&id).unwrap();
        id
    }

    mod create {
        use super::*;

        #[test]
        fn test_create_plans_sample_size() {
            let (registry, _) = create_registry();
            let id = registry.create(create_valid_request()).unwrap();

            let status = registry.get_status(&id).unwrap();
            assert!(id.as_str().starts_with("exp-"));
            assert_eq!(status.experiment.status(), ExperimentStatus::Planning);
            assert_eq!(status.experiment.minimum_sample_size(), 3839 * 2);
            assert_eq!(status.experiment.minimum_duration_days(), 7);
            assert_eq!(status.experiment.maximum_duration_days(), 30);
        }

        #[test]
        fn test_create_applies_per_arm_floor() {
            let (registry, _) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_detectable_effect: 1.0,
                    baseline_rate: 0.3,
                    ..create_valid_request()
                })
                .unwrap();

            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.minimum_sample_size(), 2000);
        }

        #[test]
        fn test_create_with_override() {
            let (registry, _) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_sample_size: Some(500),
                    ..create_valid_request()
                })
                .unwrap();

            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.minimum_sample_size(), 500);
        }

        #[test]
        fn test_create_rejects_override_below_floor() {
            let (registry, _) = create_registry();
            let err = registry
                .create(CreateExperimentRequest {
                    minimum_sample_size: Some(99),
                    ..create_valid_request()
                })
                .unwrap_err();
            assert!(err.is_validation());
        }

        #[test]
        fn test_create_rejects_bad_traffic_sum() {
            let (registry, _) = create_registry();
            let mut request = create_valid_request();
            request.treatments[0].traffic_allocation = 0.6;

            let err = registry.create(request).unwrap_err();
            assert!(err.is_validation());
            assert!(err.to_string().contains("sum"));
        }

        #[test]
        fn test_create_accepts_traffic_within_tolerance() {
            let (registry, _) = create_registry();
            let mut request = create_valid_request();
            request.treatments[0].traffic_allocation = 0.51;

            assert!(registry.create(request).is_ok());
        }

        #[test]
        fn test_create_rejects_invalid_requests() {
            let (registry, _) = create_registry();

            let cases = vec![
                CreateExperimentRequest {
                    name: "  ".to_string(),
                    ..create_valid_request()
                },
                CreateExperimentRequest {
                    treatments: vec![],
                    control: CreateVariantRequest::new("control", "Control", 1.0),
                    ..create_valid_request()
                },
                CreateExperimentRequest {
                    treatments: vec![CreateVariantRequest::new("control", "Dup", 0.5)],
                    ..create_valid_request()
                },
                CreateExperimentRequest {
                    treatments: vec![CreateVariantRequest::new("Bad Id", "Bad", 0.5)],
                    ..create_valid_request()
                },
                CreateExperimentRequest {
                    significance_level: 1.5,
                    ..create_valid_request()
                },
                CreateExperimentRequest {
                    power: 0.0,
                    ..create_valid_request()
                },
                CreateExperimentRequest {
                    baseline_rate: 1.0,
                    ..create_valid_request()
                },
                CreateExperimentRequest {
                    minimum_detectable_effect: 0.0,
                    ..create_valid_request()
                },
                CreateExperimentRequest {
                    minimum_duration_days: 0,
                    ..create_valid_request()
                },
                CreateExperimentRequest {
                    minimum_duration_days: 10,
                    maximum_duration_days: 5,
                    ..create_valid_request()
                },
            ];

            for request in cases {
                let name = request.name.clone();
                let err = registry.create(request).unwrap_err();
                assert!(err.is_validation(), "expected validation error for {:?}", name);
            }

            assert!(registry.list(&ExperimentQuery::new()).unwrap().is_empty());
        }

        #[test]
        fn test_get_status_unknown_experiment() {
            let (registry, _) = create_registry();
            let err = registry
                .get_status(&ExperimentId::new("exp-missing").unwrap())
                .unwrap_err();
            assert!(err.is_not_found());
        }

        #[test]
        fn test_list_filters_and_paginates() {
            let (registry, clock) = create_registry();

            let mut ids = Vec::new();
            for _ in 0..4 {
                ids.push(registry.create(create_valid_request()).unwrap());
                clock.advance(ChronoDuration::seconds(1));
            }
            registry.start(&ids[1]).unwrap();
            registry.start(&ids[3]).unwrap();

            let all = registry.list(&ExperimentQuery::new()).unwrap();
            assert_eq!(all.len(), 4);
            assert_eq!(all[0].id(), &ids[0]);

            let running = registry
                .list(&ExperimentQuery::new().with_status(ExperimentStatus::Running))
                .unwrap();
            assert_eq!(running.len(), 2);

            let page = registry
                .list(&ExperimentQuery::new().with_offset(1).with_limit(2))
                .unwrap();
            assert_eq!(page.len(), 2);
            assert_eq!(page[0].id(), &ids[1]);
            assert_eq!(page[1].id(), &ids[2]);
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn test_start_pause_resume() {
            let (registry, _) = create_registry();
            let id = registry.create(create_valid_request()).unwrap();

            let started = registry.start(&id).unwrap();
            assert_eq!(started.status(), ExperimentStatus::Running);
            assert_eq!(started.started_at(), Some(start_time()));

            assert_eq!(registry.pause(&id).unwrap().status(), ExperimentStatus::Paused);
            assert_eq!(registry.resume(&id).unwrap().status(), ExperimentStatus::Running);
        }

        #[test]
        fn test_invalid_transitions() {
            let (registry, _) = create_registry();
            let id = registry.create(create_valid_request()).unwrap();

            assert!(registry.pause(&id).unwrap_err().is_invalid_state());
            assert!(registry.resume(&id).unwrap_err().is_invalid_state());
            assert!(registry
                .stop(&id, StopReason::Manual)
                .unwrap_err()
                .is_invalid_state());

            registry.start(&id).unwrap();
            assert!(registry.start(&id).unwrap_err().is_invalid_state());
        }

        #[tokio::test]
        async fn test_resume_from_planning_fails_and_duration_still_counts() {
            let (registry, clock) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_duration_days: 1,
                    maximum_duration_days: 10,
                    ..create_valid_request()
                })
                .unwrap();

            assert!(registry.resume(&id).unwrap_err().is_invalid_state());
            let status = registry.get_status(&id).unwrap();
            assert_eq!(status.experiment.status(), ExperimentStatus::Planning);
            assert!(status.experiment.started_at().is_none());

            registry.start(&id).unwrap();
            registry.pause(&id).unwrap();
            assert!(registry.start(&id).unwrap_err().is_invalid_state());
            registry.resume(&id).unwrap();

            clock.advance(ChronoDuration::days(100));
            registry.check_early_stop(&id).await.unwrap();

            let status = registry.get_status(&id).unwrap();
            assert_eq!(status.experiment.status(), ExperimentStatus::Completed);
            assert_eq!(
                status.experiment.stop_reason(),
                Some(StopReason::MaxDurationReached)
            );
        }

        #[test]
        fn test_start_on_completed_fails() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);

            registry.stop(&id, StopReason::Manual).unwrap();
            let err = registry.start(&id).unwrap_err();
            assert!(err.is_invalid_state());
        }

        #[test]
        fn test_second_stop_fails() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);

            registry.stop(&id, StopReason::Manual).unwrap();
            let err = registry.stop(&id, StopReason::Manual).unwrap_err();
            assert!(err.is_invalid_state());

            let err = registry.stop(&id, StopReason::Cancelled).unwrap_err();
            assert!(err.is_invalid_state());
        }

        #[test]
        fn test_stop_from_paused() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);
            registry.pause(&id).unwrap();

            let stopped = registry.stop(&id, StopReason::Manual).unwrap();
            assert_eq!(stopped.status(), ExperimentStatus::Completed);
        }

        #[tokio::test]
        async fn test_cancel_discards_results() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);
            record_arm(&registry, &id, "control", 1000, 100).await;
            record_arm(&registry, &id, "bold", 1000, 150).await;

            let cancelled = registry.stop(&id, StopReason::Cancelled).unwrap();
            assert_eq!(cancelled.status(), ExperimentStatus::Cancelled);
            assert_eq!(cancelled.stop_reason(), Some(StopReason::Cancelled));
            assert!(cancelled.significance().is_none());
            assert!(cancelled.winner().is_none());
            assert!(cancelled.insights().is_empty());
            assert!(registry.learning_store().is_empty().unwrap());
        }

        #[test]
        fn test_progress_in_status_report() {
            let (registry, clock) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_sample_size: Some(1000),
                    minimum_duration_days: 10,
                    ..create_valid_request()
                })
                .unwrap();
            registry.start(&id).unwrap();
            clock.advance(ChronoDuration::days(5));

            let status = registry.get_status(&id).unwrap();
            assert_eq!(status.elapsed_days, 5);
            assert!((status.progress.time - 0.5).abs() < 1e-9);
            assert_eq!(status.progress.visitors, 0.0);
            assert!((status.progress.overall - 0.5).abs() < 1e-9);
        }
    }

    mod interactions {
        use super::*;

        #[tokio::test]
        async fn test_record_updates_counters() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);

            registry
                .record_interaction(
                    &id,
                    &vid("bold"),
                    InteractionEvent::new(true)
                        .with_time_on_page(120.0)
                        .with_scroll_depth(0.8)
                        .with_revenue(25.0),
                )
                .await
                .unwrap();
            registry
                .record_interaction(&id, &vid("bold"), InteractionEvent::new(false))
                .await
                .unwrap();

            let experiment = registry.get_status(&id).unwrap().experiment;
            let bold = experiment.variant(&vid("bold")).unwrap();
            assert_eq!(bold.visitors(), 2);
            assert_eq!(bold.conversions(), 1);
            assert!((bold.conversion_rate() - 0.5).abs() < 1e-12);
            assert!((bold.time_on_page() - 120.0).abs() < 1e-12);
            assert!((bold.revenue_per_visitor() - 12.5).abs() < 1e-12);
            assert_eq!(experiment.control().visitors(), 0);
        }

        #[tokio::test]
        async fn test_record_rejected_outside_running() {
            let (registry, _) = create_registry();
            let id = registry.create(create_valid_request()).unwrap();

            let err = registry
                .record_interaction(&id, &vid("control"), InteractionEvent::new(true))
                .await
                .unwrap_err();
            assert!(err.is_invalid_state());

            registry.start(&id).unwrap();
            registry.pause(&id).unwrap();
            let err = registry
                .record_interaction(&id, &vid("control"), InteractionEvent::new(true))
                .await
                .unwrap_err();
            assert!(err.is_invalid_state());

            registry.stop(&id, StopReason::Manual).unwrap();
            let err = registry
                .record_interaction(&id, &vid("control"), InteractionEvent::new(true))
                .await
                .unwrap_err();
            assert!(err.is_invalid_state());

            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.total_visitors(), 0);
        }

        #[tokio::test]
        async fn test_record_unknown_ids() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);

            let err = registry
                .record_interaction(
                    &ExperimentId::new("exp-missing").unwrap(),
                    &vid("control"),
                    InteractionEvent::new(true),
                )
                .await
                .unwrap_err();
            assert!(err.is_not_found());

            let err = registry
                .record_interaction(&id, &vid("missing"), InteractionEvent::new(true))
                .await
                .unwrap_err();
            assert!(err.is_not_found());
        }

        #[tokio::test]
        async fn test_record_invalid_event() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);

            let err = registry
                .record_interaction(
                    &id,
                    &vid("control"),
                    InteractionEvent::new(false).with_time_on_page(-1.0),
                )
                .await
                .unwrap_err();
            assert!(err.is_validation());

            let err = registry
                .record_interaction(
                    &id,
                    &vid("control"),
                    InteractionEvent::new(false).with_revenue(f64::NAN),
                )
                .await
                .unwrap_err();
            assert!(err.is_validation());

            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.control().visitors(), 0);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_recording_loses_no_updates() {
            let registry = ExperimentRegistry::default();
            let id = running_experiment(&registry);

            let tasks: Vec<_> = (0..8)
                .map(|task| {
                    let registry = registry.clone();
                    let id = id.clone();
                    tokio::spawn(async move {
                        let variant = vid(if task % 2 == 0 { "control" } else { "bold" });
                        for i in 0..250 {
                            registry
                                .record_interaction(&id, &variant, InteractionEvent::new(i % 4 == 0))
                                .await
                                .unwrap();
                        }
                    })
                })
                .collect();

            for result in join_all(tasks).await {
                result.unwrap();
            }

            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.control().visitors(), 1000);
            assert_eq!(experiment.control().conversions(), 250);
            assert_eq!(experiment.treatments()[0].visitors(), 1000);
            assert_eq!(experiment.total_visitors(), 2000);
        }

        #[tokio::test]
        async fn test_continuous_metric_experiment() {
            let (registry, _) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    metric: MetricKind::continuous(ContinuousMetric::TimeOnPage),
                    minimum_sample_size: Some(1_000_000),
                    ..create_valid_request()
                })
                .unwrap();
            registry.start(&id).unwrap();

            for i in 0..200 {
                let jitter = (i % 10) as f64;
                registry
                    .record_interaction(
                        &id,
                        &vid("control"),
                        InteractionEvent::new(false).with_time_on_page(60.0 + jitter),
                    )
                    .await
                    .unwrap();
                registry
                    .record_interaction(
                        &id,
                        &vid("bold"),
                        InteractionEvent::new(false).with_time_on_page(90.0 + jitter),
                    )
                    .await
                    .unwrap();
            }

            let completed = registry.stop(&id, StopReason::Manual).unwrap();
            let significance = completed.significance().unwrap();
            assert!(significance.significant);
            assert_eq!(completed.winner().unwrap().id().as_str(), "bold");
        }
    }

    mod completion {
        use super::*;

        #[tokio::test]
        async fn test_significant_manual_stop_picks_winner() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);
            record_arm(&registry, &id, "control", 1000, 100).await;
            record_arm(&registry, &id, "bold", 1000, 150).await;

            let completed = registry.stop(&id, StopReason::Manual).unwrap();
            assert_eq!(completed.status(), ExperimentStatus::Completed);
            assert_eq!(completed.stop_reason(), Some(StopReason::Manual));
            assert!(completed.statistical_significance());
            assert!(completed.p_value().unwrap() < 0.01);
            assert_eq!(completed.winner().unwrap().id().as_str(), "bold");
            assert!(completed
                .insights()
                .iter()
                .any(|i| i.contains("improved conversion rate by 50.0%")));
            assert!(completed
                .recommendations()
                .iter()
                .any(|r| r == "Adopt variant Bold"));

            let records = registry.learning_store().list().unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].experiment_id, id);
            assert_eq!(records[0].pattern_type, PatternType::TreatmentWon);
            assert!((records[0].improvement - 0.5).abs() < 1e-9);
            assert!(records[0].context_tags.contains(&"headline".to_string()));
        }

        #[tokio::test]
        async fn test_non_significant_stop_creates_no_learning_record() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);
            record_arm(&registry, &id, "control", 500, 50).await;
            record_arm(&registry, &id, "bold", 500, 52).await;

            let completed = registry.stop(&id, StopReason::Manual).unwrap();
            assert_eq!(completed.status(), ExperimentStatus::Completed);
            assert!(!completed.statistical_significance());
            assert!(completed.winner().is_none());
            assert!(completed.significance().is_some());
            assert!(completed
                .insights()
                .iter()
                .any(|i| i.contains("not statistically significant")));
            assert!(registry.learning_store().is_empty().unwrap());
        }

        #[tokio::test]
        async fn test_stop_without_data_is_not_significant() {
            let (registry, _) = create_registry();
            let id = running_experiment(&registry);

            let completed = registry.stop(&id, StopReason::Manual).unwrap();
            let significance = completed.significance().unwrap();
            assert!(!significance.significant);
            assert_eq!(significance.p_value, 1.0);
            assert!(registry.learning_store().is_empty().unwrap());
        }

        #[tokio::test]
        async fn test_learning_summary() {
            let (registry, _) = create_registry();

            let winner = running_experiment(&registry);
            record_arm(&registry, &winner, "control", 1000, 100).await;
            record_arm(&registry, &winner, "bold", 1000, 150).await;
            registry.stop(&winner, StopReason::Manual).unwrap();

            let flat = running_experiment(&registry);
            record_arm(&registry, &flat, "control", 300, 30).await;
            record_arm(&registry, &flat, "bold", 300, 30).await;
            registry.stop(&flat, StopReason::Manual).unwrap();

            let cancelled = running_experiment(&registry);
            registry.stop(&cancelled, StopReason::Cancelled).unwrap();

            let summary = registry.get_learning_summary().unwrap();
            assert_eq!(summary.total_experiments_completed, 2);
            assert_eq!(summary.successful_experiments, 1);
            assert!((summary.success_rate - 0.5).abs() < 1e-12);
            assert_eq!(summary.total_learning_records, 1);
            assert!((summary.average_improvement - 0.5).abs() < 1e-9);
            assert_eq!(summary.top_insights.len(), 1);
            assert!(summary.top_insights[0].insight.contains("headline"));
            assert!(!summary.model_performance.configured);
        }

        #[test]
        fn test_learning_summary_empty() {
            let (registry, _) = create_registry();
            let summary = registry.get_learning_summary().unwrap();
            assert_eq!(summary.total_experiments_completed, 0);
            assert_eq!(summary.success_rate, 0.0);
            assert_eq!(summary.average_improvement, 0.0);
        }
    }

    mod early_stopping {
        use super::*;

        fn lopsided_request() -> CreateExperimentRequest {
            CreateExperimentRequest {
                minimum_sample_size: Some(1000),
                minimum_duration_days: 7,
                maximum_duration_days: 30,
                ..create_valid_request()
            }
        }

        #[tokio::test]
        async fn test_no_stop_before_minimum_duration() {
            let (registry, clock) = create_registry();
            let id = registry.create(lopsided_request()).unwrap();
            registry.start(&id).unwrap();

            clock.advance(ChronoDuration::days(6));
            record_arm(&registry, &id, "control", 1000, 50).await;
            record_arm(&registry, &id, "bold", 1000, 400).await;

            let status = registry.get_status(&id).unwrap();
            assert_eq!(status.experiment.status(), ExperimentStatus::Running);
            assert!(status.experiment.significance().is_none());

            clock.advance(ChronoDuration::days(1));
            registry
                .record_interaction(&id, &vid("control"), InteractionEvent::new(false))
                .await
                .unwrap();

            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.status(), ExperimentStatus::Completed);
            assert_eq!(experiment.stop_reason(), Some(StopReason::SignificanceReached));
            assert_eq!(experiment.winner().unwrap().id().as_str(), "bold");
            assert_eq!(registry.learning_store().len().unwrap(), 1);
        }

        #[tokio::test]
        async fn test_no_stop_before_minimum_sample() {
            let (registry, clock) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_sample_size: Some(5000),
                    ..lopsided_request()
                })
                .unwrap();
            registry.start(&id).unwrap();
            clock.advance(ChronoDuration::days(10));

            record_arm(&registry, &id, "control", 1000, 50).await;
            record_arm(&registry, &id, "bold", 1000, 400).await;

            assert_eq!(registry.check_early_stop(&id).await.unwrap(), None);
            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.status(), ExperimentStatus::Running);
        }

        #[tokio::test]
        async fn test_non_significant_evaluation_is_recorded() {
            let (registry, clock) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_sample_size: Some(200),
                    minimum_duration_days: 1,
                    ..create_valid_request()
                })
                .unwrap();
            registry.start(&id).unwrap();
            clock.advance(ChronoDuration::days(2));

            for i in 0..150 {
                let event = InteractionEvent::new(i % 10 == 0);
                registry
                    .record_interaction(&id, &vid("control"), event.clone())
                    .await
                    .unwrap();
                registry.record_interaction(&id, &vid("bold"), event).await.unwrap();
            }

            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.status(), ExperimentStatus::Running);
            let significance = experiment.significance().unwrap();
            assert!(!significance.significant);
            assert!(experiment.winner().is_none());
        }

        #[tokio::test]
        async fn test_late_check_does_not_overwrite_newer_evaluation() {
            let (registry, clock) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_sample_size: Some(200),
                    minimum_duration_days: 1,
                    ..create_valid_request()
                })
                .unwrap();
            registry.start(&id).unwrap();
            clock.advance(ChronoDuration::days(2));

            for i in 0..150 {
                let event = InteractionEvent::new(i % 10 == 0);
                registry
                    .record_interaction(&id, &vid("control"), event.clone())
                    .await
                    .unwrap();
                registry.record_interaction(&id, &vid("bold"), event).await.unwrap();
            }
            let newest = start_time() + ChronoDuration::days(2);
            let stored = registry.get_status(&id).unwrap().experiment;
            assert_eq!(stored.significance().unwrap().evaluated_at, newest);

            // A check that sampled the clock earlier finishes last
            clock.set(start_time() + ChronoDuration::days(1));
            assert_eq!(registry.check_early_stop(&id).await.unwrap(), None);

            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.status(), ExperimentStatus::Running);
            assert_eq!(experiment.significance().unwrap().evaluated_at, newest);
        }

        #[tokio::test]
        async fn test_forced_stop_at_maximum_duration() {
            let (registry, clock) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_sample_size: Some(1_000_000),
                    minimum_duration_days: 1,
                    maximum_duration_days: 3,
                    ..create_valid_request()
                })
                .unwrap();
            registry.start(&id).unwrap();
            record_arm(&registry, &id, "control", 50, 5).await;
            record_arm(&registry, &id, "bold", 50, 20).await;

            clock.advance(ChronoDuration::days(3) - ChronoDuration::seconds(1));
            assert_eq!(registry.check_early_stop(&id).await.unwrap(), None);

            clock.advance(ChronoDuration::seconds(1));
            assert_eq!(
                registry.check_early_stop(&id).await.unwrap(),
                Some(StopReason::MaxDurationReached)
            );

            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.status(), ExperimentStatus::Completed);
            assert_eq!(experiment.stop_reason(), Some(StopReason::MaxDurationReached));
            assert!(experiment.winner().is_none());
            assert!(registry.learning_store().is_empty().unwrap());

            // Completion happens exactly once
            assert_eq!(registry.check_early_stop(&id).await.unwrap(), None);
        }

        #[tokio::test]
        async fn test_paused_experiment_is_not_stopped() {
            let (registry, clock) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_duration_days: 1,
                    maximum_duration_days: 2,
                    ..create_valid_request()
                })
                .unwrap();
            registry.start(&id).unwrap();
            registry.pause(&id).unwrap();
            clock.advance(ChronoDuration::days(5));

            assert_eq!(registry.check_early_stop(&id).await.unwrap(), None);
            let experiment = registry.get_status(&id).unwrap().experiment;
            assert_eq!(experiment.status(), ExperimentStatus::Paused);
        }

        #[tokio::test]
        async fn test_check_all_stops_expired_experiments() {
            let (registry, clock) = create_registry();
            let expiring = registry
                .create(CreateExperimentRequest {
                    minimum_sample_size: Some(1_000_000),
                    minimum_duration_days: 1,
                    maximum_duration_days: 2,
                    ..create_valid_request()
                })
                .unwrap();
            registry.start(&expiring).unwrap();
            let long_running = running_experiment(&registry);

            clock.advance(ChronoDuration::days(2));
            let stopped = registry.check_all().await.unwrap();

            assert_eq!(stopped, vec![(expiring.clone(), StopReason::MaxDurationReached)]);
            let experiment = registry.get_status(&long_running).unwrap().experiment;
            assert_eq!(experiment.status(), ExperimentStatus::Running);
        }

        #[tokio::test]
        async fn test_scheduler_sweeps_periodically() {
            let (registry, clock) = create_registry();
            let id = registry
                .create(CreateExperimentRequest {
                    minimum_sample_size: Some(1_000_000),
                    minimum_duration_days: 1,
                    maximum_duration_days: 1,
                    ..create_valid_request()
                })
                .unwrap();
            registry.start(&id).unwrap();
            clock.advance(ChronoDuration::days(1));

            let handle = registry.spawn_scheduler(Duration::from_millis(10)).unwrap();
            let mut status = ExperimentStatus::Running;
            for _ in 0..100 {
                status = registry.get_status(&id).unwrap().experiment.status();
                if status == ExperimentStatus::Completed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            handle.abort();

            assert_eq!(status, ExperimentStatus::Completed);
        }

        #[tokio::test]
        async fn test_background_dispatch_stops_experiment() {
            let clock = Arc::new(ManualClock::new(start_time()));
            let registry = ExperimentRegistry::new(RegistryConfig::default()).with_clock(clock.clone());
            let id = registry.create(lopsided_request()).unwrap();
            registry.start(&id).unwrap();

            record_arm(&registry, &id, "control", 600, 30).await;
            record_arm(&registry, &id, "bold", 600, 240).await;

            clock.advance(ChronoDuration::days(8));
            registry
                .record_interaction(&id, &vid("control"), InteractionEvent::new(false))
                .await
                .unwrap();

            let mut status = ExperimentStatus::Running;
            for _ in 0..100 {
                status = registry.get_status(&id).unwrap().experiment.status();
                if status == ExperimentStatus::Completed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            assert_eq!(status, ExperimentStatus::Completed);
            assert_eq!(registry.learning_store().len().unwrap(), 1);
        }
    }

    mod collaborators {
        use super::*;

        #[tokio::test]
        async fn test_persistence_mirrors_changes() {
            let persistence = Arc::new(InMemoryPersistence::new());
            let (registry, _) = create_registry();
            let registry = registry.with_persistence(persistence.clone());

            let id = running_experiment(&registry);
            record_arm(&registry, &id, "control", 1000, 100).await;
            record_arm(&registry, &id, "bold", 1000, 150).await;
            registry.stop(&id, StopReason::Manual).unwrap();

            let mut saved = None;
            for _ in 0..100 {
                saved = persistence.experiment(&id).unwrap();
                let done = saved
                    .as_ref()
                    .is_some_and(|e| e.status() == ExperimentStatus::Completed)
                    && !persistence.learning_records().unwrap().is_empty();
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            assert_eq!(saved.unwrap().status(), ExperimentStatus::Completed);
            assert_eq!(persistence.learning_records().unwrap().len(), 1);
            assert!(persistence.variant(&id, &vid("bold")).unwrap().is_some());
        }

        #[test]
        fn test_lifecycle_with_collaborators_outside_runtime() {
            let persistence = Arc::new(InMemoryPersistence::new());
            let clock = Arc::new(ManualClock::new(start_time()));
            let registry = ExperimentRegistry::new(RegistryConfig::default())
                .with_clock(clock.clone())
                .with_persistence(persistence.clone())
                .with_model(Arc::new(MockPredictiveModel::new()));

            let id = running_experiment(&registry);
            registry.pause(&id).unwrap();
            registry.resume(&id).unwrap();

            futures::executor::block_on(async {
                record_arm(&registry, &id, "control", 1000, 100).await;
                record_arm(&registry, &id, "bold", 1000, 150).await;
            });

            let stopped = registry.stop(&id, StopReason::Manual).unwrap();
            assert_eq!(stopped.status(), ExperimentStatus::Completed);
            assert_eq!(stopped.winner().unwrap().id().as_str(), "bold");
            assert_eq!(registry.learning_store().len().unwrap(), 1);

            // Saves are skipped without a runtime
            assert!(persistence.experiment(&id).unwrap().is_none());
        }

        #[test]
        fn test_scheduler_requires_runtime() {
            let registry = ExperimentRegistry::default();
            let err = registry.spawn_scheduler(Duration::from_secs(1)).unwrap_err();
            assert!(err.to_string().contains("tokio runtime"));
        }

        #[tokio::test]
        async fn test_recommendations_from_learned_patterns() {
            let (registry, _) = create_registry();

            for _ in 0..2 {
                let id = running_experiment(&registry);
                record_arm(&registry, &id, "control", 1000, 100).await;
                record_arm(&registry, &id, "bold", 1000, 150).await;
                registry.stop(&id, StopReason::Manual).unwrap();
            }

            let variant = Variant::new(vid("candidate"), "Candidate", 1.0);
            let result = registry
                .get_optimization_recommendations(&variant, MetricKind::Proportion)
                .await
                .unwrap();

            assert_eq!(result.recommendations.len(), 1);
            let recommendation = &result.recommendations[0];
            assert_eq!(recommendation.source, RecommendationSource::LearnedPattern);
            assert_eq!(recommendation.occurrences, Some(2));
            assert!(recommendation.text.starts_with("Consider: changed `headline`"));
            assert!(recommendation.text.ends_with("(successful in 2 tests)"));
            assert!(!result.prediction.is_available());
        }

        #[tokio::test]
        async fn test_recommendations_fall_back_when_model_fails() {
            let mut model = MockPredictiveModel::new();
            model
                .expect_predict()
                .returning(|_| Err(DomainError::prediction("model offline")));

            let (registry, _) = create_registry();
            let registry = registry.with_model(Arc::new(model));

            let variant = Variant::new(vid("candidate"), "Candidate", 1.0);
            let result = registry
                .get_optimization_recommendations(&variant, MetricKind::Proportion)
                .await
                .unwrap();

            assert_eq!(result.texts(), vec![FALLBACK_MESSAGE]);
            assert_eq!(result.prediction.confidence, 0.0);
        }

        #[tokio::test]
        async fn test_significant_completion_retrains_model() {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let mut model = MockPredictiveModel::new();
            model.expect_retrain().times(1).returning(move |samples| {
                let _ = tx.send(samples.to_vec());
                Ok(())
            });

            let (registry, _) = create_registry();
            let registry = registry.with_model(Arc::new(model));

            let id = running_experiment(&registry);
            record_arm(&registry, &id, "control", 1000, 100).await;
            record_arm(&registry, &id, "bold", 1000, 150).await;
            registry.stop(&id, StopReason::Manual).unwrap();

            let samples = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(samples.len(), 2);
            assert_eq!(samples.iter().filter(|s| s.won).count(), 1);

            let summary = registry.get_learning_summary().unwrap();
            assert!(summary.model_performance.configured);
            assert_eq!(summary.model_performance.training_samples_submitted, 2);
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            #[test]
            fn prop_no_stop_before_minimum_duration(
                control_rate in 0.0f64..0.2,
                treatment_rate in 0.5f64..1.0,
                days in 0i64..7,
            ) {
                let (registry, clock) = create_registry();
                let id = registry
                    .create(CreateExperimentRequest {
                        minimum_sample_size: Some(100),
                        minimum_duration_days: 7,
                        ..create_valid_request()
                    })
                    .unwrap();
                registry.start(&id).unwrap();
                clock.advance(ChronoDuration::days(days));

                let control_conversions = (300.0 * control_rate) as u64;
                let treatment_conversions = (300.0 * treatment_rate) as u64;
                tokio_test::block_on(async {
                    record_arm(&registry, &id, "control", 300, control_conversions).await;
                    record_arm(&registry, &id, "bold", 300, treatment_conversions).await;
                });

                let experiment = registry.get_status(&id).unwrap().experiment;
                prop_assert_eq!(experiment.status(), ExperimentStatus::Running);
                prop_assert_eq!(experiment.total_visitors(), 600);
            }
        }
    }
}
