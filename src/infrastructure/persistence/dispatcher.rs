//! Fire-and-forget persistence with exponential backoff

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::experiment::{
    Experiment, ExperimentId, LearningRecord, PersistenceCollaborator, Variant,
};
use crate::domain::{DomainError, RetryConfig};
use crate::infrastructure::{observability, task};

/// Mirrors in-memory state to a persistence collaborator
///
/// Every save runs on its own task and never blocks or fails the caller.
/// Outside a tokio runtime saves are skipped with a warning.
/// A save that still fails after the retry schedule is logged and dropped.
#[derive(Clone)]
pub struct PersistenceDispatcher {
    collaborator: Option<Arc<dyn PersistenceCollaborator>>,
    retry: RetryConfig,
}

impl std::fmt::Debug for PersistenceDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceDispatcher")
            .field("enabled", &self.collaborator.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

impl Default for PersistenceDispatcher {
    fn default() -> Self {
        Self::disabled()
    }
}

impl PersistenceDispatcher {
    pub fn new(collaborator: Arc<dyn PersistenceCollaborator>, retry: RetryConfig) -> Self {
        Self {
            collaborator: Some(collaborator),
            retry,
        }
    }

    /// Dispatcher that drops every save
    pub fn disabled() -> Self {
        Self {
            collaborator: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.collaborator.is_some()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn save_experiment(&self, experiment: Experiment) -> Option<JoinHandle<()>> {
        let experiment = Arc::new(experiment);
        self.dispatch("save_experiment", move |collaborator| {
            let experiment = Arc::clone(&experiment);
            async move { collaborator.save_experiment(&experiment).await }
        })
    }

    pub fn save_variant(
        &self,
        experiment_id: ExperimentId,
        variant: Variant,
    ) -> Option<JoinHandle<()>> {
        let payload = Arc::new((experiment_id, variant));
        self.dispatch("save_variant", move |collaborator| {
            let payload = Arc::clone(&payload);
            async move { collaborator.save_variant(&payload.0, &payload.1).await }
        })
    }

    pub fn save_learning_record(&self, record: LearningRecord) -> Option<JoinHandle<()>> {
        let record = Arc::new(record);
        self.dispatch("save_learning_record", move |collaborator| {
            let record = Arc::clone(&record);
            async move { collaborator.save_learning_record(&record).await }
        })
    }

    fn dispatch<F, Fut>(&self, operation: &'static str, call: F) -> Option<JoinHandle<()>>
    where
        F: Fn(Arc<dyn PersistenceCollaborator>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DomainError>> + Send + 'static,
    {
        let collaborator = self.collaborator.clone()?;
        let retry = self.retry.clone();

        task::spawn_detached("persistence", async move {
            let max_attempts = retry.max_retries + 1;
            let mut last_error = None;

            for attempt in 0..max_attempts {
                if attempt > 0 {
                    let delay = retry.delay_for_attempt(attempt - 1);
                    tokio::time::sleep(delay).await;
                }

                match call(Arc::clone(&collaborator)).await {
                    Ok(()) => {
                        debug!(operation, attempts = attempt + 1, "Persistence call succeeded");
                        return;
                    }
                    Err(e) => {
                        debug!(operation, attempt, error = %e, "Persistence call failed");
                        last_error = Some(e);
                    }
                }
            }

            observability::record_persistence_failure(operation);
            warn!(
                operation,
                attempts = max_attempts,
                error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
                "Persistence call failed after all retries"
            );
        })
    }
}
