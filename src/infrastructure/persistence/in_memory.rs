//! In-memory persistence collaborator

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::experiment::{
    Experiment, ExperimentId, LearningRecord, PersistenceCollaborator, Variant, VariantId,
};
use crate::domain::DomainError;

/// Keeps the latest saved copy of everything in process memory
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    experiments: RwLock<HashMap<ExperimentId, Experiment>>,
    variants: RwLock<HashMap<(ExperimentId, VariantId), Variant>>,
    learning_records: RwLock<Vec<LearningRecord>>,
}

impl InMemoryPersistence {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest saved copy of an experiment
    pub fn experiment(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(experiments.get(id).cloned())
    }

    /// Latest saved copy of a variant
    pub fn variant(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<Option<Variant>, DomainError> {
        let variants = self
            .variants
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(variants
            .get(&(experiment_id.clone(), variant_id.clone()))
            .cloned())
    }

    /// All saved learning records in save order
    pub fn learning_records(&self) -> Result<Vec<LearningRecord>, DomainError> {
        let records = self
            .learning_records
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(records.clone())
    }
}

#[async_trait]
impl PersistenceCollaborator for InMemoryPersistence {
    async fn save_experiment(&self, experiment: &Experiment) -> Result<(), DomainError> {
        let mut experiments = self
            .experiments
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        experiments.insert(experiment.id().clone(), experiment.clone());
        Ok(())
    }

    async fn save_variant(
        &self,
        experiment_id: &ExperimentId,
        variant: &Variant,
    ) -> Result<(), DomainError> {
        let mut variants = self
            .variants
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        variants.insert((experiment_id.clone(), variant.id().clone()), variant.clone());
        Ok(())
    }

    async fn save_learning_record(&self, record: &LearningRecord) -> Result<(), DomainError> {
        let mut records = self
            .learning_records
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        if !records.iter().any(|r| r.id == record.id) {
            records.push(record.clone());
        }
        Ok(())
    }
}
