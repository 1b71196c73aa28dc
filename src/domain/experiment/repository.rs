//! Persistence collaborator trait and query types

use async_trait::async_trait;

use super::entity::{Experiment, ExperimentId, ExperimentStatus};
use super::learning::LearningRecord;
use super::variant::Variant;
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

// ============================================================================
// ExperimentQuery
// ============================================================================

/// Query parameters for listing experiments
#[derive(Debug, Clone, Default)]
pub struct ExperimentQuery {
    /// Filter by status
    pub status: Option<ExperimentStatus>,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Number of results to skip
    pub offset: Option<usize>,
}

impl ExperimentQuery {
    /// Create a new query with no filters
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by status
    pub fn with_status(mut self, status: ExperimentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set maximum number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set number of results to skip
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Check if an experiment passes the filters
    pub fn matches(&self, experiment: &Experiment) -> bool {
        self.status.is_none_or(|status| experiment.status() == status)
    }
}

// ============================================================================
// PersistenceCollaborator
// ============================================================================

/// Durable storage for experiments, variants and learning records
///
/// The engine keeps its working state in memory and mirrors it here; a
/// failed save never rolls back in-memory state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PersistenceCollaborator: Send + Sync {
    /// Save the full experiment, including its variants
    async fn save_experiment(&self, experiment: &Experiment) -> Result<(), DomainError>;

    /// Save a single variant after its counters changed
    async fn save_variant(
        &self,
        experiment_id: &ExperimentId,
        variant: &Variant,
    ) -> Result<(), DomainError>;

    /// Save a newly created learning record
    async fn save_learning_record(&self, record: &LearningRecord) -> Result<(), DomainError>;
}
