//! Append-only in-memory store of learning records

use std::sync::RwLock;

use crate::domain::experiment::{LearningRecord, MetricKind};
use crate::domain::DomainError;

/// In-memory learning store; records are kept in insertion order
#[derive(Debug, Default)]
pub struct InMemoryLearningStore {
    records: RwLock<Vec<LearningRecord>>,
}

impl InMemoryLearningStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record
    pub fn append(&self, record: LearningRecord) -> Result<(), DomainError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        records.push(record);
        Ok(())
    }

    /// All records, oldest first
    pub fn list(&self) -> Result<Vec<LearningRecord>, DomainError> {
        let records = self
            .records
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(records.clone())
    }

    pub fn len(&self) -> Result<usize, DomainError> {
        let records = self
            .records
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(records.len())
    }

    pub fn is_empty(&self) -> Result<bool, DomainError> {
        Ok(self.len()? == 0)
    }

    /// Most recent `limit` records learned on `metric` whose improvement
    /// exceeds `min_improvement`, oldest first
    pub fn recent_successful(
        &self,
        metric: MetricKind,
        min_improvement: f64,
        limit: usize,
    ) -> Result<Vec<LearningRecord>, DomainError> {
        let records = self
            .records
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        let mut matching: Vec<LearningRecord> = records
            .iter()
            .rev()
            .filter(|r| r.metric == metric && r.improvement > min_improvement)
            .take(limit)
            .cloned()
            .collect();
        matching.reverse();

        Ok(matching)
    }
}
