//! Record store collaborator: cached results keyed by job id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::core::{JobId, UsageMetadata};
use crate::errors::CollaboratorError;

/// A persisted job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Key.
    pub job_id: JobId,
    /// Normalised output.
    pub output: serde_json::Value,
    /// Usage metadata from the run that produced the output.
    #[serde(default)]
    pub usage: UsageMetadata,
    /// Tier that produced the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(job_id: JobId, output: serde_json::Value, usage: UsageMetadata) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            output,
            usage,
            tier: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the tier.
    #[must_use]
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

/// Keyed store of job results.
///
/// The engine relies only on idempotent `get`/`put` by job id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Gets a record by job id.
    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, CollaboratorError>;

    /// Inserts or replaces a record.
    async fn put(&self, record: JobRecord) -> Result<(), CollaboratorError>;

    /// Replaces the output of an existing record. Returns false if absent.
    async fn update(
        &self,
        job_id: &JobId,
        output: serde_json::Value,
    ) -> Result<bool, CollaboratorError>;

    /// Deletes a record. Returns false if absent.
    async fn delete(&self, job_id: &JobId) -> Result<bool, CollaboratorError>;

    /// Returns every record, most recently updated first.
    async fn list_all(&self) -> Result<Vec<JobRecord>, CollaboratorError>;
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: DashMap<JobId, JobRecord>,
}

impl InMemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, CollaboratorError> {
        Ok(self.records.get(job_id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, mut record: JobRecord) -> Result<(), CollaboratorError> {
        if let Some(existing) = self.records.get(&record.job_id) {
            record.created_at = existing.created_at;
        }
        self.records.insert(record.job_id.clone(), record);
        Ok(())
    }

    async fn update(
        &self,
        job_id: &JobId,
        output: serde_json::Value,
    ) -> Result<bool, CollaboratorError> {
        match self.records.get_mut(job_id) {
            Some(mut entry) => {
                entry.output = output;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, job_id: &JobId) -> Result<bool, CollaboratorError> {
        Ok(self.records.remove(job_id).is_some())
    }

    async fn list_all(&self) -> Result<Vec<JobRecord>, CollaboratorError> {
        let mut records: Vec<JobRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}
