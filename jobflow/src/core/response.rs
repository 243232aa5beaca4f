//! What the caller receives once a job resolves.

use serde::{Deserialize, Serialize};

use super::{JobId, JobPayload, UsageMetadata};
use crate::errors::JobError;

/// Successful result handed back to the submitting caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// The job this result belongs to.
    pub job_id: JobId,
    /// Normalised structured output.
    pub output: serde_json::Value,
    /// Usage reported by the inference service.
    pub usage: UsageMetadata,
    /// True when served from the record store.
    pub cached: bool,
    /// Inference tier that produced the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// Number of pipeline attempts it took.
    pub attempts: u32,
}

impl JobResult {
    /// Builds a result from a pipeline payload.
    #[must_use]
    pub fn from_payload(job_id: JobId, payload: JobPayload, attempts: u32) -> Self {
        Self {
            job_id,
            output: payload.output,
            usage: payload.usage,
            cached: payload.cached,
            tier: payload.tier,
            attempts,
        }
    }
}

/// The value a delivery capability carries.
pub type JobResponse = Result<JobResult, JobError>;
