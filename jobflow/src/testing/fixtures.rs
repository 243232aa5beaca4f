//! Canned outcomes for scripted runners.

use serde_json::json;

use crate::core::{JobPayload, PipelineOutcome, UsageMetadata};
use crate::errors::{CollaboratorError, ErrorSignal, FailureReason};

/// A successful outcome with a small JSON body.
#[must_use]
pub fn success_outcome() -> PipelineOutcome {
    PipelineOutcome::Success(JobPayload::fresh(
        json!({"ok": true}),
        UsageMetadata::new(10, 5),
        "scripted",
    ))
}

/// A retryable outcome: the inference service was unavailable.
#[must_use]
pub fn transient_failure() -> PipelineOutcome {
    PipelineOutcome::retryable(FailureReason::collaborator(
        "infer",
        CollaboratorError::new(ErrorSignal::ServiceUnavailable, "scripted outage"),
    ))
}

/// A fatal outcome: the artifact was rejected as malformed.
#[must_use]
pub fn fatal_failure() -> PipelineOutcome {
    PipelineOutcome::fatal(FailureReason::collaborator(
        "infer",
        CollaboratorError::new(ErrorSignal::InvalidInput, "scripted rejection"),
    ))
}
