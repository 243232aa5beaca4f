//! Pipeline outcomes and the payload a successful run produces.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::FailureReason;

/// Token and cost accounting reported by the inference service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetadata {
    /// Tokens sent to the model.
    #[serde(default)]
    pub input_tokens: u64,
    /// Tokens produced by the model.
    #[serde(default)]
    pub output_tokens: u64,
    /// Estimated cost in the service's billing currency.
    #[serde(default)]
    pub estimated_cost: f64,
}

impl UsageMetadata {
    /// Creates usage metadata from token counts.
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            estimated_cost: 0.0,
        }
    }

    /// Sets the estimated cost.
    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Total tokens consumed.
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Result data of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Normalised structured output.
    pub output: serde_json::Value,
    /// Usage reported by the inference service.
    #[serde(default)]
    pub usage: UsageMetadata,
    /// True when the result came from the record store without running the pipeline.
    #[serde(default)]
    pub cached: bool,
    /// Inference tier that produced the output, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl JobPayload {
    /// Creates a payload for a freshly computed result.
    #[must_use]
    pub fn fresh(output: serde_json::Value, usage: UsageMetadata, tier: impl Into<String>) -> Self {
        Self {
            output,
            usage,
            cached: false,
            tier: Some(tier.into()),
        }
    }

    /// Creates a payload for a result served from the record store.
    #[must_use]
    pub fn cached(output: serde_json::Value, usage: UsageMetadata) -> Self {
        Self {
            output,
            usage,
            cached: true,
            tier: None,
        }
    }
}

/// Tagged result of one pipeline run.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// The job produced a result.
    Success(JobPayload),
    /// A transient fault; the job may be attempted again.
    RetryableFailure {
        /// What went wrong.
        reason: FailureReason,
    },
    /// A permanent fault; the job must not be retried.
    FatalFailure {
        /// What went wrong.
        reason: FailureReason,
    },
    /// A stage or the whole run exceeded its deadline.
    TimedOut {
        /// Name of the stage whose deadline fired.
        stage: &'static str,
    },
}

impl PipelineOutcome {
    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(reason: impl Into<FailureReason>) -> Self {
        Self::RetryableFailure {
            reason: reason.into(),
        }
    }

    /// Creates a fatal failure.
    #[must_use]
    pub fn fatal(reason: impl Into<FailureReason>) -> Self {
        Self::FatalFailure {
            reason: reason.into(),
        }
    }

    /// Returns true for a successful outcome.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Short label used in logs and events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::RetryableFailure { .. } => "retryable_failure",
            Self::FatalFailure { .. } => "fatal_failure",
            Self::TimedOut { .. } => "timed_out",
        }
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(payload) if payload.cached => write!(f, "success (cached)"),
            Self::Success(_) => write!(f, "success"),
            Self::RetryableFailure { reason } => write!(f, "retryable failure: {reason}"),
            Self::FatalFailure { reason } => write!(f, "fatal failure: {reason}"),
            Self::TimedOut { stage } => write!(f, "timed out in {stage}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_total_tokens() {
        let usage = UsageMetadata::new(120, 30).with_cost(0.002);
        assert_eq!(usage.total_tokens(), 150);
        assert!((usage.estimated_cost - 0.002).abs() < f64::EPSILON);
    }

    #[test]
    fn test_outcome_labels() {
        let ok = PipelineOutcome::Success(JobPayload::cached(serde_json::json!({}), UsageMetadata::default()));
        assert!(ok.is_success());
        assert_eq!(ok.label(), "success");
        assert_eq!(ok.to_string(), "success (cached)");

        let timed_out = PipelineOutcome::TimedOut { stage: "fetch" };
        assert_eq!(timed_out.label(), "timed_out");
        assert_eq!(timed_out.to_string(), "timed out in fetch");
    }

    #[test]
    fn test_payload_serialization_skips_missing_tier() {
        let payload = JobPayload::cached(serde_json::json!({"a": 1}), UsageMetadata::default());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["cached"], serde_json::json!(true));
        assert!(json.get("tier").is_none());
    }
}
