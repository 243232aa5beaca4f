//! Error types for the jobflow engine.
//!
//! Errors fall into three groups: submission errors returned synchronously
//! to the caller of `submit`, job errors delivered through the delivery
//! capability, and failure reasons carried inside pipeline outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::JobId;

/// The crate-wide error type for configuration and I/O.
#[derive(Debug, Error)]
pub enum JobflowError {
    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a submission is rejected before any work is queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The id is already queued or in flight.
    #[error("job '{0}' is already queued or in flight")]
    Duplicate(JobId),

    /// The id is empty.
    #[error("job id must not be empty")]
    InvalidJobId,

    /// The scheduler no longer accepts work.
    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Terminal errors delivered to the submitting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    /// The job failed permanently or ran out of retries.
    #[error("job failed after {attempts} attempt(s): {reason}")]
    Failed {
        /// Description of the last failure.
        reason: String,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// The submission deadline or a stage deadline passed.
    #[error("job timed out after {after_ms}ms{}", stage_suffix(.stage))]
    TimedOut {
        /// Time between submission and the timeout, in milliseconds.
        after_ms: u64,
        /// Pipeline stage whose deadline fired; `None` for the submission deadline.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },

    /// The job was cancelled before it resolved.
    #[error("job was cancelled")]
    Cancelled,

    /// The engine shut down before the job resolved.
    #[error("job abandoned: {reason}")]
    Abandoned {
        /// Why the job was abandoned.
        reason: String,
    },
}

#[allow(clippy::ref_option)]
fn stage_suffix(stage: &Option<String>) -> String {
    stage
        .as_deref()
        .map(|stage| format!(" in stage '{stage}'"))
        .unwrap_or_default()
}

impl JobError {
    /// Returns true for timeouts, which callers report separately from failures.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// The pipeline stage that timed out, if a stage deadline caused the timeout.
    #[must_use]
    pub fn timed_out_stage(&self) -> Option<&str> {
        match self {
            Self::TimedOut { stage, .. } => stage.as_deref(),
            _ => None,
        }
    }
}

/// Fault signal reported by an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSignal {
    /// Service temporarily unavailable (503).
    ServiceUnavailable,
    /// Service overloaded.
    Overloaded,
    /// Too many requests (429).
    RateLimited,
    /// Connection reset or refused.
    ConnectionReset,
    /// Request timed out.
    Timeout,
    /// Other server-side error with its status code.
    Server(u16),
    /// The request or payload was malformed.
    InvalidInput,
    /// Credentials missing or rejected.
    Unauthorized,
    /// Credentials valid but not allowed.
    PermissionDenied,
    /// Account quota exhausted.
    QuotaExceeded,
    /// The requested artifact does not exist.
    NotFound,
    /// The payload exceeds a size limit.
    TooLarge,
    /// Anything else.
    Other,
}

impl ErrorSignal {
    /// Maps an HTTP-style status code to a signal.
    #[must_use]
    pub fn from_status(code: u16) -> Self {
        match code {
            400 | 422 => Self::InvalidInput,
            401 => Self::Unauthorized,
            403 => Self::PermissionDenied,
            404 | 410 => Self::NotFound,
            408 | 504 => Self::Timeout,
            413 => Self::TooLarge,
            429 => Self::RateLimited,
            503 => Self::ServiceUnavailable,
            529 => Self::Overloaded,
            500..=599 => Self::Server(code),
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ErrorSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceUnavailable => write!(f, "service_unavailable"),
            Self::Overloaded => write!(f, "overloaded"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::ConnectionReset => write!(f, "connection_reset"),
            Self::Timeout => write!(f, "timeout"),
            Self::Server(code) => write!(f, "server_{code}"),
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::PermissionDenied => write!(f, "permission_denied"),
            Self::QuotaExceeded => write!(f, "quota_exceeded"),
            Self::NotFound => write!(f, "not_found"),
            Self::TooLarge => write!(f, "too_large"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Error returned by the retrieval, inference, and record-store collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{signal}: {message}")]
pub struct CollaboratorError {
    /// Classification hint for the retry policy.
    pub signal: ErrorSignal,
    /// Human-readable detail.
    pub message: String,
}

impl CollaboratorError {
    /// Creates a new collaborator error.
    #[must_use]
    pub fn new(signal: ErrorSignal, message: impl Into<String>) -> Self {
        Self {
            signal,
            message: message.into(),
        }
    }

    /// Creates an error from an HTTP-style status code.
    #[must_use]
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorSignal::from_status(code), message)
    }
}

impl From<std::io::Error> for CollaboratorError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let signal = match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe => ErrorSignal::ConnectionReset,
            ErrorKind::TimedOut => ErrorSignal::Timeout,
            ErrorKind::NotFound => ErrorSignal::NotFound,
            ErrorKind::PermissionDenied => ErrorSignal::PermissionDenied,
            _ => ErrorSignal::Other,
        };
        Self::new(signal, err.to_string())
    }
}

/// Why a pipeline run failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// The artifact exceeds the configured ceiling.
    #[error("artifact too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Observed or declared size.
        size: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// No inference tier accepts a payload of this size.
    #[error("no inference tier accepts a payload of {size} bytes")]
    NoEligibleTier {
        /// Payload size.
        size: u64,
    },

    /// An external collaborator reported an error.
    #[error("{stage}: {source}")]
    Collaborator {
        /// Stage that called the collaborator.
        stage: &'static str,
        /// The collaborator's error.
        source: CollaboratorError,
    },

    /// The pipeline task panicked.
    #[error("pipeline panicked: {0}")]
    Panicked(String),

    /// Local filesystem error while staging the artifact.
    #[error("local io error: {0}")]
    Io(String),
}

impl FailureReason {
    /// Wraps a collaborator error with the stage it came from.
    #[must_use]
    pub fn collaborator(stage: &'static str, source: CollaboratorError) -> Self {
        Self::Collaborator { stage, source }
    }
}

impl From<std::io::Error> for FailureReason {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
