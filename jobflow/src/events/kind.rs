//! Event type names.

use std::fmt;

/// Lifecycle transitions of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    /// A submission was accepted.
    Submitted,
    /// A submission was refused.
    Rejected,
    /// A job was handed to a runner.
    Dispatched,
    /// A retryable failure was re-queued behind a backoff.
    RetryScheduled,
    /// A job delivered a successful result.
    Completed,
    /// A job delivered a failure.
    Failed,
    /// A job's deadline or a stage deadline passed.
    TimedOut,
    /// A job was cancelled.
    Cancelled,
    /// A late outcome was dropped.
    Discarded,
    /// A job was answered during shutdown.
    Abandoned,
}

impl JobEventKind {
    /// Dotted event type, e.g. `job.retry_scheduled`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "job.submitted",
            Self::Rejected => "job.rejected",
            Self::Dispatched => "job.dispatched",
            Self::RetryScheduled => "job.retry_scheduled",
            Self::Completed => "job.completed",
            Self::Failed => "job.failed",
            Self::TimedOut => "job.timed_out",
            Self::Cancelled => "job.cancelled",
            Self::Discarded => "job.discarded",
            Self::Abandoned => "job.abandoned",
        }
    }
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
