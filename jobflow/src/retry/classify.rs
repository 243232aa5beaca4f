//! Classify collaborator errors into retry classes.

use crate::errors::{CollaboratorError, ErrorSignal, FailureReason};

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient; retry after backoff.
    Retryable,
    /// Permanent; surface to the caller.
    Fatal,
}

/// Classify an error signal.
///
/// Transport and server faults are transient. Malformed input, auth,
/// permission and quota problems are permanent.
#[must_use]
pub fn classify_signal(signal: ErrorSignal) -> RetryClass {
    match signal {
        ErrorSignal::ServiceUnavailable
        | ErrorSignal::Overloaded
        | ErrorSignal::RateLimited
        | ErrorSignal::ConnectionReset
        | ErrorSignal::Timeout
        | ErrorSignal::Server(_) => RetryClass::Retryable,
        ErrorSignal::InvalidInput
        | ErrorSignal::Unauthorized
        | ErrorSignal::PermissionDenied
        | ErrorSignal::QuotaExceeded
        | ErrorSignal::NotFound
        | ErrorSignal::TooLarge
        | ErrorSignal::Other => RetryClass::Fatal,
    }
}

/// Classify a collaborator error.
#[must_use]
pub fn classify(err: &CollaboratorError) -> RetryClass {
    classify_signal(err.signal)
}

/// Classify a pipeline failure reason.
#[must_use]
pub fn classify_reason(reason: &FailureReason) -> RetryClass {
    match reason {
        FailureReason::Collaborator { source, .. } => classify(source),
        FailureReason::TooLarge { .. }
        | FailureReason::NoEligibleTier { .. }
        | FailureReason::Panicked(_)
        | FailureReason::Io(_) => RetryClass::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_signals_retryable() {
        for signal in [
            ErrorSignal::ServiceUnavailable,
            ErrorSignal::Overloaded,
            ErrorSignal::RateLimited,
            ErrorSignal::ConnectionReset,
            ErrorSignal::Timeout,
            ErrorSignal::Server(502),
        ] {
            assert_eq!(classify_signal(signal), RetryClass::Retryable, "{signal}");
        }
    }

    #[test]
    fn test_permanent_signals_fatal() {
        for signal in [
            ErrorSignal::InvalidInput,
            ErrorSignal::Unauthorized,
            ErrorSignal::PermissionDenied,
            ErrorSignal::QuotaExceeded,
            ErrorSignal::NotFound,
        ] {
            assert_eq!(classify_signal(signal), RetryClass::Fatal, "{signal}");
        }
    }

    #[test]
    fn test_classify_reason() {
        let transient = FailureReason::collaborator(
            "infer",
            CollaboratorError::new(ErrorSignal::Overloaded, "busy"),
        );
        assert_eq!(classify_reason(&transient), RetryClass::Retryable);

        let too_large = FailureReason::TooLarge { size: 2, limit: 1 };
        assert_eq!(classify_reason(&too_large), RetryClass::Fatal);
    }
}
