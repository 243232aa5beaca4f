//! Assertions on delivered job responses.

use crate::core::{JobResponse, JobResult};
use crate::errors::JobError;

/// Asserts a successful response and returns the result.
#[track_caller]
pub fn assert_job_succeeded(response: &JobResponse) -> &JobResult {
    match response {
        Ok(result) => result,
        Err(err) => panic!("Expected success, got error: {err}"),
    }
}

/// Asserts a `Failed` response with the given attempt count.
#[track_caller]
pub fn assert_job_failed(response: &JobResponse, expected_attempts: u32) {
    match response {
        Err(JobError::Failed { attempts, .. }) => assert_eq!(
            *attempts, expected_attempts,
            "Expected {expected_attempts} attempt(s), got {attempts}"
        ),
        other => panic!("Expected Failed, got {other:?}"),
    }
}

/// Asserts a `TimedOut` response.
#[track_caller]
pub fn assert_job_timed_out(response: &JobResponse) {
    assert!(
        matches!(response, Err(err) if err.is_timeout()),
        "Expected TimedOut, got {response:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobId;

    fn result() -> JobResult {
        JobResult {
            job_id: JobId::new("a"),
            output: serde_json::json!({}),
            usage: Default::default(),
            cached: false,
            tier: None,
            attempts: 1,
        }
    }

    #[test]
    fn test_assertions_pass() {
        assert_eq!(assert_job_succeeded(&Ok(result())).attempts, 1);
        assert_job_failed(
            &Err(JobError::Failed {
                reason: "x".into(),
                attempts: 3,
            }),
            3,
        );
        assert_job_timed_out(&Err(JobError::TimedOut { after_ms: 1, stage: None }));
    }

    #[test]
    #[should_panic(expected = "Expected TimedOut")]
    fn test_timed_out_assertion_fails() {
        assert_job_timed_out(&Err(JobError::Cancelled));
    }
}
