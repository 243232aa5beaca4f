//! Span helpers.

use tracing::Span;

use crate::core::{JobId, Ticket};

/// Span covering one attempt of a job.
#[must_use]
pub fn job_span(job_id: &JobId, ticket: Ticket, attempt: u32) -> Span {
    tracing::info_span!("job", job_id = %job_id, ticket = %ticket, attempt)
}
