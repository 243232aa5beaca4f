//! Core domain types for jobflow.
//!
//! - Job ids and submission tickets
//! - Pipeline outcomes and payloads
//! - Caller-facing results
//! - Queue status snapshots

mod job;
mod outcome;
mod response;
mod status;

pub use job::{JobId, Ticket};
pub use outcome::{JobPayload, PipelineOutcome, UsageMetadata};
pub use response::{JobResponse, JobResult};
pub use status::QueueStatus;
