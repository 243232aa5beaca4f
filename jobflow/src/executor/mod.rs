//! Running one attempt of a job.
//!
//! The scheduler only knows the [`JobRunner`] seam. [`PipelineExecutor`] is
//! the production runner: cache check, fetch, infer, normalize, persist.

mod normalize;
mod pipeline;

use async_trait::async_trait;

use crate::core::{JobId, PipelineOutcome};

pub use normalize::{normalize_output, parse_structured};
pub use pipeline::PipelineExecutor;

/// One attempt of a job, start to finish.
///
/// Implementations report every failure through the returned outcome. A
/// panic is caught by the scheduler and treated as a fatal failure.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Runs the job once.
    async fn run(&self, job_id: &JobId) -> PipelineOutcome;
}
