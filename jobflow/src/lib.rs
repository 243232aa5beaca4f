//! # Jobflow
//!
//! Admission, scheduling, retry and resource reclamation for
//! fetch → infer → persist jobs.
//!
//! Jobflow accepts jobs keyed by a caller-supplied id and guarantees:
//!
//! - **At most one run per id**: duplicate submissions are rejected while a job is queued or running
//! - **Bounded concurrency**: never more than `max_concurrent` pipelines at once
//! - **Retry with backoff**: transient collaborator failures are retried with exponential delays
//! - **Exactly-once answers**: every accepted submission is answered once, even when a deadline races completion
//! - **Guaranteed cleanup**: staged artifacts are removed on every exit path
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jobflow::prelude::*;
//!
//! let engine = Engine::start(EngineConfig::load(None)?, source, inference, store)?;
//!
//! let response = engine.scheduler().submit("invoice-42")?.await;
//! match response {
//!     Ok(result) => println!("{} (cached: {})", result.output, result.cached),
//!     Err(err) => eprintln!("job failed: {err}"),
//! }
//!
//! engine.shutdown().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod reclaim;
pub mod retry;
pub mod scheduler;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{EngineConfig, ExecutorConfig, ReclaimConfig, SchedulerConfig};
    pub use crate::core::{JobId, JobPayload, JobResponse, JobResult, PipelineOutcome, QueueStatus, UsageMetadata};
    pub use crate::engine::Engine;
    pub use crate::errors::{CollaboratorError, ErrorSignal, FailureReason, JobError, JobflowError, SubmitError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{JobRunner, PipelineExecutor};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::ports::{
        ArtifactMeta, ArtifactSource, ByteStream, InMemoryRecordStore, InferenceReply,
        InferenceRequest, InferenceService, InferenceTier, JobRecord, RecordStore,
    };
    pub use crate::queue::{Delivery, DeliveryReceiver};
    pub use crate::reclaim::Reclaimer;
    pub use crate::retry::{JitterStrategy, RetryPolicy};
    pub use crate::scheduler::Scheduler;
}
