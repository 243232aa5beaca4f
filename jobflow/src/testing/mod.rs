//! Test doubles for the engine.
//!
//! - Scripted collaborators for the pipeline executor
//! - A scripted runner for scheduler tests
//! - Canned outcomes and response assertions

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_job_failed, assert_job_succeeded, assert_job_timed_out};
pub use fixtures::{fatal_failure, success_outcome, transient_failure};
pub use mocks::{FlakyRecordStore, MemorySource, ScriptedInference, ScriptedRunner};
