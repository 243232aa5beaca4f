//! Interfaces to the external collaborators the engine drives.
//!
//! - [`ArtifactSource`]: downloads artifact bytes
//! - [`InferenceService`]: turns bytes plus a task into structured text
//! - [`RecordStore`]: caches results by job id

mod inference;
mod source;
mod store;

pub use inference::{InferenceReply, InferenceRequest, InferenceService, InferenceTier};
pub use source::{ArtifactMeta, ArtifactSource, ByteStream};
pub use store::{InMemoryRecordStore, JobRecord, RecordStore};
