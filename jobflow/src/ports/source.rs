//! Retrieval collaborator: where artifact bytes come from.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::core::JobId;
use crate::errors::CollaboratorError;

/// Stream of artifact chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, CollaboratorError>>;

/// What the retrieval service knows about an artifact before transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Display name of the artifact.
    pub name: String,
    /// Declared size in bytes.
    pub size: u64,
    /// MIME type, used as a hint for inference.
    pub mime_type: String,
}

impl ArtifactMeta {
    /// Creates artifact metadata.
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}

/// Downloads artifacts by job id.
///
/// Failures carry an [`crate::errors::ErrorSignal`]: not-found and
/// permission errors are permanent, network errors are transient.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Looks up the artifact's name, size and type without transferring it.
    async fn describe(&self, job_id: &JobId) -> Result<ArtifactMeta, CollaboratorError>;

    /// Opens a byte stream for the artifact.
    async fn open(&self, job_id: &JobId) -> Result<ByteStream, CollaboratorError>;
}
