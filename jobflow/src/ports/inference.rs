//! Inference collaborator and its capability tiers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::{JobId, UsageMetadata};
use crate::errors::CollaboratorError;

/// A named inference capability with its own payload-size ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceTier {
    /// Tier (model) name passed to the service.
    pub name: String,
    /// Largest payload this tier accepts, in bytes.
    pub max_payload_bytes: u64,
}

impl InferenceTier {
    /// Creates a tier.
    pub fn new(name: impl Into<String>, max_payload_bytes: u64) -> Self {
        Self {
            name: name.into(),
            max_payload_bytes,
        }
    }

    /// Returns true if a payload of `size` bytes may be sent to this tier.
    #[must_use]
    pub fn accepts(&self, size: u64) -> bool {
        size <= self.max_payload_bytes
    }
}

/// One inference call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Job the call is made for.
    pub job_id: JobId,
    /// Artifact contents.
    pub data: Arc<[u8]>,
    /// MIME type of the artifact.
    pub mime_hint: String,
    /// Fixed task descriptor (the prompt).
    pub task: Arc<str>,
}

/// Raw reply from the inference service.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceReply {
    /// Free-form text, expected to contain structured data.
    pub text: String,
    /// Token and cost accounting.
    pub usage: UsageMetadata,
}

impl InferenceReply {
    /// Creates a reply.
    pub fn new(text: impl Into<String>, usage: UsageMetadata) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// Runs inference over an artifact.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Submits the artifact and task to the given tier.
    async fn infer(
        &self,
        tier: &InferenceTier,
        request: InferenceRequest,
    ) -> Result<InferenceReply, CollaboratorError>;
}
