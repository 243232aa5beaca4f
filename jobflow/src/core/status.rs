//! Read-only snapshot of the admission queue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time view of queue and in-flight state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Jobs waiting for a slot (including ones sitting out a retry backoff).
    pub queue_length: usize,
    /// Ids currently owned by a running pipeline, sorted.
    pub in_flight_ids: Vec<String>,
    /// Number of running pipelines.
    pub in_flight_count: usize,
    /// Concurrency ceiling.
    pub max_concurrent: usize,
    /// Retry attempts recorded per job id.
    pub retry_attempts: BTreeMap<String, u32>,
    /// Running pipelines whose caller has already been answered.
    pub detached_count: usize,
}

impl QueueStatus {
    /// Free dispatch slots.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.max_concurrent.saturating_sub(self.in_flight_count)
    }

    /// True when nothing is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue_length == 0 && self.in_flight_count == 0
    }
}
