//! Builder for [`Scheduler`].

use std::sync::Arc;

use super::Scheduler;
use crate::config::SchedulerConfig;
use crate::events::{EventSink, NoOpEventSink};
use crate::executor::JobRunner;
use crate::retry::RetryPolicy;

/// Collects the parts of a [`Scheduler`].
pub struct SchedulerBuilder {
    pub(super) runner: Arc<dyn JobRunner>,
    pub(super) config: SchedulerConfig,
    pub(super) retry: RetryPolicy,
    pub(super) events: Arc<dyn EventSink>,
}

impl SchedulerBuilder {
    /// Starts a builder with default configuration and no event sink.
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self {
            runner,
            config: SchedulerConfig::default(),
            retry: RetryPolicy::default(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the scheduler configuration.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Builds the scheduler.
    #[must_use]
    pub fn build(self) -> Scheduler {
        Scheduler::from_builder(self)
    }
}

impl std::fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
