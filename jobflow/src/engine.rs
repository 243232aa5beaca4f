//! Wiring the scheduler, the pipeline executor and the reclaimer together.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::errors::JobflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::executor::PipelineExecutor;
use crate::ports::{ArtifactSource, InferenceService, RecordStore};
use crate::reclaim::{Reclaimer, SweepSchedule};
use crate::scheduler::Scheduler;

/// A running engine: scheduler loop plus background artifact sweeper.
///
/// Must be started inside a tokio runtime.
#[derive(Debug)]
pub struct Engine {
    scheduler: Scheduler,
    reclaimer: Reclaimer,
    shutdown: CancellationToken,
    scheduler_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
}

impl Engine {
    /// Validates the configuration and starts the engine.
    pub fn start(
        config: EngineConfig,
        source: Arc<dyn ArtifactSource>,
        inference: Arc<dyn InferenceService>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, JobflowError> {
        Self::start_with_events(config, source, inference, store, Arc::new(NoOpEventSink))
    }

    /// Like [`start`](Self::start), emitting lifecycle events to `events`.
    pub fn start_with_events(
        config: EngineConfig,
        source: Arc<dyn ArtifactSource>,
        inference: Arc<dyn InferenceService>,
        store: Arc<dyn RecordStore>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, JobflowError> {
        config.validate()?;

        let reclaimer = Reclaimer::from_config(&config.reclaim);
        let executor = PipelineExecutor::new(
            source,
            inference,
            store,
            reclaimer.clone(),
            config.executor.clone(),
        );
        let scheduler = Scheduler::builder(Arc::new(executor))
            .with_config(config.scheduler.clone())
            .with_retry_policy(config.retry.clone())
            .with_event_sink(events)
            .build();

        let shutdown = CancellationToken::new();
        let sweeper_task =
            reclaimer.spawn_sweeper(SweepSchedule::from(&config.reclaim), shutdown.clone());
        let scheduler_task = scheduler.spawn();

        info!(
            max_concurrent = config.scheduler.max_concurrent,
            temp_dir = %reclaimer.root().display(),
            "Engine started"
        );

        Ok(Self {
            scheduler,
            reclaimer,
            shutdown,
            scheduler_task,
            sweeper_task,
        })
    }

    /// The scheduler accepting submissions.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The reclaimer owning the temp directory.
    #[must_use]
    pub fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    /// Abandons pending jobs and waits for the background tasks to stop.
    ///
    /// Pipelines already running are not interrupted; their staged files are
    /// released when they finish.
    pub async fn shutdown(self) {
        self.scheduler.shutdown();
        self.shutdown.cancel("engine shut down");

        if let Err(e) = self.scheduler_task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
        if let Err(e) = self.sweeper_task.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
        info!("Engine stopped");
    }
}
