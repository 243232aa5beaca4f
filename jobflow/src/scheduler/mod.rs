//! The scheduling loop.
//!
//! Dispatch is event driven: a submission, a finished run and an elapsed
//! retry backoff each trigger [`Scheduler::schedule_once`]. A periodic tick
//! in [`Scheduler::run`] is only a safety net.
//!
//! Every admission decision happens under the queue mutex; collaborators
//! are only awaited in spawned tasks, never while the lock is held.

mod builder;

#[cfg(test)]
mod scheduler_tests;

pub use builder::SchedulerBuilder;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use crate::cancellation::CancellationToken;
use crate::config::SchedulerConfig;
use crate::core::{JobId, JobResponse, PipelineOutcome, QueueStatus, Ticket};
use crate::errors::{FailureReason, JobError, SubmitError};
use crate::events::{EventSink, JobEventKind};
use crate::executor::JobRunner;
use crate::observability::job_span;
use crate::queue::{
    AdmissionQueue, DeadlineTimer, Delivery, DeliveryReceiver, Dispatch, Handoff, Resolution,
};
use crate::retry::RetryPolicy;

struct Shared {
    queue: Mutex<AdmissionQueue>,
    runner: Arc<dyn JobRunner>,
    config: SchedulerConfig,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
}

/// Admits jobs, dispatches them to the runner and routes outcomes.
///
/// Cheap to clone; clones share the same queue. All methods that spawn
/// tasks must be called from within a tokio runtime.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn event_for(response: Option<&JobResponse>) -> JobEventKind {
    match response {
        Some(Ok(_)) => JobEventKind::Completed,
        Some(Err(JobError::TimedOut { .. })) => JobEventKind::TimedOut,
        Some(Err(JobError::Cancelled)) => JobEventKind::Cancelled,
        Some(Err(JobError::Abandoned { .. })) => JobEventKind::Abandoned,
        Some(Err(JobError::Failed { .. })) | None => JobEventKind::Failed,
    }
}

impl Scheduler {
    /// Starts building a scheduler around a runner.
    pub fn builder(runner: Arc<dyn JobRunner>) -> SchedulerBuilder {
        SchedulerBuilder::new(runner)
    }

    /// Creates a scheduler with default event sink.
    pub fn new(runner: Arc<dyn JobRunner>, config: SchedulerConfig, retry: RetryPolicy) -> Self {
        Self::builder(runner)
            .with_config(config)
            .with_retry_policy(retry)
            .build()
    }

    fn from_builder(builder: SchedulerBuilder) -> Self {
        let queue = AdmissionQueue::new(builder.config.max_concurrent, builder.retry);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(queue),
                runner: builder.runner,
                config: builder.config,
                events: builder.events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The scheduler configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Submits a job and returns a receiver for its response.
    pub fn submit(&self, job_id: impl Into<JobId>) -> Result<DeliveryReceiver, SubmitError> {
        let (delivery, receiver) = Delivery::channel();
        self.submit_with(job_id, delivery)?;
        Ok(receiver)
    }

    /// Submits a job with a caller-supplied delivery.
    ///
    /// On rejection the delivery is dropped without being invoked.
    pub fn submit_with(
        &self,
        job_id: impl Into<JobId>,
        delivery: Delivery,
    ) -> Result<Ticket, SubmitError> {
        let job_id = job_id.into();

        let admitted = if self.is_shutting_down() {
            Err(SubmitError::ShuttingDown)
        } else {
            self.shared
                .queue
                .lock()
                .submit(job_id.clone(), delivery, Instant::now())
        };

        let ticket = match admitted {
            Ok(ticket) => ticket,
            Err(err) => {
                debug!(job_id = %job_id, error = %err, "Submission rejected");
                self.emit(
                    JobEventKind::Rejected,
                    json!({"job_id": job_id.as_str(), "error": err.to_string()}),
                );
                return Err(err);
            }
        };

        self.arm_deadline(&job_id, ticket);
        info!(job_id = %job_id, ticket = %ticket, "Job submitted");
        self.emit(
            JobEventKind::Submitted,
            json!({"job_id": job_id.as_str(), "ticket": ticket.value()}),
        );

        self.schedule_once();
        Ok(ticket)
    }

    fn arm_deadline(&self, job_id: &JobId, ticket: Ticket) {
        let limit = self.shared.config.submission_timeout();
        let weak = Arc::downgrade(&self.shared);
        let id = job_id.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            if let Some(shared) = weak.upgrade() {
                Scheduler { shared }.expire(&id, ticket);
            }
        });

        let timer = DeadlineTimer::new(task.abort_handle());
        self.shared.queue.lock().attach_deadline(job_id, ticket, timer);
    }

    /// Dispatches as many eligible jobs as there are free slots.
    ///
    /// Never awaits a run; each dispatch is a spawned task.
    pub fn schedule_once(&self) {
        if self.is_shutting_down() {
            return;
        }

        let max_concurrent = self.shared.config.max_concurrent;
        let mut dispatches = Vec::new();
        {
            let mut queue = self.shared.queue.lock();
            let now = Instant::now();
            loop {
                let in_flight = queue.in_flight_len();
                let Some(job_id) = queue
                    .next_eligible(max_concurrent, in_flight, now)
                    .map(|item| item.job_id().clone())
                else {
                    break;
                };
                match queue.mark_in_flight(&job_id) {
                    Some(dispatch) => dispatches.push(dispatch),
                    None => break,
                }
            }
        }

        for dispatch in dispatches {
            self.dispatch(dispatch);
        }
    }

    fn dispatch(&self, dispatch: Dispatch) {
        debug!(job_id = %dispatch.job_id, attempt = dispatch.attempt, "Dispatching job");
        self.emit(
            JobEventKind::Dispatched,
            json!({"job_id": dispatch.job_id.as_str(), "attempt": dispatch.attempt}),
        );

        let scheduler = self.clone();
        let runner = self.shared.runner.clone();
        let span = job_span(&dispatch.job_id, dispatch.ticket, dispatch.attempt);
        let task = async move {
            let outcome = AssertUnwindSafe(runner.run(&dispatch.job_id))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    warn!(job_id = %dispatch.job_id, panic = %message, "Pipeline run panicked");
                    PipelineOutcome::fatal(FailureReason::Panicked(message))
                });

            scheduler.complete(&dispatch, outcome);
            scheduler.schedule_once();
        };
        tokio::spawn(task.instrument(span));
    }

    fn complete(&self, dispatch: &Dispatch, outcome: PipelineOutcome) {
        let label = outcome.label();
        let resolution = self.shared.queue.lock().resolve(
            &dispatch.job_id,
            dispatch.ticket,
            outcome,
            Instant::now(),
        );

        match resolution {
            Resolution::Delivered(handoff) => self.hand_over(handoff, Some(dispatch.attempt)),
            Resolution::Retrying { attempt, delay } => {
                info!(
                    job_id = %dispatch.job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retry scheduled"
                );
                self.emit(
                    JobEventKind::RetryScheduled,
                    json!({
                        "job_id": dispatch.job_id.as_str(),
                        "attempt": attempt,
                        "delay_ms": delay.as_millis() as u64,
                    }),
                );
                self.wake_after(delay);
            }
            Resolution::Discarded => {
                debug!(job_id = %dispatch.job_id, outcome = label, "Late outcome discarded");
                self.emit(
                    JobEventKind::Discarded,
                    json!({"job_id": dispatch.job_id.as_str(), "outcome": label}),
                );
            }
        }
    }

    fn wake_after(&self, delay: Duration) {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                Scheduler { shared }.schedule_once();
            }
        });
    }

    fn hand_over(&self, handoff: Handoff, attempt: Option<u32>) {
        let kind = event_for(handoff.response());
        let mut data = json!({"job_id": handoff.job_id().as_str()});
        if let Some(attempt) = attempt {
            data["attempt"] = json!(attempt);
        }
        if let Some(Err(err)) = handoff.response() {
            data["error"] = json!(err.to_string());
        }

        match kind {
            JobEventKind::Completed => info!(job_id = %handoff.job_id(), "Job completed"),
            _ => warn!(job_id = %handoff.job_id(), event = %kind, "Job did not complete"),
        }
        self.emit(kind, data);

        if !handoff.deliver() {
            debug!("Caller no longer waiting for response");
        }
    }

    fn expire(&self, job_id: &JobId, ticket: Ticket) {
        let handoff = self.shared.queue.lock().expire(job_id, ticket, Instant::now());
        if let Some(handoff) = handoff {
            self.hand_over(handoff, None);
        }
    }

    /// Cancels a queued or running job.
    ///
    /// A running pipeline is not interrupted; its outcome is discarded and
    /// its slot is freed when it returns. Returns false if the id is not
    /// owned or its caller was already answered.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let handoff = self.shared.queue.lock().cancel(job_id);
        match handoff {
            Some(handoff) => {
                self.hand_over(handoff, None);
                true
            }
            None => false,
        }
    }

    /// Snapshot of queue and in-flight state.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        self.shared.queue.lock().status()
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stops accepting and dispatching work and abandons pending jobs.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel("scheduler shut down");
        self.drain();
    }

    fn drain(&self) {
        let handoffs = self.shared.queue.lock().drain("scheduler shut down");
        for handoff in handoffs {
            self.hand_over(handoff, None);
        }
    }

    /// Runs the safety-net tick until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.shared.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            max_concurrent = self.shared.config.max_concurrent,
            "Scheduler loop started"
        );

        loop {
            tokio::select! {
                () = self.shared.shutdown.cancelled() => break,
                _ = ticker.tick() => self.schedule_once(),
            }
        }

        self.drain();
        info!("Scheduler loop stopped");
    }

    /// Spawns [`run`](Self::run) onto the current runtime.
    #[must_use]
    pub fn spawn(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    fn emit(&self, kind: JobEventKind, data: serde_json::Value) {
        self.shared.events.try_emit(kind.as_str(), Some(data));
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
