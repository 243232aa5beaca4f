//! The admission queue: dedup, FIFO order, retry counters, in-flight set.
//!
//! All methods take `&mut self` and never block or await. The scheduler
//! keeps the queue behind one mutex, which serializes every admission
//! decision. Responses are returned as [`Handoff`]s so the caller can
//! deliver them after releasing that lock.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{DeadlineTimer, Delivery, Handoff};
use crate::core::{JobId, JobResult, PipelineOutcome, QueueStatus, Ticket};
use crate::errors::{JobError, SubmitError};
use crate::retry::{classify_reason, RetryDecision, RetryPolicy};

/// A submission waiting for, or holding, an execution slot.
#[derive(Debug)]
pub struct QueueItem {
    job_id: JobId,
    ticket: Ticket,
    delivery: Option<Delivery>,
    deadline_timer: Option<DeadlineTimer>,
    submitted_at: Instant,
    enqueued_at: Instant,
    ready_at: Instant,
}

impl QueueItem {
    /// The job id.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The submission ticket.
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// When the caller submitted the job.
    #[must_use]
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// When the item last entered the queue.
    #[must_use]
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Earliest instant the item may be dispatched.
    #[must_use]
    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    /// True when the caller was already answered and the item only
    /// reserves its slot until the running pipeline returns.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.delivery.is_none()
    }

    fn elapsed_ms(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.submitted_at).as_millis())
            .unwrap_or(u64::MAX)
    }
}

/// A job moved from the queue into the in-flight set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// The job to run.
    pub job_id: JobId,
    /// Ticket to pass back to [`AdmissionQueue::resolve`].
    pub ticket: Ticket,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// What [`AdmissionQueue::resolve`] did with an outcome.
#[derive(Debug)]
pub enum Resolution {
    /// The job reached a terminal state; the handoff carries the response.
    Delivered(Handoff),
    /// The job was re-queued behind a backoff.
    Retrying {
        /// Retry number (1 for the first retry).
        attempt: u32,
        /// Backoff before the job becomes eligible again.
        delay: Duration,
    },
    /// The outcome belonged to a detached, stale, or unknown submission.
    Discarded,
}

/// Pending and running jobs plus their retry bookkeeping.
#[derive(Debug)]
pub struct AdmissionQueue {
    queued: VecDeque<QueueItem>,
    in_flight: HashMap<JobId, QueueItem>,
    retries: HashMap<JobId, u32>,
    policy: RetryPolicy,
    max_concurrent: usize,
    next_ticket: u64,
}

impl AdmissionQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(max_concurrent: usize, policy: RetryPolicy) -> Self {
        Self {
            queued: VecDeque::new(),
            in_flight: HashMap::new(),
            retries: HashMap::new(),
            policy,
            max_concurrent,
            next_ticket: 1,
        }
    }

    /// The concurrency ceiling reported in [`status`](Self::status).
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Returns true if the id is queued or in flight.
    #[must_use]
    pub fn contains(&self, job_id: &JobId) -> bool {
        self.in_flight.contains_key(job_id) || self.queued.iter().any(|i| &i.job_id == job_id)
    }

    /// Number of queued items, including ones waiting out a backoff.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Number of in-flight items, detached ones included.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Accepts a submission unless the id is already owned.
    ///
    /// The check and the insert happen under the same `&mut self` borrow,
    /// so two concurrent submissions of one id cannot both succeed.
    pub fn submit(
        &mut self,
        job_id: JobId,
        delivery: Delivery,
        now: Instant,
    ) -> Result<Ticket, SubmitError> {
        if job_id.is_blank() {
            return Err(SubmitError::InvalidJobId);
        }
        if self.contains(&job_id) {
            return Err(SubmitError::Duplicate(job_id));
        }

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        debug!(job_id = %job_id, ticket = %ticket, "Job admitted");
        self.queued.push_back(QueueItem {
            job_id,
            ticket,
            delivery: Some(delivery),
            deadline_timer: None,
            submitted_at: now,
            enqueued_at: now,
            ready_at: now,
        });
        Ok(ticket)
    }

    /// Attaches a deadline timer to a live submission.
    ///
    /// Returns false (and drops, thereby aborting, the timer) if the
    /// submission already left the queue.
    pub fn attach_deadline(&mut self, job_id: &JobId, ticket: Ticket, timer: DeadlineTimer) -> bool {
        match self.find_mut(job_id, Some(ticket)) {
            Some(item) if !item.is_detached() => {
                item.deadline_timer = Some(timer);
                true
            }
            _ => false,
        }
    }

    /// The earliest-enqueued item that is ready to run, if a slot is free.
    #[must_use]
    pub fn next_eligible(
        &self,
        max_concurrent: usize,
        in_flight_count: usize,
        now: Instant,
    ) -> Option<&QueueItem> {
        if in_flight_count >= max_concurrent {
            return None;
        }
        self.queued
            .iter()
            .find(|item| item.ready_at <= now && !self.in_flight.contains_key(&item.job_id))
    }

    /// Earliest `ready_at` among queued items, if any.
    #[must_use]
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.queued.iter().map(|item| item.ready_at).min()
    }

    /// Moves a queued job into the in-flight set.
    pub fn mark_in_flight(&mut self, job_id: &JobId) -> Option<Dispatch> {
        if self.in_flight.contains_key(job_id) {
            return None;
        }
        let pos = self.queued.iter().position(|item| &item.job_id == job_id)?;
        let item = self.queued.remove(pos)?;
        let dispatch = Dispatch {
            job_id: item.job_id.clone(),
            ticket: item.ticket,
            attempt: self.retries.get(job_id).copied().unwrap_or(0) + 1,
        };
        self.in_flight.insert(item.job_id.clone(), item);
        Some(dispatch)
    }

    /// Removes a job from the in-flight set if the ticket matches.
    pub fn mark_done(&mut self, job_id: &JobId, ticket: Ticket) -> Option<QueueItem> {
        match self.in_flight.get(job_id) {
            Some(item) if item.ticket == ticket => self.in_flight.remove(job_id),
            _ => None,
        }
    }

    /// Applies a pipeline outcome to an in-flight job.
    pub fn resolve(
        &mut self,
        job_id: &JobId,
        ticket: Ticket,
        outcome: PipelineOutcome,
        now: Instant,
    ) -> Resolution {
        let Some(mut item) = self.mark_done(job_id, ticket) else {
            debug!(job_id = %job_id, ticket = %ticket, "Outcome for unknown submission discarded");
            return Resolution::Discarded;
        };
        let Some(delivery) = item.delivery.take() else {
            debug!(job_id = %job_id, outcome = outcome.label(), "Outcome of detached run discarded");
            return Resolution::Discarded;
        };

        let failed_so_far = self.retries.get(job_id).copied().unwrap_or(0);
        let attempts = failed_so_far + 1;

        let response = match outcome {
            PipelineOutcome::Success(payload) => {
                Ok(JobResult::from_payload(job_id.clone(), payload, attempts))
            }
            PipelineOutcome::FatalFailure { reason } => Err(JobError::Failed {
                reason: reason.to_string(),
                attempts,
            }),
            PipelineOutcome::TimedOut { stage } => {
                debug!(job_id = %job_id, stage, "Pipeline stage timed out");
                Err(JobError::TimedOut {
                    after_ms: item.elapsed_ms(now),
                    stage: Some(stage.to_string()),
                })
            }
            PipelineOutcome::RetryableFailure { reason } => {
                match self.policy.decide(failed_so_far, classify_reason(&reason)) {
                    RetryDecision::Retry(delay) => {
                        let attempt = failed_so_far + 1;
                        self.retries.insert(job_id.clone(), attempt);
                        item.delivery = Some(delivery);
                        item.enqueued_at = now;
                        item.ready_at = now + delay;
                        self.queued.push_back(item);
                        return Resolution::Retrying { attempt, delay };
                    }
                    RetryDecision::GiveUp => Err(JobError::Failed {
                        reason: format!("retries exhausted: {reason}"),
                        attempts,
                    }),
                    RetryDecision::NotRetryable => Err(JobError::Failed {
                        reason: reason.to_string(),
                        attempts,
                    }),
                }
            }
        };

        self.retries.remove(job_id);
        Resolution::Delivered(Handoff::new(job_id.clone(), delivery, response))
    }

    /// Handles a fired submission deadline.
    ///
    /// A queued item is removed. An in-flight item is detached: the caller
    /// is answered now, the id stays reserved until the run returns.
    pub fn expire(&mut self, job_id: &JobId, ticket: Ticket, now: Instant) -> Option<Handoff> {
        self.terminate(job_id, Some(ticket), |item| JobError::TimedOut {
            after_ms: item.elapsed_ms(now),
            stage: None,
        })
    }

    /// Cancels a job with the same removal semantics as [`expire`](Self::expire).
    pub fn cancel(&mut self, job_id: &JobId) -> Option<Handoff> {
        self.terminate(job_id, None, |_| JobError::Cancelled)
    }

    /// Answers every owned job with [`JobError::Abandoned`].
    ///
    /// Queued items are removed; in-flight ones are detached.
    pub fn drain(&mut self, reason: &str) -> Vec<Handoff> {
        let mut handoffs = Vec::new();
        for mut item in self.queued.drain(..) {
            if let Some(delivery) = item.delivery.take() {
                let response = Err(JobError::Abandoned {
                    reason: reason.to_string(),
                });
                handoffs.push(Handoff::new(item.job_id.clone(), delivery, response));
            }
        }
        for item in self.in_flight.values_mut() {
            item.deadline_timer = None;
            if let Some(delivery) = item.delivery.take() {
                let response = Err(JobError::Abandoned {
                    reason: reason.to_string(),
                });
                handoffs.push(Handoff::new(item.job_id.clone(), delivery, response));
            }
        }
        self.retries.clear();
        if !handoffs.is_empty() {
            warn!(count = handoffs.len(), reason, "Drained pending jobs");
        }
        handoffs
    }

    /// Read-only snapshot.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        let mut in_flight_ids: Vec<String> =
            self.in_flight.keys().map(|id| id.as_str().to_string()).collect();
        in_flight_ids.sort();

        QueueStatus {
            queue_length: self.queued.len(),
            in_flight_count: self.in_flight.len(),
            in_flight_ids,
            max_concurrent: self.max_concurrent,
            retry_attempts: self
                .retries
                .iter()
                .map(|(id, n)| (id.as_str().to_string(), *n))
                .collect(),
            detached_count: self.in_flight.values().filter(|i| i.is_detached()).count(),
        }
    }

    fn find_mut(&mut self, job_id: &JobId, ticket: Option<Ticket>) -> Option<&mut QueueItem> {
        let matches = |item: &QueueItem| ticket.map_or(true, |t| item.ticket == t);
        if let Some(item) = self.in_flight.get_mut(job_id) {
            return matches(&*item).then_some(item);
        }
        self.queued
            .iter_mut()
            .find(|item| &item.job_id == job_id && matches(item))
    }

    fn terminate<F>(&mut self, job_id: &JobId, ticket: Option<Ticket>, error: F) -> Option<Handoff>
    where
        F: FnOnce(&QueueItem) -> JobError,
    {
        let matches = |item: &QueueItem| ticket.map_or(true, |t| item.ticket == t);

        if let Some(item) = self.in_flight.get_mut(job_id) {
            if !matches(&*item) {
                return None;
            }
            let delivery = item.delivery.take()?;
            item.deadline_timer = None;
            let response = Err(error(&*item));
            self.retries.remove(job_id);
            debug!(job_id = %job_id, "In-flight job detached");
            return Some(Handoff::new(job_id.clone(), delivery, response));
        }

        let pos = self
            .queued
            .iter()
            .position(|item| &item.job_id == job_id && matches(item))?;
        let mut item = self.queued.remove(pos)?;
        let delivery = item.delivery.take()?;
        let response = Err(error(&item));
        self.retries.remove(job_id);
        debug!(job_id = %job_id, "Queued job removed");
        Some(Handoff::new(job_id.clone(), delivery, response))
    }
}
