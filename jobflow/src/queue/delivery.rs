//! One-shot delivery of a job's result to its caller.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::warn;

use crate::core::{JobId, JobResponse};
use crate::errors::JobError;

type Callback = Box<dyn FnOnce(JobResponse) + Send + 'static>;

enum Sink {
    Channel(oneshot::Sender<JobResponse>),
    Callback(Callback),
}

/// Capability to answer the caller that submitted a job.
///
/// Delivering consumes the value, so a capability can be used at most once.
/// The admission queue holds it until the job resolves.
pub struct Delivery {
    sink: Sink,
}

impl Delivery {
    /// Creates a channel-backed delivery and the receiver the caller awaits.
    #[must_use]
    pub fn channel() -> (Self, DeliveryReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sink: Sink::Channel(tx),
            },
            DeliveryReceiver { rx },
        )
    }

    /// Creates a callback-backed delivery.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: FnOnce(JobResponse) + Send + 'static,
    {
        Self {
            sink: Sink::Callback(Box::new(callback)),
        }
    }

    /// Hands the response to the caller.
    ///
    /// Returns false if the caller went away (receiver dropped) or the
    /// callback panicked. Panics in callbacks are logged and suppressed.
    pub fn deliver(self, response: JobResponse) -> bool {
        match self.sink {
            Sink::Channel(tx) => tx.send(response).is_ok(),
            Sink::Callback(callback) => {
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(response))) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Delivery callback panicked: {:?}", e);
                        false
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.sink {
            Sink::Channel(_) => "channel",
            Sink::Callback(_) => "callback",
        };
        f.debug_struct("Delivery").field("kind", &kind).finish()
    }
}

/// Future resolving to the response of a submitted job.
#[derive(Debug)]
pub struct DeliveryReceiver {
    rx: oneshot::Receiver<JobResponse>,
}

impl DeliveryReceiver {
    /// Returns the response if it has already been delivered.
    pub fn try_recv(&mut self) -> Option<JobResponse> {
        self.rx.try_recv().ok()
    }
}

impl Future for DeliveryReceiver {
    type Output = JobResponse;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(JobError::Abandoned {
                    reason: "delivery dropped without a response".to_string(),
                })
            })
        })
    }
}

/// A response bound to the delivery that must carry it.
///
/// Produced by the admission queue while it holds its lock; the scheduler
/// calls [`Handoff::deliver`] after releasing it. A handoff dropped without
/// an explicit delivery still delivers, so the response is never lost.
#[must_use = "a handoff must be delivered"]
pub struct Handoff {
    job_id: JobId,
    pending: Option<(Delivery, JobResponse)>,
}

impl Handoff {
    pub(crate) fn new(job_id: JobId, delivery: Delivery, response: JobResponse) -> Self {
        Self {
            job_id,
            pending: Some((delivery, response)),
        }
    }

    /// The job being answered.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The response about to be delivered.
    #[must_use]
    pub fn response(&self) -> Option<&JobResponse> {
        self.pending.as_ref().map(|(_, response)| response)
    }

    /// Delivers the response. Returns false if the caller is gone.
    pub fn deliver(mut self) -> bool {
        self.send()
    }

    fn send(&mut self) -> bool {
        match self.pending.take() {
            Some((delivery, response)) => delivery.deliver(response),
            None => false,
        }
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        self.send();
    }
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("job_id", &self.job_id)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_channel_delivery() {
        let (delivery, receiver) = Delivery::channel();
        assert!(delivery.deliver(Err(JobError::Cancelled)));
        assert_eq!(receiver.await, Err(JobError::Cancelled));
    }

    #[tokio::test]
    async fn test_dropped_delivery_resolves_abandoned() {
        let (delivery, receiver) = Delivery::channel();
        drop(delivery);
        assert!(matches!(receiver.await, Err(JobError::Abandoned { .. })));
    }

    #[test]
    fn test_channel_delivery_to_dropped_receiver() {
        let (delivery, receiver) = Delivery::channel();
        drop(receiver);
        assert!(!delivery.deliver(Err(JobError::Cancelled)));
    }

    #[test]
    fn test_callback_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let delivery = Delivery::from_fn(move |response| sink.lock().push(response));

        assert!(delivery.deliver(Err(JobError::Cancelled)));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let delivery = Delivery::from_fn(|_| panic!("Intentional"));
        assert!(!delivery.deliver(Err(JobError::Cancelled)));
    }

    #[test]
    fn test_handoff_delivers_once_even_when_dropped() {
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let delivery = Delivery::from_fn(move |_| *counter.lock() += 1);

        let handoff = Handoff::new(JobId::new("a"), delivery, Err(JobError::Cancelled));
        assert!(handoff.response().is_some());
        drop(handoff);
        assert_eq!(*count.lock(), 1);

        let counter = count.clone();
        let delivery = Delivery::from_fn(move |_| *counter.lock() += 1);
        let handoff = Handoff::new(JobId::new("b"), delivery, Err(JobError::Cancelled));
        assert!(handoff.deliver());
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_try_recv() {
        let (delivery, mut receiver) = Delivery::channel();
        assert!(receiver.try_recv().is_none());
        delivery.deliver(Err(JobError::Cancelled));
        assert_eq!(receiver.try_recv(), Some(Err(JobError::Cancelled)));
    }
}
