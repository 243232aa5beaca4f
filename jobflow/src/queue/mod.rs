//! Admission control for submitted jobs.
//!
//! - [`AdmissionQueue`]: dedup, FIFO ordering, retry counters, in-flight set
//! - [`Delivery`]: one-shot answer capability for the submitting caller
//! - [`DeadlineTimer`]: abort-on-drop handle for submission deadlines

mod admission;
mod delivery;
mod timer;

pub use admission::{AdmissionQueue, Dispatch, QueueItem, Resolution};
pub use delivery::{Delivery, DeliveryReceiver, Handoff};
pub use timer::DeadlineTimer;
