//! Lifecycle events emitted by the scheduler.
//!
//! Events are fire-and-forget: a sink must never slow down or fail an
//! admission decision.

mod kind;
mod sink;

pub use kind::JobEventKind;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
