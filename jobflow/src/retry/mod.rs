//! Retry classification and backoff.
//!
//! A pure decision layer: given an error it answers "retry or not", and
//! given an attempt count it answers "how long to wait". The admission
//! queue owns the per-job counters.

mod classify;
mod policy;

pub use classify::{classify, classify_reason, classify_signal, RetryClass};
pub use policy::{JitterStrategy, RetryDecision, RetryPolicy};
