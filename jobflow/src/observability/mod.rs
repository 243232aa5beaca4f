//! Logging bootstrap and span helpers.

mod logging;
mod spans;

pub use logging::{init_logging, LogFormat, DEFAULT_FILTER};
pub use spans::job_span;
