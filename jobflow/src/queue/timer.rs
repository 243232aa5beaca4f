//! Deadline timers owned by queue items.

use tokio::task::AbortHandle;

/// Handle to a spawned deadline task.
///
/// Dropping the handle aborts the task, so a resolved item never fires its
/// deadline.
#[derive(Debug)]
pub struct DeadlineTimer {
    handle: AbortHandle,
}

impl DeadlineTimer {
    /// Wraps the abort handle of a spawned timer task.
    #[must_use]
    pub fn new(handle: AbortHandle) -> Self {
        Self { handle }
    }

    /// Returns true once the task has finished or been aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
