//! Scoped ownership of one temporary artifact file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::JobId;

/// A temporary artifact on local disk, owned by exactly one pipeline run.
///
/// Call [`ArtifactHandle::release`] when done. If the handle is dropped
/// without being released (a deadline dropped the pipeline future, or the
/// task panicked), `Drop` removes the file synchronously.
#[derive(Debug)]
pub struct ArtifactHandle {
    job_id: JobId,
    path: PathBuf,
    released: bool,
}

impl ArtifactHandle {
    pub(crate) fn new(job_id: JobId, path: PathBuf) -> Self {
        Self {
            job_id,
            path,
            released: false,
        }
    }

    /// The job that owns this artifact.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Location of the artifact on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file if it exists.
    ///
    /// Returns true if a file was removed. Never fails: errors are logged.
    pub async fn release(mut self) -> bool {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(job_id = %self.job_id, path = %self.path.display(), "Released artifact");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(
                    job_id = %self.job_id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to release artifact"
                );
                false
            }
        }
    }
}

impl Drop for ArtifactHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(job_id = %self.job_id, path = %self.path.display(), "Released artifact on drop");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    job_id = %self.job_id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to release artifact on drop"
                );
            }
        }
    }
}
