//! Removal of orphaned artifacts left behind by crashed runs.

use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::ARTIFACT_EXTENSION;

/// Counters from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries examined.
    pub scanned: usize,
    /// Entries deleted.
    pub removed: usize,
    /// Entries that could not be inspected or deleted.
    pub failed: usize,
}

/// Deletes staged artifacts in `root` whose modification time is older than `max_age`.
///
/// Only regular files with the artifact extension are touched. A missing
/// root is an empty sweep. Failures on one entry are logged and counted;
/// the sweep continues with the rest.
pub async fn sweep_dir(root: &Path, max_age: Duration) -> SweepReport {
    sweep_with(root, max_age, |path| async move { tokio::fs::remove_file(path).await }).await
}

fn is_artifact(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION)
}

pub(crate) async fn sweep_with<F, Fut>(root: &Path, max_age: Duration, mut remove: F) -> SweepReport
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let mut report = SweepReport::default();

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Cannot read artifact directory");
            report.failed += 1;
            return report;
        }
    };

    let now = SystemTime::now();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Error while listing artifacts");
                report.failed += 1;
                break;
            }
        };
        let path = entry.path();
        if !is_artifact(&path) {
            continue;
        }
        report.scanned += 1;

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat artifact");
                report.failed += 1;
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        // Clock skew can put mtime in the future; treat that as brand new.
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match remove(path.clone()).await {
            Ok(()) => {
                debug!(path = %path.display(), age_secs = age.as_secs(), "Swept stale artifact");
                report.removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to sweep artifact");
                report.failed += 1;
            }
        }
    }

    if report.removed > 0 || report.failed > 0 {
        info!(
            root = %root.display(),
            scanned = report.scanned,
            removed = report.removed,
            failed = report.failed,
            "Artifact sweep finished"
        );
    }
    report
}
