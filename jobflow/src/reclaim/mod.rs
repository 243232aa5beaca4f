//! Temporary artifact allocation and reclamation.
//!
//! Every pipeline run stages its artifact in a private file under the
//! reclaimer's root. Files are released by the run itself on every exit
//! path; a periodic sweep removes anything a crashed process left behind.

mod handle;
mod sweep;

pub use handle::ArtifactHandle;
pub use sweep::{sweep_dir, SweepReport};

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cancellation::CancellationToken;
use crate::config::ReclaimConfig;
use crate::core::JobId;

/// Extension used for staged artifacts.
pub const ARTIFACT_EXTENSION: &str = "part";

/// When and how aggressively the background sweeper runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    /// Period between sweeps.
    pub interval: Duration,
    /// Age threshold for periodic sweeps.
    pub max_age: Duration,
    /// Age threshold for the sweep run once at startup.
    pub startup_max_age: Duration,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
            max_age: Duration::from_secs(10 * 60),
            startup_max_age: Duration::from_secs(30 * 60),
        }
    }
}

impl From<&ReclaimConfig> for SweepSchedule {
    fn from(config: &ReclaimConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sweep_interval_secs),
            max_age: Duration::from_secs(config.max_age_secs),
            startup_max_age: Duration::from_secs(config.startup_max_age_secs),
        }
    }
}

/// Allocates, releases and sweeps temporary artifacts under one directory.
#[derive(Debug, Clone)]
pub struct Reclaimer {
    root: PathBuf,
}

impl Reclaimer {
    /// Creates a reclaimer rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a reclaimer from configuration.
    #[must_use]
    pub fn from_config(config: &ReclaimConfig) -> Self {
        Self::new(config.temp_dir.clone())
    }

    /// The directory artifacts live in.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserves a unique artifact path for `job_id`.
    ///
    /// The name combines a sanitised form of the id, a millisecond
    /// timestamp and a random suffix, so a retried job never collides with
    /// its previous attempt's leftovers.
    pub async fn allocate(&self, job_id: &JobId) -> std::io::Result<ArtifactHandle> {
        tokio::fs::create_dir_all(&self.root).await?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let token = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{millis}-{}.{ARTIFACT_EXTENSION}",
            job_id.file_stem(),
            &token[..8]
        );

        let path = self.root.join(name);
        debug!(job_id = %job_id, path = %path.display(), "Allocated artifact");
        Ok(ArtifactHandle::new(job_id.clone(), path))
    }

    /// Releases an artifact. Idempotent and infallible.
    pub async fn release(&self, handle: ArtifactHandle) -> bool {
        handle.release().await
    }

    /// Runs one sweep with the given age threshold.
    pub async fn sweep(&self, max_age: Duration) -> SweepReport {
        sweep_dir(&self.root, max_age).await
    }

    /// Spawns the background sweeper.
    ///
    /// Sweeps once immediately with `startup_max_age`, then every
    /// `interval` with `max_age`, until `shutdown` is cancelled.
    pub fn spawn_sweeper(&self, schedule: SweepSchedule, shutdown: CancellationToken) -> JoinHandle<()> {
        let root = self.root.clone();
        tokio::spawn(async move {
            let report = sweep_dir(&root, schedule.startup_max_age).await;
            info!(
                root = %root.display(),
                removed = report.removed,
                "Startup artifact sweep complete"
            );

            let mut interval = tokio::time::interval(schedule.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the startup sweep covered it.
            interval.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        sweep_dir(&root, schedule.max_age).await;
                    }
                }
            }
            debug!(root = %root.display(), "Artifact sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_allocate_names_are_unique_and_namespaced() {
        let dir = tempfile::tempdir().unwrap();
        let reclaimer = Reclaimer::new(dir.path());
        let job = JobId::new("report/2024");

        let a = reclaimer.allocate(&job).await.unwrap();
        let b = reclaimer.allocate(&job).await.unwrap();

        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir.path()));
        let name = a.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("report_2024-"));
        assert!(name.ends_with(".part"));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let reclaimer = Reclaimer::new(dir.path());

        let handle = reclaimer.allocate(&JobId::new("a")).await.unwrap();
        let path = handle.path().to_path_buf();
        tokio::fs::write(&path, b"bytes").await.unwrap();

        assert!(reclaimer.release(handle).await);
        assert!(!path.exists());

        // Never written: release is a no-op.
        let handle = reclaimer.allocate(&JobId::new("b")).await.unwrap();
        assert!(!reclaimer.release(handle).await);
    }

    #[tokio::test]
    async fn test_drop_removes_unreleased_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let reclaimer = Reclaimer::new(dir.path());

        let handle = reclaimer.allocate(&JobId::new("dropped")).await.unwrap();
        let path = handle.path().to_path_buf();
        tokio::fs::write(&path, b"bytes").await.unwrap();

        drop(handle);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_sweep_respects_age_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let reclaimer = Reclaimer::new(dir.path());
        for name in ["one.part", "two.part"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let report = reclaimer.sweep(Duration::from_secs(3600)).await;
        assert_eq!(report.removed, 0);
        assert_eq!(report.scanned, 2);

        let report = reclaimer.sweep(Duration::ZERO).await;
        assert_eq!(report.removed, 2);
        assert_eq!(report.failed, 0);
        assert!(dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reclaimer = Reclaimer::new(dir.path().join("does-not-exist"));

        assert_eq!(reclaimer.sweep(Duration::ZERO).await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweeper_runs_startup_pass_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("orphan.part"), b"x").await.unwrap();

        let reclaimer = Reclaimer::new(dir.path());
        let shutdown = CancellationToken::new();
        let schedule = SweepSchedule {
            interval: Duration::from_secs(60),
            max_age: Duration::ZERO,
            startup_max_age: Duration::ZERO,
        };

        let handle = reclaimer.spawn_sweeper(schedule, shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!dir.path().join("orphan.part").exists());

        shutdown.cancel("test");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
