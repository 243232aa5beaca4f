//! Configuration for the engine and its components.
//!
//! Every field has a serde default, so a partial JSON document (or none at
//! all) yields a usable configuration. `JOBFLOW_*` environment variables
//! override the most commonly tuned values.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::JobflowError;
use crate::ports::InferenceTier;
use crate::retry::RetryPolicy;

const MIB: u64 = 1024 * 1024;

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admission and scheduling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Retry budget and backoff.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Pipeline stages.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Temporary artifact handling.
    #[serde(default)]
    pub reclaim: ReclaimConfig,
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum pipelines running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Safety-net tick period in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Caller-facing deadline per submission, in milliseconds.
    #[serde(default = "default_submission_timeout_ms")]
    pub submission_timeout_ms: u64,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_submission_timeout_ms() -> u64 {
    10 * 60 * 1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            tick_interval_ms: default_tick_interval_ms(),
            submission_timeout_ms: default_submission_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Creates a scheduler configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency ceiling.
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Sets the tick period.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the submission deadline.
    #[must_use]
    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout_ms = duration_ms(timeout);
        self
    }

    /// Gets the tick period as Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Gets the submission deadline as Duration.
    #[must_use]
    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }
}

/// Inference deadlines by payload size class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceDeadlines {
    /// Upper bound of the small class, in bytes.
    #[serde(default = "default_small_max_bytes")]
    pub small_max_bytes: u64,
    /// Deadline for small payloads, in milliseconds.
    #[serde(default = "default_small_timeout_ms")]
    pub small_timeout_ms: u64,
    /// Upper bound of the medium class, in bytes.
    #[serde(default = "default_medium_max_bytes")]
    pub medium_max_bytes: u64,
    /// Deadline for medium payloads, in milliseconds.
    #[serde(default = "default_medium_timeout_ms")]
    pub medium_timeout_ms: u64,
    /// Deadline for anything larger, in milliseconds.
    #[serde(default = "default_large_timeout_ms")]
    pub large_timeout_ms: u64,
}

fn default_small_max_bytes() -> u64 {
    5 * MIB
}

fn default_small_timeout_ms() -> u64 {
    60_000
}

fn default_medium_max_bytes() -> u64 {
    20 * MIB
}

fn default_medium_timeout_ms() -> u64 {
    120_000
}

fn default_large_timeout_ms() -> u64 {
    300_000
}

impl Default for InferenceDeadlines {
    fn default() -> Self {
        Self {
            small_max_bytes: default_small_max_bytes(),
            small_timeout_ms: default_small_timeout_ms(),
            medium_max_bytes: default_medium_max_bytes(),
            medium_timeout_ms: default_medium_timeout_ms(),
            large_timeout_ms: default_large_timeout_ms(),
        }
    }
}

impl InferenceDeadlines {
    /// Deadline for a single inference call on a payload of `size` bytes.
    #[must_use]
    pub fn for_size(&self, size: u64) -> Duration {
        let millis = if size <= self.small_max_bytes {
            self.small_timeout_ms
        } else if size <= self.medium_max_bytes {
            self.medium_timeout_ms
        } else {
            self.large_timeout_ms
        };
        Duration::from_millis(millis)
    }
}

/// Pipeline executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Deadline for the fetch stage, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Deadline for one record-store call, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Deadline for a whole pipeline run, in milliseconds.
    #[serde(default = "default_pipeline_timeout_ms")]
    pub pipeline_timeout_ms: u64,
    /// Largest artifact accepted, in bytes.
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
    /// Per-call inference deadlines.
    #[serde(default)]
    pub inference_deadlines: InferenceDeadlines,
    /// Inference tiers, tried in order.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<InferenceTier>,
    /// Task descriptor sent with every artifact.
    #[serde(default = "default_task")]
    pub task: String,
}

fn default_fetch_timeout_ms() -> u64 {
    60_000
}

fn default_store_timeout_ms() -> u64 {
    30_000
}

fn default_pipeline_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_max_artifact_bytes() -> u64 {
    50 * MIB
}

fn default_tiers() -> Vec<InferenceTier> {
    vec![
        InferenceTier::new("lite", 5 * MIB),
        InferenceTier::new("standard", 20 * MIB),
        InferenceTier::new("extended", 50 * MIB),
    ]
}

fn default_task() -> String {
    "Extract the content of this document as a single JSON object. \
     Respond with JSON only."
        .to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            pipeline_timeout_ms: default_pipeline_timeout_ms(),
            max_artifact_bytes: default_max_artifact_bytes(),
            inference_deadlines: InferenceDeadlines::default(),
            tiers: default_tiers(),
            task: default_task(),
        }
    }
}

impl ExecutorConfig {
    /// Creates an executor configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the artifact size ceiling.
    #[must_use]
    pub fn with_max_artifact_bytes(mut self, bytes: u64) -> Self {
        self.max_artifact_bytes = bytes;
        self
    }

    /// Replaces the tier list.
    #[must_use]
    pub fn with_tiers(mut self, tiers: Vec<InferenceTier>) -> Self {
        self.tiers = tiers;
        self
    }

    /// Sets the task descriptor.
    #[must_use]
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    /// Sets the pipeline deadline.
    #[must_use]
    pub fn with_pipeline_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline_timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets the fetch deadline.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = duration_ms(timeout);
        self
    }

    /// Gets the fetch deadline as Duration.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Gets the store-call deadline as Duration.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Gets the pipeline deadline as Duration.
    #[must_use]
    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline_timeout_ms)
    }
}

/// Temporary artifact settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimConfig {
    /// Directory for staged artifacts.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Period between sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Age after which a periodic sweep deletes an artifact, in seconds.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Age threshold for the startup sweep, in seconds.
    #[serde(default = "default_startup_max_age_secs")]
    pub startup_max_age_secs: u64,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("jobflow")
}

fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

fn default_max_age_secs() -> u64 {
    10 * 60
}

fn default_startup_max_age_secs() -> u64 {
    30 * 60
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_age_secs: default_max_age_secs(),
            startup_max_age_secs: default_startup_max_age_secs(),
        }
    }
}

impl ReclaimConfig {
    /// Sets the artifact directory.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, JobflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, JobflowError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Applies `JOBFLOW_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, JobflowError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, JobflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, JobflowError> {
            raw.trim()
                .parse()
                .map_err(|_| JobflowError::Config(format!("{key}: cannot parse '{raw}'")))
        }

        if let Some(raw) = lookup("JOBFLOW_MAX_CONCURRENT") {
            self.scheduler.max_concurrent = parse("JOBFLOW_MAX_CONCURRENT", &raw)?;
        }
        if let Some(raw) = lookup("JOBFLOW_SUBMISSION_TIMEOUT_MS") {
            self.scheduler.submission_timeout_ms = parse("JOBFLOW_SUBMISSION_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("JOBFLOW_MAX_RETRIES") {
            self.retry.max_retries = parse("JOBFLOW_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("JOBFLOW_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse("JOBFLOW_BASE_DELAY_MS", &raw)?;
        }
        if let Some(raw) = lookup("JOBFLOW_TEMP_DIR") {
            self.reclaim.temp_dir = PathBuf::from(raw);
        }
        Ok(self)
    }

    /// Checks invariants the engine depends on.
    pub fn validate(&self) -> Result<(), JobflowError> {
        if self.scheduler.max_concurrent == 0 {
            return Err(JobflowError::Config("scheduler.max_concurrent must be at least 1".into()));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(JobflowError::Config("scheduler.tick_interval_ms must be positive".into()));
        }
        if self.executor.tiers.is_empty() {
            return Err(JobflowError::Config("executor.tiers must not be empty".into()));
        }
        if self.executor.task.trim().is_empty() {
            return Err(JobflowError::Config("executor.task must not be empty".into()));
        }
        // A sweep must never see a live run's artifact as stale.
        let pipeline = self.executor.pipeline_timeout();
        let sweep_age = Duration::from_secs(
            self.reclaim.max_age_secs.min(self.reclaim.startup_max_age_secs),
        );
        if sweep_age <= pipeline {
            return Err(JobflowError::Config(format!(
                "reclaim max age ({}s) must exceed executor.pipeline_timeout_ms ({}ms)",
                sweep_age.as_secs(),
                self.executor.pipeline_timeout_ms
            )));
        }
        Ok(())
    }

    /// Loads configuration for a process: optional file, then environment, then validation.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)
                .with_context(|| format!("reading config from {}", path.display()))?,
            None => Self::default(),
        };
        let config = config
            .with_env_overrides()
            .context("applying JOBFLOW_* overrides")?;
        config.validate().context("validating config")?;
        Ok(config)
    }
}
