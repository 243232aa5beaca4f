//! The fetch → infer → persist pipeline.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{normalize_output, JobRunner};
use crate::config::ExecutorConfig;
use crate::core::{JobId, JobPayload, PipelineOutcome, UsageMetadata};
use crate::errors::{CollaboratorError, ErrorSignal, FailureReason};
use crate::ports::{
    ArtifactMeta, ArtifactSource, InferenceReply, InferenceRequest, InferenceService,
    InferenceTier, JobRecord, RecordStore,
};
use crate::reclaim::Reclaimer;
use crate::retry::{classify, RetryClass};

/// Early exit from a stage carries the final outcome.
type StageResult<T> = Result<T, PipelineOutcome>;

fn collaborator_failure(stage: &'static str, err: CollaboratorError) -> PipelineOutcome {
    let class = classify(&err);
    let reason = FailureReason::collaborator(stage, err);
    match class {
        RetryClass::Retryable => PipelineOutcome::retryable(reason),
        RetryClass::Fatal => PipelineOutcome::fatal(reason),
    }
}

fn local_io(err: std::io::Error) -> PipelineOutcome {
    PipelineOutcome::fatal(err)
}

fn timeout_error(what: &str, limit: Duration) -> CollaboratorError {
    CollaboratorError::new(
        ErrorSignal::Timeout,
        format!("{what} exceeded {}ms", limit.as_millis()),
    )
}

/// Production [`JobRunner`] backed by the three collaborators.
///
/// Every attempt stages the artifact in a file allocated by the
/// [`Reclaimer`]. The file is released on every exit path, including the
/// pipeline future being dropped when the total deadline fires.
pub struct PipelineExecutor {
    source: Arc<dyn ArtifactSource>,
    inference: Arc<dyn InferenceService>,
    store: Arc<dyn RecordStore>,
    reclaimer: Reclaimer,
    config: ExecutorConfig,
    task: Arc<str>,
}

impl PipelineExecutor {
    /// Creates an executor.
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        inference: Arc<dyn InferenceService>,
        store: Arc<dyn RecordStore>,
        reclaimer: Reclaimer,
        config: ExecutorConfig,
    ) -> Self {
        let task: Arc<str> = Arc::from(config.task.as_str());
        Self {
            source,
            inference,
            store,
            reclaimer,
            config,
            task,
        }
    }

    /// The executor configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// The reclaimer used for staging files.
    #[must_use]
    pub fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    async fn run_stages(&self, job_id: &JobId) -> StageResult<JobPayload> {
        if let Some(payload) = self.cached(job_id).await? {
            info!(job_id = %job_id, "Served from record store");
            return Ok(payload);
        }

        let artifact = self.reclaimer.allocate(job_id).await.map_err(local_io)?;
        let result = self.process(job_id, artifact.path()).await;
        self.reclaimer.release(artifact).await;
        result
    }

    async fn process(&self, job_id: &JobId, path: &Path) -> StageResult<JobPayload> {
        let meta = self.fetch(job_id, path).await?;

        let data: Arc<[u8]> = tokio::fs::read(path).await.map_err(local_io)?.into();
        let (reply, tier) = self.infer(job_id, &meta, data).await?;

        let output = normalize_output(&reply.text);
        self.persist(job_id, &output, &reply.usage, &tier.name).await?;

        Ok(JobPayload::fresh(output, reply.usage, tier.name.clone()))
    }

    async fn cached(&self, job_id: &JobId) -> StageResult<Option<JobPayload>> {
        let limit = self.config.store_timeout();
        let record = match timeout(limit, self.store.get(job_id)).await {
            Ok(Ok(record)) => record,
            Ok(Err(err)) => return Err(collaborator_failure("cache", err)),
            Err(_) => return Err(collaborator_failure("cache", timeout_error("record lookup", limit))),
        };

        Ok(record.map(|record| {
            let mut payload = JobPayload::cached(record.output, record.usage);
            payload.tier = record.tier;
            payload
        }))
    }

    async fn fetch(&self, job_id: &JobId, path: &Path) -> StageResult<ArtifactMeta> {
        let limit = self.config.fetch_timeout();
        match timeout(limit, self.download(job_id, path)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(job_id = %job_id, timeout_ms = limit.as_millis() as u64, "Fetch timed out");
                Err(PipelineOutcome::TimedOut { stage: "fetch" })
            }
        }
    }

    async fn download(&self, job_id: &JobId, path: &Path) -> StageResult<ArtifactMeta> {
        let ceiling = self.config.max_artifact_bytes;

        let meta = self
            .source
            .describe(job_id)
            .await
            .map_err(|e| collaborator_failure("fetch", e))?;
        if meta.size > ceiling {
            return Err(PipelineOutcome::fatal(FailureReason::TooLarge {
                size: meta.size,
                limit: ceiling,
            }));
        }

        let mut stream = self
            .source
            .open(job_id)
            .await
            .map_err(|e| collaborator_failure("fetch", e))?;
        let mut file = tokio::fs::File::create(path).await.map_err(local_io)?;

        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| collaborator_failure("fetch", e))?;
            written += chunk.len() as u64;
            if written > ceiling {
                return Err(PipelineOutcome::fatal(FailureReason::TooLarge {
                    size: written,
                    limit: ceiling,
                }));
            }
            file.write_all(&chunk).await.map_err(local_io)?;
        }
        file.flush().await.map_err(local_io)?;

        debug!(job_id = %job_id, bytes = written, mime = %meta.mime_type, "Artifact staged");
        Ok(ArtifactMeta {
            size: written,
            ..meta
        })
    }

    async fn infer(
        &self,
        job_id: &JobId,
        meta: &ArtifactMeta,
        data: Arc<[u8]>,
    ) -> StageResult<(InferenceReply, &InferenceTier)> {
        let size = data.len() as u64;
        let deadline = self.config.inference_deadlines.for_size(size);
        let mut last_error = None;

        for tier in self.config.tiers.iter().filter(|tier| tier.accepts(size)) {
            let request = InferenceRequest {
                job_id: job_id.clone(),
                data: data.clone(),
                mime_hint: meta.mime_type.clone(),
                task: self.task.clone(),
            };

            match timeout(deadline, self.inference.infer(tier, request)).await {
                Ok(Ok(reply)) => {
                    debug!(job_id = %job_id, tier = %tier.name, "Inference succeeded");
                    return Ok((reply, tier));
                }
                Ok(Err(err)) => {
                    warn!(job_id = %job_id, tier = %tier.name, error = %err, "Inference tier failed");
                    last_error = Some(err);
                }
                Err(_) => {
                    warn!(job_id = %job_id, tier = %tier.name, timeout_ms = deadline.as_millis() as u64, "Inference tier timed out");
                    last_error = Some(timeout_error(&format!("tier '{}'", tier.name), deadline));
                }
            }
        }

        match last_error {
            Some(err) => Err(collaborator_failure("infer", err)),
            None => Err(PipelineOutcome::fatal(FailureReason::NoEligibleTier { size })),
        }
    }

    async fn persist(
        &self,
        job_id: &JobId,
        output: &serde_json::Value,
        usage: &UsageMetadata,
        tier: &str,
    ) -> StageResult<()> {
        let record = JobRecord::new(job_id.clone(), output.clone(), usage.clone()).with_tier(tier);
        let limit = self.config.store_timeout();
        match timeout(limit, self.store.put(record)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(collaborator_failure("persist", err)),
            Err(_) => Err(collaborator_failure("persist", timeout_error("record write", limit))),
        }
    }
}

#[async_trait]
impl JobRunner for PipelineExecutor {
    async fn run(&self, job_id: &JobId) -> PipelineOutcome {
        let started = Instant::now();
        let limit = self.config.pipeline_timeout();

        let outcome = match timeout(limit, self.run_stages(job_id)).await {
            Ok(Ok(payload)) => PipelineOutcome::Success(payload),
            Ok(Err(outcome)) => outcome,
            Err(_) => PipelineOutcome::TimedOut { stage: "pipeline" },
        };

        debug!(
            job_id = %job_id,
            outcome = outcome.label(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Pipeline finished"
        );
        outcome
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("reclaimer", &self.reclaimer)
            .field("tiers", &self.config.tiers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryRecordStore;
    use crate::testing::{FlakyRecordStore, MemorySource, ScriptedInference};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        source: Arc<MemorySource>,
        inference: Arc<ScriptedInference>,
        store: Arc<InMemoryRecordStore>,
        executor: PipelineExecutor,
        dir: TempDir,
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig::new()
            .with_max_artifact_bytes(1024)
            .with_tiers(vec![
                InferenceTier::new("lite", 16),
                InferenceTier::new("standard", 256),
                InferenceTier::new("extended", 1024),
            ])
    }

    fn harness(config: ExecutorConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemorySource::new());
        let inference = Arc::new(ScriptedInference::new(r#"{"answer": 42}"#));
        let store = Arc::new(InMemoryRecordStore::new());
        let executor = PipelineExecutor::new(
            source.clone(),
            inference.clone(),
            store.clone(),
            Reclaimer::new(dir.path()),
            config,
        );
        Harness {
            source,
            inference,
            store,
            executor,
            dir,
        }
    }

    fn staged_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_success_persists_and_cleans_up() {
        let h = harness(config());
        h.source.insert("doc-1", b"hello world".to_vec(), "text/plain");

        let outcome = h.executor.run(&JobId::new("doc-1")).await;
        let PipelineOutcome::Success(payload) = outcome else {
            panic!("expected success, got {outcome:?}");
        };

        assert_eq!(payload.output, json!({"answer": 42}));
        assert!(!payload.cached);
        assert_eq!(payload.tier.as_deref(), Some("lite"));

        let record = h.store.get(&JobId::new("doc-1")).await.unwrap().unwrap();
        assert_eq!(record.output, json!({"answer": 42}));
        assert_eq!(record.tier.as_deref(), Some("lite"));
        assert_eq!(staged_files(&h.dir), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch_and_infer() {
        let h = harness(config());
        let record = JobRecord::new(JobId::new("doc-1"), json!({"from": "cache"}), UsageMetadata::new(3, 4))
            .with_tier("standard");
        h.store.put(record).await.unwrap();

        let outcome = h.executor.run(&JobId::new("doc-1")).await;
        let PipelineOutcome::Success(payload) = outcome else {
            panic!("expected success, got {outcome:?}");
        };

        assert!(payload.cached);
        assert_eq!(payload.output, json!({"from": "cache"}));
        assert_eq!(payload.tier.as_deref(), Some("standard"));
        assert_eq!(h.source.describe_calls(), 0);
        assert_eq!(h.inference.call_count(), 0);
    }

    #[tokio::test]
    async fn test_declared_size_over_ceiling_is_fatal_before_transfer() {
        let h = harness(config());
        h.source.insert("big", vec![0u8; 8], "application/pdf");
        h.source.declare_size("big", 4096);

        let outcome = h.executor.run(&JobId::new("big")).await;
        assert!(matches!(
            outcome,
            PipelineOutcome::FatalFailure {
                reason: FailureReason::TooLarge { size: 4096, limit: 1024 }
            }
        ));
        assert_eq!(h.source.open_calls(), 0);
        assert_eq!(staged_files(&h.dir), 0);
    }

    #[tokio::test]
    async fn test_stream_over_ceiling_is_fatal() {
        let h = harness(config());
        h.source.insert("liar", vec![1u8; 2000], "application/pdf");
        h.source.declare_size("liar", 10);

        let outcome = h.executor.run(&JobId::new("liar")).await;
        assert!(matches!(
            outcome,
            PipelineOutcome::FatalFailure {
                reason: FailureReason::TooLarge { limit: 1024, .. }
            }
        ));
        assert_eq!(h.inference.call_count(), 0);
        assert_eq!(staged_files(&h.dir), 0);
    }

    #[tokio::test]
    async fn test_tier_selection_skips_small_tiers() {
        let h = harness(config());
        h.source.insert("mid", vec![7u8; 100], "image/png");

        let outcome = h.executor.run(&JobId::new("mid")).await;
        assert!(outcome.is_success());
        assert_eq!(h.inference.calls(), vec!["standard".to_string()]);
    }

    #[tokio::test]
    async fn test_tier_failure_falls_through() {
        let h = harness(config());
        h.source.insert("doc", b"tiny".to_vec(), "text/plain");
        h.inference
            .push_error(CollaboratorError::new(ErrorSignal::Overloaded, "busy"));

        let outcome = h.executor.run(&JobId::new("doc")).await;
        let PipelineOutcome::Success(payload) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(payload.tier.as_deref(), Some("standard"));
        assert_eq!(h.inference.calls(), vec!["lite", "standard"]);
    }

    #[tokio::test]
    async fn test_all_tiers_failing_is_retryable() {
        let h = harness(config());
        h.source.insert("doc", vec![1u8; 300], "text/plain");
        h.inference
            .set_default_error(CollaboratorError::from_status(503, "down"));

        let outcome = h.executor.run(&JobId::new("doc")).await;
        assert!(matches!(outcome, PipelineOutcome::RetryableFailure { .. }));
        assert_eq!(h.inference.calls(), vec!["extended"]);
        assert_eq!(staged_files(&h.dir), 0);
    }

    #[tokio::test]
    async fn test_no_eligible_tier_is_fatal() {
        let h = harness(
            config().with_tiers(vec![InferenceTier::new("lite", 4)]),
        );
        h.source.insert("doc", vec![1u8; 64], "text/plain");

        let outcome = h.executor.run(&JobId::new("doc")).await;
        assert!(matches!(
            outcome,
            PipelineOutcome::FatalFailure {
                reason: FailureReason::NoEligibleTier { size: 64 }
            }
        ));
        assert_eq!(h.inference.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_error_classified() {
        let h = harness(config());
        h.source.insert("doc", b"x".to_vec(), "text/plain");
        h.source
            .fail_next("doc", CollaboratorError::new(ErrorSignal::ConnectionReset, "reset"));

        let outcome = h.executor.run(&JobId::new("doc")).await;
        assert!(matches!(outcome, PipelineOutcome::RetryableFailure { .. }));

        let outcome = h.executor.run(&JobId::new("missing")).await;
        assert!(matches!(outcome, PipelineOutcome::FatalFailure { .. }));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let h = harness(config().with_fetch_timeout(Duration::from_millis(50)));
        h.source.insert("slow", vec![1u8; 32], "text/plain");
        h.source.set_chunk_delay(Duration::from_millis(200));

        let outcome = h.executor.run(&JobId::new("slow")).await;
        assert!(matches!(outcome, PipelineOutcome::TimedOut { stage: "fetch" }));
        assert_eq!(staged_files(&h.dir), 0);
    }

    #[tokio::test]
    async fn test_pipeline_timeout_still_cleans_up() {
        let h = harness(config().with_pipeline_timeout(Duration::from_millis(50)));
        h.source.insert("doc", b"hello".to_vec(), "text/plain");
        h.inference.set_delay(Duration::from_millis(500));

        let outcome = h.executor.run(&JobId::new("doc")).await;
        assert!(matches!(outcome, PipelineOutcome::TimedOut { stage: "pipeline" }));
        assert_eq!(staged_files(&h.dir), 0);
    }

    #[tokio::test]
    async fn test_unparseable_output_uses_placeholder() {
        let h = harness(config());
        h.source.insert("doc", b"hello".to_vec(), "text/plain");
        h.inference.push_reply("Sorry, I cannot help with that.");

        let outcome = h.executor.run(&JobId::new("doc")).await;
        let PipelineOutcome::Success(payload) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(payload.output["error"], "unparseable_output");
    }

    #[tokio::test]
    async fn test_store_failure_classified() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemorySource::new());
        source.insert("doc", b"hello".to_vec(), "text/plain");
        let store = Arc::new(FlakyRecordStore::new());
        store.fail_next_put(CollaboratorError::from_status(503, "store down"));
        store.fail_next_get(CollaboratorError::from_status(401, "bad creds"));

        let executor = PipelineExecutor::new(
            source,
            Arc::new(ScriptedInference::new("{}")),
            store.clone(),
            Reclaimer::new(dir.path()),
            config(),
        );

        let outcome = executor.run(&JobId::new("doc")).await;
        assert!(matches!(outcome, PipelineOutcome::FatalFailure { .. }));

        let outcome = executor.run(&JobId::new("doc")).await;
        assert!(matches!(outcome, PipelineOutcome::RetryableFailure { .. }));
        assert_eq!(staged_files(&dir), 0);

        let outcome = executor.run(&JobId::new("doc")).await;
        assert!(outcome.is_success());
        assert_eq!(store.inner().len(), 1);
    }
}
