//! Scripted collaborators and runners.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::fixtures::success_outcome;
use crate::core::{JobId, PipelineOutcome, UsageMetadata};
use crate::errors::{CollaboratorError, ErrorSignal};
use crate::executor::JobRunner;
use crate::ports::{
    ArtifactMeta, ArtifactSource, ByteStream, InMemoryRecordStore, InferenceReply,
    InferenceRequest, InferenceService, InferenceTier, JobRecord, RecordStore,
};

#[derive(Debug, Clone)]
struct StoredArtifact {
    data: Vec<u8>,
    mime_type: String,
    declared_size: Option<u64>,
}

/// In-memory artifact source.
#[derive(Debug)]
pub struct MemorySource {
    artifacts: Mutex<HashMap<JobId, StoredArtifact>>,
    failures: Mutex<HashMap<JobId, VecDeque<CollaboratorError>>>,
    chunk_size: usize,
    chunk_delay: Mutex<Option<Duration>>,
    describe_calls: AtomicUsize,
    open_calls: AtomicUsize,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self {
            artifacts: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            chunk_size: 8,
            chunk_delay: Mutex::new(None),
            describe_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
        }
    }
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size of streamed chunks.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Adds or replaces an artifact.
    pub fn insert(&self, job_id: impl Into<JobId>, data: Vec<u8>, mime_type: impl Into<String>) {
        self.artifacts.lock().insert(
            job_id.into(),
            StoredArtifact {
                data,
                mime_type: mime_type.into(),
                declared_size: None,
            },
        );
    }

    /// Makes `describe` report a size different from the real one.
    pub fn declare_size(&self, job_id: impl Into<JobId>, size: u64) {
        if let Some(artifact) = self.artifacts.lock().get_mut(&job_id.into()) {
            artifact.declared_size = Some(size);
        }
    }

    /// Queues an error for the next `describe` of this id.
    pub fn fail_next(&self, job_id: impl Into<JobId>, err: CollaboratorError) {
        self.failures
            .lock()
            .entry(job_id.into())
            .or_default()
            .push_back(err);
    }

    /// Sleeps before yielding each chunk.
    pub fn set_chunk_delay(&self, delay: Duration) {
        *self.chunk_delay.lock() = Some(delay);
    }

    /// Number of `describe` calls.
    #[must_use]
    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    /// Number of `open` calls.
    #[must_use]
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, job_id: &JobId) -> Result<StoredArtifact, CollaboratorError> {
        self.artifacts.lock().get(job_id).cloned().ok_or_else(|| {
            CollaboratorError::new(ErrorSignal::NotFound, format!("no artifact for '{job_id}'"))
        })
    }
}

#[async_trait]
impl ArtifactSource for MemorySource {
    async fn describe(&self, job_id: &JobId) -> Result<ArtifactMeta, CollaboratorError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .failures
            .lock()
            .get_mut(job_id)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }

        let artifact = self.lookup(job_id)?;
        let size = artifact
            .declared_size
            .unwrap_or(artifact.data.len() as u64);
        Ok(ArtifactMeta::new(job_id.as_str(), size, artifact.mime_type))
    }

    async fn open(&self, job_id: &JobId) -> Result<ByteStream, CollaboratorError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let artifact = self.lookup(job_id)?;
        let chunks: Vec<Vec<u8>> = artifact
            .data
            .chunks(self.chunk_size)
            .map(<[u8]>::to_vec)
            .collect();
        let delay = *self.chunk_delay.lock();

        let stream = stream::iter(chunks).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, CollaboratorError>(chunk)
        });
        Ok(stream.boxed())
    }
}

/// Inference service that replays scripted replies.
#[derive(Debug)]
pub struct ScriptedInference {
    script: Mutex<VecDeque<Result<InferenceReply, CollaboratorError>>>,
    fallback: Mutex<Result<InferenceReply, CollaboratorError>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedInference {
    /// Creates a service that answers `text` once the script runs out.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(InferenceReply::new(text, UsageMetadata::new(100, 20)))),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a reply.
    pub fn push_reply(&self, text: impl Into<String>) {
        self.script
            .lock()
            .push_back(Ok(InferenceReply::new(text, UsageMetadata::new(100, 20))));
    }

    /// Queues an error.
    pub fn push_error(&self, err: CollaboratorError) {
        self.script.lock().push_back(Err(err));
    }

    /// Fails every call once the script runs out.
    pub fn set_default_error(&self, err: CollaboratorError) {
        *self.fallback.lock() = Err(err);
    }

    /// Sleeps before answering each call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Tier names in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn infer(
        &self,
        tier: &InferenceTier,
        _request: InferenceRequest,
    ) -> Result<InferenceReply, CollaboratorError> {
        self.calls.lock().push(tier.name.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// Record store with injectable failures.
#[derive(Debug, Default)]
pub struct FlakyRecordStore {
    inner: InMemoryRecordStore,
    get_failures: Mutex<VecDeque<CollaboratorError>>,
    put_failures: Mutex<VecDeque<CollaboratorError>>,
}

impl FlakyRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryRecordStore {
        &self.inner
    }

    /// Fails the next `get`.
    pub fn fail_next_get(&self, err: CollaboratorError) {
        self.get_failures.lock().push_back(err);
    }

    /// Fails the next `put`.
    pub fn fail_next_put(&self, err: CollaboratorError) {
        self.put_failures.lock().push_back(err);
    }
}

#[async_trait]
impl RecordStore for FlakyRecordStore {
    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, CollaboratorError> {
        let scripted = self.get_failures.lock().pop_front();
        match scripted {
            Some(err) => Err(err),
            None => self.inner.get(job_id).await,
        }
    }

    async fn put(&self, record: JobRecord) -> Result<(), CollaboratorError> {
        let scripted = self.put_failures.lock().pop_front();
        match scripted {
            Some(err) => Err(err),
            None => self.inner.put(record).await,
        }
    }

    async fn update(
        &self,
        job_id: &JobId,
        output: serde_json::Value,
    ) -> Result<bool, CollaboratorError> {
        self.inner.update(job_id, output).await
    }

    async fn delete(&self, job_id: &JobId) -> Result<bool, CollaboratorError> {
        self.inner.delete(job_id).await
    }

    async fn list_all(&self) -> Result<Vec<JobRecord>, CollaboratorError> {
        self.inner.list_all().await
    }
}

struct RunningGuard<'a> {
    current: &'a AtomicUsize,
}

impl<'a> RunningGuard<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runner that replays scripted outcomes per job id.
///
/// Tracks call counts and the peak number of overlapping runs.
#[derive(Debug)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<JobId, VecDeque<PipelineOutcome>>>,
    fallback: Mutex<PipelineOutcome>,
    panics: Mutex<HashSet<JobId>>,
    delay: Mutex<Duration>,
    calls: Mutex<HashMap<JobId, u32>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(success_outcome()),
            panics: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(HashMap::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl ScriptedRunner {
    /// Creates a runner that succeeds for every job.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long each run takes.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    /// Queues outcomes for one job, consumed one per run.
    pub fn script(&self, job_id: impl Into<JobId>, outcomes: Vec<PipelineOutcome>) {
        self.scripts
            .lock()
            .entry(job_id.into())
            .or_default()
            .extend(outcomes);
    }

    /// Outcome returned once a job's script is exhausted.
    pub fn set_fallback(&self, outcome: PipelineOutcome) {
        *self.fallback.lock() = outcome;
    }

    /// Makes every run of this job panic.
    pub fn panic_on(&self, job_id: impl Into<JobId>) {
        self.panics.lock().insert(job_id.into());
    }

    /// Number of runs of one job.
    #[must_use]
    pub fn calls(&self, job_id: &str) -> u32 {
        self.calls
            .lock()
            .get(&JobId::new(job_id))
            .copied()
            .unwrap_or(0)
    }

    /// Number of runs across all jobs.
    #[must_use]
    pub fn total_calls(&self) -> u32 {
        self.calls.lock().values().sum()
    }

    /// Runs in progress right now.
    #[must_use]
    pub fn running(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping runs seen.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run(&self, job_id: &JobId) -> PipelineOutcome {
        *self.calls.lock().entry(job_id.clone()).or_insert(0) += 1;
        let _running = RunningGuard::enter(&self.current, &self.peak);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.panics.lock().contains(job_id) {
            panic!("scripted panic for '{job_id}'");
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(job_id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.fallback.lock().clone())
    }
}
