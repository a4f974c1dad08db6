//! Encrypted document pipeline.
//!
//! # Overview
//!
//! A submitted document becomes a [`JobState`]-tracked job on the pipeline's
//! worker pool:
//!
//! 1. **chunked**: text is extracted, tokenized and split into term-frequency
//!    vectors of `feature_slots` lanes, one per `chunk_tokens` tokens
//! 2. **encrypted**: every chunk is encrypted into its own store handle, in
//!    parallel
//! 3. **computed**: an encrypted sum gives the document histogram, a slot
//!    total the token count, and an inner product the optional score
//! 4. **decrypted**: exactly those result handles are decrypted
//! 5. **completed**: a [`DocumentReport`] is assembled
//!
//! Every handle a job creates is released before it settles in `completed`
//! or `failed`.
//!
//! # Admission
//!
//! [`DocumentPipeline::drain`] stops admission and waits for running jobs to
//! finish; submissions fail with `Unavailable` until
//! [`DocumentPipeline::resume`].

mod features;
mod job;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::ComputeEngine;
use crate::error::{param_err, HeError, Result};
use crate::store::Handle;

pub use features::{extract_text, fnv1a, tokenize, FeatureSpace};
pub use job::{
    CancelToken, DocumentReport, FailureReason, JobId, JobObserver, JobSnapshot, JobState,
    LaneCount,
};

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tokens per encrypted chunk
    pub chunk_tokens: usize,

    /// Lanes per feature vector (power of two, at most the slot count)
    pub feature_slots: usize,

    /// Terms with a dedicated lane; other terms are hashed into the rest
    pub vocabulary: Vec<String>,

    /// Relevance weights of vocabulary terms. A non-empty map adds an
    /// encrypted inner product, which needs one multiplicative level.
    pub term_weights: BTreeMap<String, f64>,

    /// Worker threads; 0 uses the available parallelism
    pub workers: usize,

    /// Finished jobs kept for polling; the oldest are evicted beyond this
    pub max_retained_jobs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: 256,
            feature_slots: 64,
            vocabulary: Vec::new(),
            term_weights: BTreeMap::new(),
            workers: 0,
            max_retained_jobs: 1024,
        }
    }
}

impl PipelineConfig {
    /// Multiplicative depth the pipeline's operation graph needs.
    pub fn required_depth(&self) -> usize {
        if self.term_weights.is_empty() {
            0
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_tokens == 0 {
            return Err(param_err!("chunk_tokens must be positive"));
        }
        if !self.feature_slots.is_power_of_two() {
            return Err(param_err!(
                "feature_slots must be a power of two, got {}",
                self.feature_slots
            ));
        }
        if self.max_retained_jobs == 0 {
            return Err(param_err!("max_retained_jobs must be positive"));
        }
        Ok(())
    }
}

/// Why a job stopped early.
enum Abort {
    Cancelled,
    Failed(HeError),
}

impl From<HeError> for Abort {
    fn from(err: HeError) -> Self {
        Abort::Failed(err)
    }
}

struct JobStatus {
    state: JobState,
    report: Option<DocumentReport>,
    chunks_encrypted: usize,
}

struct JobRecord {
    id: JobId,
    status: Mutex<JobStatus>,
    changed: Condvar,
    cancel: CancelToken,
    /// Every store handle the job created and has not released
    handles: Mutex<Vec<Handle>>,
}

impl JobRecord {
    fn new(id: JobId) -> Self {
        Self {
            id,
            status: Mutex::new(JobStatus {
                state: JobState::Queued,
                report: None,
                chunks_encrypted: 0,
            }),
            changed: Condvar::new(),
            cancel: CancelToken::default(),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        let status = self.status.lock();
        let error = match &status.state {
            JobState::Failed(reason) => Some(reason.to_string()),
            _ => None,
        };
        JobSnapshot {
            id: self.id,
            state: status.state.clone(),
            chunks_encrypted: status.chunks_encrypted,
            result: status.report.clone(),
            error,
        }
    }

    fn checkpoint(&self) -> std::result::Result<(), Abort> {
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        Ok(())
    }

    fn track(&self, handle: Handle) {
        self.handles.lock().push(handle);
    }

    /// Track a composed result, adopting the intermediates of a partial
    /// failure.
    fn adopt(&self, result: Result<Handle>) -> std::result::Result<Handle, Abort> {
        match result {
            Ok(handle) => {
                self.track(handle);
                Ok(handle)
            }
            Err(HeError::Partial {
                intermediates,
                source,
            }) => {
                self.handles.lock().extend(intermediates);
                Err(Abort::Failed(*source))
            }
            Err(e) => Err(Abort::Failed(e)),
        }
    }
}

struct Admission {
    accepting: bool,
    active: usize,
}

struct Shared {
    config: PipelineConfig,
    features: FeatureSpace,
    weights: Option<Vec<f64>>,
    engine: Arc<ComputeEngine>,
    jobs: DashMap<JobId, Arc<JobRecord>>,
    /// Settled jobs, oldest first
    finished: Mutex<VecDeque<JobId>>,
    admission: Mutex<Admission>,
    idle: Condvar,
    observer: Option<Arc<dyn JobObserver>>,
}

/// Document pipeline with its own worker pool and job registry.
pub struct DocumentPipeline {
    shared: Arc<Shared>,
    pool: rayon::ThreadPool,
}

impl DocumentPipeline {
    pub fn new(config: PipelineConfig, engine: Arc<ComputeEngine>) -> Result<Self> {
        Self::build(config, engine, None)
    }

    /// Pipeline reporting progress to `observer`.
    pub fn with_observer(
        config: PipelineConfig,
        engine: Arc<ComputeEngine>,
        observer: Arc<dyn JobObserver>,
    ) -> Result<Self> {
        Self::build(config, engine, Some(observer))
    }

    fn build(
        config: PipelineConfig,
        engine: Arc<ComputeEngine>,
        observer: Option<Arc<dyn JobObserver>>,
    ) -> Result<Self> {
        config.validate()?;
        let features = FeatureSpace::new(&config.vocabulary, config.feature_slots)?;
        let weights = if config.term_weights.is_empty() {
            None
        } else {
            Some(features.weights(&config.term_weights)?)
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("hedoc-pipeline-{}", i))
            .build()
            .map_err(|e| HeError::Internal(format!("failed to build worker pool: {}", e)))?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                features,
                weights,
                engine,
                jobs: DashMap::new(),
                finished: Mutex::new(VecDeque::new()),
                admission: Mutex::new(Admission {
                    accepting: true,
                    active: 0,
                }),
                idle: Condvar::new(),
                observer,
            }),
            pool,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn required_depth(&self) -> usize {
        self.shared.config.required_depth()
    }

    /// Queue `document` for processing.
    pub fn submit(&self, document: Vec<u8>) -> Result<JobId> {
        self.shared.engine.manager().current()?;
        {
            let mut admission = self.shared.admission.lock();
            if !admission.accepting {
                return Err(HeError::Unavailable(
                    "pipeline is draining for re-initialization".into(),
                ));
            }
            admission.active += 1;
        }

        let id = JobId::new();
        let record = Arc::new(JobRecord::new(id));
        self.shared.jobs.insert(id, Arc::clone(&record));
        if let Some(observer) = &self.shared.observer {
            observer.state_changed(id, &JobState::Queued);
        }
        debug!(job = %id, bytes = document.len(), "queued document");

        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || {
            shared.run(&record, &document);
            let mut admission = shared.admission.lock();
            admission.active -= 1;
            if admission.active == 0 {
                shared.idle.notify_all();
            }
        });
        Ok(id)
    }

    fn record(&self, id: &JobId) -> Result<Arc<JobRecord>> {
        self.shared
            .jobs
            .get(id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(HeError::JobNotFound(*id))
    }

    pub fn get(&self, id: &JobId) -> Result<JobSnapshot> {
        Ok(self.record(id)?.snapshot())
    }

    /// Request cancellation. The job settles to `failed(cancelled)` at its
    /// next checkpoint; a finished job is left as it is.
    pub fn cancel(&self, id: &JobId) -> Result<()> {
        let record = self.record(id)?;
        record.cancel.cancel();
        debug!(job = %id, "cancellation requested");
        Ok(())
    }

    /// Wait up to `timeout` for the job to finish, then return its snapshot.
    pub fn wait(&self, id: &JobId, timeout: Duration) -> Result<JobSnapshot> {
        let record = self.record(id)?;
        let deadline = Instant::now() + timeout;
        let mut status = record.status.lock();
        while !status.state.is_terminal() {
            if record.changed.wait_until(&mut status, deadline).timed_out() {
                break;
            }
        }
        drop(status);
        Ok(record.snapshot())
    }

    /// Stop admission and wait for every running job to finish.
    pub fn drain(&self) {
        let mut admission = self.shared.admission.lock();
        admission.accepting = false;
        while admission.active > 0 {
            self.shared.idle.wait(&mut admission);
        }
        debug!("pipeline drained");
    }

    /// Accept submissions again.
    pub fn resume(&self) {
        self.shared.admission.lock().accepting = true;
    }

    /// Drop a finished job from the registry. Running jobs cannot be
    /// forgotten.
    pub fn forget(&self, id: &JobId) -> Result<()> {
        let record = self.record(id)?;
        if !record.status.lock().state.is_terminal() {
            return Err(HeError::InvalidArgument(format!("job {} is still running", id)));
        }
        self.shared.finished.lock().retain(|j| j != id);
        self.shared.jobs.remove(id);
        debug!(job = %id, "forgot job");
        Ok(())
    }

    /// Number of jobs in the registry.
    pub fn job_count(&self) -> usize {
        self.shared.jobs.len()
    }
}

impl Shared {
    fn run(&self, job: &JobRecord, document: &[u8]) {
        let outcome = self.process(job, document);

        // Release before settling so a terminal state implies no live handles.
        let handles = std::mem::take(&mut *job.handles.lock());
        for handle in handles {
            if let Err(e) = self.engine.release(&handle) {
                debug!(job = %job.id, %handle, error = %e, "handle already gone");
            }
        }

        let settled = match outcome {
            Ok(report) => {
                job.status.lock().report = Some(report);
                self.advance(job, JobState::Completed)
            }
            Err(Abort::Cancelled) => {
                warn!(job = %job.id, "job cancelled");
                self.advance(job, JobState::Failed(FailureReason::Cancelled))
            }
            Err(Abort::Failed(e)) => {
                warn!(job = %job.id, error = %e, "job failed");
                self.advance(job, JobState::Failed(FailureReason::from(&e)))
            }
        };
        if let Err(e) = settled {
            warn!(job = %job.id, error = %e, "job could not settle");
        }
        self.retire(job.id);
    }

    /// Record a settled job and evict the oldest beyond the retention limit.
    fn retire(&self, id: JobId) {
        let mut finished = self.finished.lock();
        if !self.jobs.contains_key(&id) {
            return;
        }
        finished.push_back(id);
        while finished.len() > self.config.max_retained_jobs {
            if let Some(old) = finished.pop_front() {
                self.jobs.remove(&old);
                debug!(job = %old, "evicted finished job");
            }
        }
    }

    fn advance(&self, job: &JobRecord, next: JobState) -> Result<()> {
        {
            let mut status = job.status.lock();
            if !status.state.can_transition_to(&next) {
                return Err(HeError::Internal(format!(
                    "illegal job transition {:?} -> {:?}",
                    status.state, next
                )));
            }
            status.state = next.clone();
            job.changed.notify_all();
        }
        debug!(job = %job.id, state = ?next, "job transition");
        if let Some(observer) = &self.observer {
            observer.state_changed(job.id, &next);
        }
        Ok(())
    }

    fn process(&self, job: &JobRecord, document: &[u8]) -> std::result::Result<DocumentReport, Abort> {
        let engine = &self.engine;
        let width = self.config.feature_slots;
        job.checkpoint()?;

        // queued -> chunked
        let text = extract_text(document);
        let tokens = tokenize(&text);
        let ctx = engine.manager().current()?;
        if width > ctx.slot_count() {
            return Err(HeError::Range(format!(
                "{} feature lanes exceed the {} slots of the context",
                width,
                ctx.slot_count()
            ))
            .into());
        }
        if tokens.len() as f64 > ctx.codec().max_value() {
            return Err(HeError::Range(format!(
                "{} tokens exceed the encodable count {}",
                tokens.len(),
                ctx.codec().max_value()
            ))
            .into());
        }
        drop(ctx);
        let chunks = self.features.chunk(&tokens, self.config.chunk_tokens);
        self.advance(job, JobState::Chunked)?;

        // chunked -> encrypted
        let encrypted: Vec<Result<Option<Handle>>> = chunks
            .par_iter()
            .enumerate()
            .map(|(index, features)| -> Result<Option<Handle>> {
                if job.cancel.is_cancelled() {
                    return Ok(None);
                }
                let handle = engine.encrypt(features)?;
                job.track(handle);
                job.status.lock().chunks_encrypted += 1;
                if let Some(observer) = &self.observer {
                    observer.chunk_encrypted(job.id, index, &job.cancel);
                }
                Ok(Some(handle))
            })
            .collect();
        job.checkpoint()?;
        let mut handles = Vec::with_capacity(encrypted.len());
        for result in encrypted {
            match result? {
                Some(handle) => handles.push(handle),
                None => return Err(Abort::Cancelled),
            }
        }
        self.advance(job, JobState::Encrypted)?;

        // encrypted -> computed
        let histogram = job.adopt(engine.encrypted_sum(&handles))?;
        let total = job.adopt(engine.slot_total(&histogram, width))?;
        let score = match &self.weights {
            Some(weights) => Some(job.adopt(engine.inner_product(&histogram, weights))?),
            None => None,
        };
        job.checkpoint()?;
        self.advance(job, JobState::Computed)?;

        // computed -> decrypted
        let counts = engine.decrypt_prefix(&histogram, width)?;
        let token_total = engine.decrypt_prefix(&total, 1)?;
        let score = match score {
            Some(handle) => engine.decrypt_prefix(&handle, 1)?.first().copied(),
            None => None,
        };
        self.advance(job, JobState::Decrypted)?;

        let lanes = counts
            .iter()
            .enumerate()
            .filter_map(|(lane, &c)| {
                let count = c.round().max(0.0) as u64;
                (count > 0).then(|| LaneCount {
                    lane,
                    term: self.features.term(lane).map(str::to_string),
                    count,
                })
            })
            .collect();

        Ok(DocumentReport {
            bytes: document.len(),
            chars: text.chars().count(),
            chunks: handles.len(),
            tokens: token_total.first().map_or(0, |t| t.round().max(0.0) as u64),
            lanes,
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextManager;
    use crate::params::HeConfig;
    use crate::store::CiphertextStore;

    fn engine() -> Arc<ComputeEngine> {
        let manager = Arc::new(ContextManager::new(Arc::new(CiphertextStore::new())));
        manager
            .initialize(
                HeConfig {
                    seed: Some(21),
                    ..HeConfig::insecure_test(256)
                },
                1,
            )
            .unwrap();
        Arc::new(ComputeEngine::new(manager))
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            chunk_tokens: 4,
            feature_slots: 16,
            vocabulary: vec!["cat".into(), "dog".into()],
            workers: 2,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(PipelineConfig::default().validate().is_ok());
        let bad = PipelineConfig {
            feature_slots: 12,
            ..PipelineConfig::default()
        };
        assert!(bad.validate().is_err());
        let no_retention = PipelineConfig {
            max_retained_jobs: 0,
            ..PipelineConfig::default()
        };
        assert!(no_retention.validate().is_err());
        let mut weighted = PipelineConfig::default();
        assert_eq!(weighted.required_depth(), 0);
        weighted.term_weights.insert("x".into(), 1.0);
        assert_eq!(weighted.required_depth(), 1);
    }

    #[test]
    fn test_document_completes() {
        let engine = engine();
        let pipeline = DocumentPipeline::new(config(), Arc::clone(&engine)).unwrap();

        let id = pipeline
            .submit(b"The cat and the dog. The CAT sat!".to_vec())
            .unwrap();
        let snapshot = pipeline.wait(&id, Duration::from_secs(60)).unwrap();
        assert_eq!(snapshot.state, JobState::Completed);

        let report = snapshot.result.unwrap();
        assert_eq!(report.tokens, 8);
        assert_eq!(report.chunks, 2);
        let cat = report.lanes.iter().find(|l| l.lane == 0).unwrap();
        assert_eq!((cat.term.as_deref(), cat.count), (Some("cat"), 2));
        assert_eq!(report.lanes.iter().map(|l| l.count).sum::<u64>(), 8);
        assert!(report.score.is_none());
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_weighted_score() {
        let engine = engine();
        let mut config = config();
        config.term_weights.insert("cat".into(), 2.0);
        config.term_weights.insert("dog".into(), -1.0);
        let pipeline = DocumentPipeline::new(config, Arc::clone(&engine)).unwrap();

        let id = pipeline.submit(b"cat cat dog bird".to_vec()).unwrap();
        let report = pipeline
            .wait(&id, Duration::from_secs(60))
            .unwrap()
            .result
            .unwrap();
        let score = report.score.unwrap();
        assert!((score - 3.0).abs() < 1e-3, "score {}", score);
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_drain_rejects_submissions() {
        let engine = engine();
        let pipeline = DocumentPipeline::new(config(), engine).unwrap();
        pipeline.drain();
        assert!(matches!(
            pipeline.submit(b"x".to_vec()),
            Err(HeError::Unavailable(_))
        ));
        pipeline.resume();
        assert!(pipeline.submit(b"x".to_vec()).is_ok());
    }

    #[test]
    fn test_finished_jobs_evicted() {
        let config = PipelineConfig {
            max_retained_jobs: 3,
            workers: 1,
            ..config()
        };
        let pipeline = DocumentPipeline::new(config, engine()).unwrap();

        let ids: Vec<JobId> = (0..20)
            .map(|_| {
                let id = pipeline.submit(b"cat dog".to_vec()).unwrap();
                let snapshot = pipeline.wait(&id, Duration::from_secs(60)).unwrap();
                assert_eq!(snapshot.state, JobState::Completed);
                id
            })
            .collect();

        pipeline.drain();
        assert_eq!(pipeline.job_count(), 3);
        assert!(matches!(pipeline.get(&ids[0]), Err(HeError::JobNotFound(_))));
        assert!(pipeline.get(&ids[19]).is_ok());

        pipeline.forget(&ids[19]).unwrap();
        assert_eq!(pipeline.job_count(), 2);
        assert!(matches!(pipeline.get(&ids[19]), Err(HeError::JobNotFound(_))));
        assert!(matches!(pipeline.forget(&ids[19]), Err(HeError::JobNotFound(_))));
    }

    #[test]
    fn test_unknown_job() {
        let pipeline = DocumentPipeline::new(config(), engine()).unwrap();
        let id = JobId::new();
        assert!(matches!(pipeline.get(&id), Err(HeError::JobNotFound(_))));
        assert!(matches!(pipeline.cancel(&id), Err(HeError::JobNotFound(_))));
    }

    #[test]
    fn test_lanes_beyond_slots_fail() {
        let engine = engine();
        let config = PipelineConfig {
            feature_slots: 256,
            ..config()
        };
        let pipeline = DocumentPipeline::new(config, engine).unwrap();
        let id = pipeline.submit(b"cat".to_vec()).unwrap();
        let snapshot = pipeline.wait(&id, Duration::from_secs(60)).unwrap();
        assert!(matches!(
            snapshot.state,
            JobState::Failed(FailureReason::Range(_))
        ));
        assert!(snapshot.error.is_some());
    }
}
