//! Per-job isolation, bounded concurrency and graceful shutdown.

use crate::admission::{fingerprint_file, AdmittedFile};
use crate::error::IngestResult;
use crate::pipeline::{Pipeline, Progress};
use chrono::Utc;
use paperroute_config::{FingerprintMode, PipelineConfig};
use paperroute_core::{IngestionJob, JobId, JobState};
use paperroute_db::Database;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// In-memory view of recent jobs. Terminal jobs are forgotten once their
/// retention window has passed.
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, (IngestionJob, watch::Receiver<Progress>)>>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    async fn insert(&self, job: IngestionJob, progress: watch::Receiver<Progress>) {
        self.jobs.lock().await.insert(job.id.clone(), (job, progress));
    }

    async fn update(&self, job: IngestionJob) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(&job.id) {
            entry.0 = job;
        }
    }

    pub async fn get(&self, id: &str) -> Option<IngestionJob> {
        self.jobs.lock().await.get(id).map(|(job, _)| job.clone())
    }

    /// Every tracked job, oldest first.
    pub async fn snapshot(&self) -> Vec<IngestionJob> {
        let mut jobs: Vec<IngestionJob> = self
            .jobs
            .lock()
            .await
            .values()
            .map(|(job, _)| job.clone())
            .collect();
        jobs.sort_by_key(|j| j.arrived_at);
        jobs
    }

    /// Jobs not yet terminal, with the progress each one last reported.
    async fn unfinished(&self) -> Vec<(IngestionJob, Progress)> {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|(job, _)| !job.state.is_terminal())
            .map(|(job, progress)| (job.clone(), progress.borrow().clone()))
            .collect()
    }

    /// Forget terminal jobs older than the retention window.
    pub async fn prune(&self) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;

        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, (job, _)| match job.finished_at {
            Some(finished) => finished > cutoff,
            None => true,
        });
        before - jobs.len()
    }
}

/// Counts reported when the supervisor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub completed: usize,
    pub failed: usize,
    /// Jobs still running at the shutdown deadline.
    pub interrupted: usize,
    /// Index tasks written to the store on the way out.
    pub flushed: usize,
}

impl ShutdownSummary {
    fn reap(&mut self, joined: Result<IngestionJob, JoinError>) {
        match joined {
            Ok(job) if job.state == JobState::Done => self.completed += 1,
            Ok(_) => self.failed += 1,
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                error!("Job task failed: {}", e);
                self.failed += 1;
            }
        }
    }
}

/// Owns every job from admission to terminal state.
#[derive(Clone)]
pub struct Supervisor {
    pipeline: Arc<Pipeline>,
    limiter: Arc<Semaphore>,
    registry: Arc<JobRegistry>,
    store: Option<Database>,
    shutdown_deadline: Duration,
}

impl Supervisor {
    pub fn new(pipeline: Arc<Pipeline>, config: &PipelineConfig, store: Option<Database>) -> Self {
        Self {
            pipeline,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            registry: Arc::new(JobRegistry::new(config.job_retention())),
            store,
            shutdown_deadline: config.shutdown_deadline(),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Process admitted files until `cancel` fires or the stream ends, then
    /// shut down gracefully.
    ///
    /// At most `max_concurrent_jobs` jobs run at once; the rest wait in the
    /// admission channel in arrival order.
    pub async fn run(
        &self,
        mut admitted: mpsc::Receiver<AdmittedFile>,
        cancel: CancellationToken,
    ) -> ShutdownSummary {
        let mut jobs: JoinSet<IngestionJob> = JoinSet::new();
        let mut summary = ShutdownSummary::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, no longer admitting files");
                    break;
                }
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    summary.reap(joined);
                    self.registry.prune().await;
                }
                next = admitted.recv() => {
                    let Some(file) = next else {
                        info!("Admission stream ended");
                        break;
                    };

                    let permit = tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Not starting {} due to shutdown", file.path.display());
                            break;
                        }
                        permit = Arc::clone(&self.limiter).acquire_owned() => permit,
                    };
                    let Ok(permit) = permit else { break };

                    let supervisor = self.clone();
                    jobs.spawn(async move {
                        let _permit = permit;
                        supervisor.run_job(file).await
                    });
                }
            }
        }

        self.shutdown(jobs, summary).await
    }

    /// Run one job to a terminal state. Stage errors and panics are caught
    /// here and recorded on the job.
    pub async fn run_job(&self, file: AdmittedFile) -> IngestionJob {
        let mut job = IngestionJob::new(file.path, file.fingerprint);
        let (progress, observed) = watch::channel(Progress::new());
        self.registry.insert(job.clone(), observed.clone()).await;
        info!(job_id = %job.id, path = %job.path.display(), "Job started");

        let pipeline = Arc::clone(&self.pipeline);
        let mut working = job.clone();
        let handle = tokio::spawn(async move {
            let result = pipeline.process(&mut working, &progress).await;
            (working, result)
        });
        let _abort = AbortOnDrop(handle.abort_handle());

        match handle.await {
            Ok((done, Ok(placement))) => {
                job = done;
                info!(
                    job_id = %job.id,
                    output = %placement.path.display(),
                    indexed = job.indexed,
                    "Job done"
                );
            }
            Ok((failed, Err(failure))) => {
                job = failed;
                job.fail(failure.stage, failure.error.kind(), failure.error.to_string());
                log_failure(&job);
            }
            Err(e) => {
                let last = observed.borrow().clone();
                settle_interrupted(&mut job, last, "panic", format!("job task failed: {e}"));
            }
        }

        self.finish(&job).await;
        job
    }

    /// Run a single file through the pipeline without the stability gate.
    pub async fn process_file(&self, path: &Path, mode: FingerprintMode) -> IngestResult<IngestionJob> {
        let fingerprint = fingerprint_file(path, mode).await?;
        let _permit = self.limiter.acquire().await;
        Ok(self
            .run_job(AdmittedFile {
                path: path.to_path_buf(),
                fingerprint,
                detected_at: Utc::now(),
            })
            .await)
    }

    async fn shutdown(
        &self,
        mut jobs: JoinSet<IngestionJob>,
        mut summary: ShutdownSummary,
    ) -> ShutdownSummary {
        if !jobs.is_empty() {
            info!(
                "Waiting up to {:?} for {} in-flight jobs",
                self.shutdown_deadline,
                jobs.len()
            );
        }

        let drained = tokio::time::timeout(self.shutdown_deadline, async {
            while let Some(joined) = jobs.join_next().await {
                summary.reap(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = jobs.len(),
                "Shutdown deadline reached, abandoning in-flight jobs"
            );
            jobs.abort_all();
            while jobs.join_next().await.is_some() {}

            for (mut job, last) in self.registry.unfinished().await {
                settle_interrupted(&mut job, last, "shutdown", "interrupted by shutdown".into());
                self.finish(&job).await;
                summary.interrupted += 1;
            }
        }

        if let Some(queue) = self.pipeline.index_queue() {
            summary.flushed = queue.flush().await;
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "Supervisor stopped"
        );
        summary
    }

    async fn finish(&self, job: &IngestionJob) {
        self.registry.update(job.clone()).await;
        if let Some(store) = &self.store {
            if let Err(e) = store.record_job(job) {
                warn!("Failed to record job {}: {}", job.id, e);
            }
        }
    }
}

/// Aborts the pipeline task when the owning job future is dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Settle a job whose pipeline task never returned. Once the artifact is
/// placed the job is done; its index task stays queued for retry.
fn settle_interrupted(job: &mut IngestionJob, last: Progress, kind: &str, message: String) {
    match last.placed {
        Some(output) => {
            warn!(
                job_id = %job.id,
                output = %output.display(),
                kind,
                "Job interrupted while indexing, leaving it to the retry queue"
            );
            job.complete(output, false);
        }
        None => {
            job.fail(last.stage, kind, message);
            log_failure(job);
        }
    }
}

fn log_failure(job: &IngestionJob) {
    error!(
        job_id = %job.id,
        path = %job.path.display(),
        fingerprint = %job.fingerprint,
        stage = job.failed_stage.map(|s| s.as_str()).unwrap_or("unknown"),
        kind = job.error_kind.as_deref().unwrap_or("unknown"),
        "Job failed: {}",
        job.error.as_deref().unwrap_or_default()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Admission;
    use crate::collaborators::Indexer;
    use crate::dedup::AdmissionCache;
    use crate::error::CollaboratorError;
    use crate::stability::StabilityGate;
    use crate::index_queue::{IndexQueue, IndexQueueConfig};
    use crate::test_support::{pipeline, MockDeterministic, MockIndexer, Mocks};
    use paperroute_core::{Fingerprint, IndexStatus, Stage};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn config(max_concurrent_jobs: usize) -> PipelineConfig {
        PipelineConfig {
            max_concurrent_jobs,
            shutdown_deadline_seconds: 5,
            ..PipelineConfig::default()
        }
    }

    fn inputs(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("scan-{i}.pdf"));
                std::fs::write(&path, format!("document {i}")).unwrap();
                path
            })
            .collect()
    }

    fn admitted(path: &Path) -> AdmittedFile {
        AdmittedFile {
            path: path.to_path_buf(),
            fingerprint: Fingerprint::new(path.display().to_string()),
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let inbox = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let mocks = Mocks::default().with_deterministic(
            MockDeterministic::ok("Rent for March").with_delay(Duration::from_millis(30)),
        );
        let supervisor = Supervisor::new(
            Arc::new(pipeline(archive.path(), &mocks, None)),
            &config(2),
            None,
        );

        let (tx, rx) = mpsc::channel(16);
        for path in inputs(&inbox, 6) {
            tx.send(admitted(&path)).await.unwrap();
        }
        drop(tx);

        let summary = supervisor.run(rx, CancellationToken::new()).await;

        assert_eq!(summary.completed, 6);
        assert!(mocks.deterministic.peak() <= 2);
        assert_eq!(mocks.deterministic.calls(), 6);
    }

    #[tokio::test]
    async fn test_failing_job_does_not_affect_others() {
        let inbox = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let paths = inputs(&inbox, 3);
        let mocks = Mocks::default()
            .with_deterministic_error(CollaboratorError::Permanent("corrupt".into()))
            .with_structural_error(CollaboratorError::Permanent("corrupt".into()));
        let broken = Supervisor::new(
            Arc::new(pipeline(archive.path(), &mocks, None)),
            &config(2),
            None,
        );
        let healthy = Supervisor::new(
            Arc::new(pipeline(archive.path(), &Mocks::default(), None)),
            &config(2),
            None,
        );

        let failed = broken.run_job(admitted(&paths[0])).await;
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.failed_stage, Some(Stage::Reconciliation));
        assert_eq!(failed.error_kind.as_deref(), Some("unreadable_document"));

        let done = healthy.run_job(admitted(&paths[1])).await;
        assert_eq!(done.state, JobState::Done);
    }

    #[tokio::test]
    async fn test_duplicate_admissions_create_one_job() {
        let inbox = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let path = inputs(&inbox, 1).remove(0);
        let mocks = Mocks::default();
        let supervisor = Supervisor::new(
            Arc::new(pipeline(archive.path(), &mocks, None)),
            &config(2),
            None,
        );

        let admission = Arc::new(Admission::new(
            StabilityGate::new(Duration::from_millis(5), 2),
            AdmissionCache::new(Duration::from_secs(60), 100),
            FingerprintMode::Metadata,
        ));
        let (candidates, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let admitted = admission.spawn(rx, 4, cancel.clone());

        candidates.send(path.clone()).unwrap();
        candidates.send(path.clone()).unwrap();
        candidates.send(path).unwrap();
        drop(candidates);

        let summary = supervisor.run(admitted, cancel).await;

        assert_eq!(summary.completed, 1);
        assert_eq!(supervisor.registry().snapshot().await.len(), 1);
        assert_eq!(mocks.deterministic.calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_deadline_interrupts_stuck_jobs() {
        let inbox = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let path = inputs(&inbox, 1).remove(0);
        let mocks = Mocks::default().with_deterministic(
            MockDeterministic::ok("Rent").with_delay(Duration::from_secs(30)),
        );
        let store = Database::open_in_memory().unwrap();
        let supervisor = Supervisor::new(
            Arc::new(pipeline(archive.path(), &mocks, None)),
            &PipelineConfig {
                shutdown_deadline_seconds: 0,
                ..config(1)
            },
            Some(store.clone()),
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(admitted(&path)).await.unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let summary = supervisor.run(rx, cancel).await;

        assert_eq!(summary.interrupted, 1);
        let recorded = store.list_jobs(Some(JobState::Failed), 10).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].error_kind.as_deref(), Some("shutdown"));
        assert_eq!(recorded[0].failed_stage, Some(Stage::Extraction));
    }

    #[tokio::test]
    async fn test_shutdown_during_indexing_keeps_placed_job_done() {
        let inbox = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let path = inputs(&inbox, 1).remove(0);
        let store = Database::open_in_memory().unwrap();
        let indexer = Arc::new(MockIndexer::default().slow_index(1, Duration::from_secs(30)));
        let queue = IndexQueue::new(
            Arc::clone(&indexer) as Arc<dyn Indexer>,
            IndexQueueConfig {
                max_attempts: 3,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
                call_timeout: Duration::from_secs(60),
            },
        )
        .with_store(store.clone())
        .unwrap();
        let supervisor = Supervisor::new(
            Arc::new(pipeline(archive.path(), &Mocks::default(), Some(Arc::new(queue)))),
            &PipelineConfig {
                shutdown_deadline_seconds: 0,
                ..config(1)
            },
            Some(store.clone()),
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(admitted(&path)).await.unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let summary = supervisor.run(rx, cancel).await;

        assert_eq!(summary.interrupted, 1);
        assert_eq!(summary.flushed, 1);

        let recorded = store.list_jobs(None, 10).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].state, JobState::Done);
        assert!(!recorded[0].indexed);
        let output = recorded[0].output_path.clone().unwrap();
        assert!(output.exists());

        let tasks = store.open_index_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].artifact_id, output.to_string_lossy());
        assert_eq!(tasks[0].status, IndexStatus::Pending);
    }

    #[tokio::test]
    async fn test_process_file_runs_one_job() {
        let inbox = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let path = inputs(&inbox, 1).remove(0);
        let supervisor = Supervisor::new(
            Arc::new(pipeline(archive.path(), &Mocks::default(), None)),
            &config(1),
            None,
        );

        let job = supervisor
            .process_file(&path, FingerprintMode::Content)
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Done);
        assert!(job.output_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_registry_prunes_after_retention() {
        let registry = JobRegistry::new(Duration::ZERO);
        let mut job = IngestionJob::new("/inbox/a.pdf", Fingerprint::new("fp"));
        let (_tx, rx) = watch::channel(Progress::new());
        registry.insert(job.clone(), rx).await;

        assert_eq!(registry.prune().await, 0);
        job.complete(PathBuf::from("/archive/a.md"), false);
        registry.update(job).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.prune().await, 1);
        assert!(registry.snapshot().await.is_empty());
    }
}
