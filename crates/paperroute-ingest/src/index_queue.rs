//! Non-blocking indexing with a bounded retry queue.
//!
//! Every placed artifact gets one immediate attempt. Failures become
//! [`IndexTask`]s that a single background worker retries with exponential
//! backoff until they succeed or run out of attempts and are abandoned.

use crate::collaborators::{IndexDocument, Indexer};
use crate::error::{CollaboratorError, CollaboratorResult, IngestError, IngestResult};
use crate::placement::load_index_document;
use chrono::Utc;
use paperroute_config::{IndexingConfig, PipelineConfig};
use paperroute_core::{ArtifactId, IndexOperation, IndexStatus, IndexTask};
use paperroute_db::Database;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct IndexQueueConfig {
    /// Attempts before a task is abandoned, counting the first submit.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl IndexQueueConfig {
    pub fn from_config(indexing: &IndexingConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            max_attempts: indexing.max_attempts.max(1),
            initial_backoff: indexing.initial_backoff(),
            max_backoff: indexing.max_backoff(),
            call_timeout: pipeline.call_timeout(),
        }
    }

    /// Delay before the next attempt after `attempts` failures.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// What one retry pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPassSummary {
    pub attempted: usize,
    pub indexed: usize,
    pub failed: usize,
    pub abandoned: usize,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<ArtifactId, IndexTask>,
    documents: HashMap<ArtifactId, IndexDocument>,
    in_flight: HashSet<ArtifactId>,
    /// Ids deleted while an attempt on them was running.
    deleted: HashSet<ArtifactId>,
}

pub struct IndexQueue {
    indexer: Arc<dyn Indexer>,
    config: IndexQueueConfig,
    state: Mutex<QueueState>,
    store: Option<Database>,
}

impl IndexQueue {
    pub fn new(indexer: Arc<dyn Indexer>, config: IndexQueueConfig) -> Self {
        Self {
            indexer,
            config,
            state: Mutex::new(QueueState::default()),
            store: None,
        }
    }

    /// Persist tasks to `store` and pick up tasks left open by a previous run.
    pub fn with_store(mut self, store: Database) -> IngestResult<Self> {
        let open = store.open_index_tasks()?;
        if !open.is_empty() {
            info!("Restored {} open index tasks", open.len());
        }

        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        for task in open {
            state.tasks.insert(task.artifact_id.clone(), task);
        }
        self.store = Some(store);
        Ok(self)
    }

    /// First indexing attempt for a newly placed artifact. Returns whether
    /// it is now indexed; on failure the artifact is queued for retry.
    pub async fn submit(&self, document: IndexDocument) -> bool {
        if self.is_confirmed(&document.id) {
            debug!("Already indexed, skipping: {}", document.id);
            return true;
        }
        let task = IndexTask::new(document.id.clone(), IndexOperation::Index);
        self.attempt(task, document).await == IndexStatus::Indexed
    }

    /// Replace an indexed artifact: delete, then reindex. If the delete
    /// succeeds but the reindex fails, the task is left awaiting reindex so
    /// the retry pass repairs the gap without deleting again.
    pub async fn update(&self, document: IndexDocument) -> bool {
        let existing = self.state().tasks.get(&document.id).cloned();
        let existing = existing.or_else(|| {
            self.store
                .as_ref()
                .and_then(|s| s.get_index_task(&document.id).ok().flatten())
        });

        let mut task = existing
            .unwrap_or_else(|| IndexTask::new(document.id.clone(), IndexOperation::Update));
        task.operation = IndexOperation::Update;
        if task.status != IndexStatus::AwaitingReindex {
            task.status = IndexStatus::Pending;
        }

        self.attempt(task, document).await == IndexStatus::Indexed
    }

    /// Remove an artifact from the index and forget its task. Removing an
    /// unknown id succeeds. An attempt already running for the id has its
    /// outcome discarded.
    pub async fn delete(&self, id: &str) -> IngestResult<()> {
        self.call(self.indexer.remove(id))
            .await
            .map_err(|e| IngestError::collaborator("remove", e))?;

        {
            let mut state = self.state();
            state.tasks.remove(id);
            state.documents.remove(id);
            if state.in_flight.contains(id) {
                state.deleted.insert(id.to_string());
            }
        }
        if let Some(store) = &self.store {
            store.delete_index_task(id)?;
        }
        info!("Removed from index: {}", id);
        Ok(())
    }

    /// Retry every task whose backoff has elapsed.
    pub async fn retry_due(&self) -> RetryPassSummary {
        let now = Utc::now();
        let mut due: Vec<(IndexTask, Option<IndexDocument>)> = {
            let state = self.state();
            state
                .tasks
                .values()
                .filter(|t| t.is_due(now) && !state.in_flight.contains(&t.artifact_id))
                .map(|t| (t.clone(), state.documents.get(&t.artifact_id).cloned()))
                .collect()
        };
        due.sort_by_key(|(t, _)| t.next_attempt_at);

        let mut summary = RetryPassSummary::default();
        for (mut task, document) in due {
            summary.attempted += 1;

            let document = match document {
                Some(document) => document,
                None => match load_index_document(Path::new(&task.artifact_id)) {
                    Ok(document) => document,
                    Err(e) => {
                        task.record_attempt();
                        task.status = IndexStatus::Abandoned;
                        task.last_error = Some(e.to_string());
                        error!(
                            artifact_id = %task.artifact_id,
                            attempts = task.attempts,
                            "Indexing abandoned, artifact unreadable: {}",
                            e
                        );
                        self.record(task);
                        summary.abandoned += 1;
                        continue;
                    }
                },
            };

            match self.attempt(task, document).await {
                IndexStatus::Indexed => summary.indexed += 1,
                IndexStatus::Abandoned => summary.abandoned += 1,
                _ => summary.failed += 1,
            }
        }

        summary
    }

    /// Run [`Self::retry_due`] every `interval` until cancelled.
    pub fn spawn_worker(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let summary = self.retry_due().await;
                        if summary.attempted > 0 {
                            info!(
                                attempted = summary.attempted,
                                indexed = summary.indexed,
                                failed = summary.failed,
                                abandoned = summary.abandoned,
                                "Index retry pass finished"
                            );
                        }
                    }
                }
            }
            debug!("Index retry worker stopped");
        })
    }

    /// Write every tracked task to the store. Returns how many were written.
    pub async fn flush(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let tasks: Vec<IndexTask> = self.state().tasks.values().cloned().collect();

        let mut written = 0;
        for task in &tasks {
            match store.upsert_index_task(task) {
                Ok(()) => written += 1,
                Err(e) => warn!("Failed to persist index task {}: {}", task.artifact_id, e),
            }
        }
        debug!("Flushed {} index tasks", written);
        written
    }

    /// Snapshot of every tracked task, oldest first.
    pub async fn tasks(&self) -> Vec<IndexTask> {
        let mut tasks: Vec<IndexTask> = self.state().tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub async fn task(&self, id: &str) -> Option<IndexTask> {
        self.state().tasks.get(id).cloned()
    }

    async fn attempt(&self, mut task: IndexTask, document: IndexDocument) -> IndexStatus {
        let id = task.artifact_id.clone();
        let Some(_claim) = self.begin(&task, &document) else {
            debug!("Index attempt already running: {}", id);
            return task.status;
        };

        task.record_attempt();
        match self.perform(&mut task, &document).await {
            Ok(()) => {
                task.status = IndexStatus::Indexed;
                task.last_error = None;
                info!(artifact_id = %id, attempts = task.attempts, "Indexed");
            }
            Err(e) => self.schedule_retry(&mut task, e),
        }

        let status = task.status;
        if !self.record(task) {
            debug!("{} was deleted during the attempt, discarding the outcome", id);
            if status == IndexStatus::Indexed {
                if let Err(e) = self.call(self.indexer.remove(&id)).await {
                    warn!("Failed to remove deleted artifact {} from the index: {}", id, e);
                }
            }
        }
        status
    }

    /// Claim `id` for one attempt. The task is tracked and persisted before
    /// the indexer is called, so an attempt cut short leaves it queued.
    fn begin(&self, task: &IndexTask, document: &IndexDocument) -> Option<InFlight<'_>> {
        let id = task.artifact_id.clone();
        {
            let mut state = self.state();
            if !state.in_flight.insert(id.clone()) {
                return None;
            }
            state.documents.insert(id.clone(), document.clone());
            state.tasks.entry(id.clone()).or_insert_with(|| task.clone());
        }
        let claim = InFlight { queue: self, id };
        self.persist(task);
        Some(claim)
    }

    async fn perform(&self, task: &mut IndexTask, document: &IndexDocument) -> CollaboratorResult<()> {
        match (task.operation, task.status) {
            (IndexOperation::Index, _) => self.call(self.indexer.index(document)).await,
            (IndexOperation::Update, IndexStatus::AwaitingReindex) => {
                self.call(self.indexer.reindex(document)).await
            }
            (IndexOperation::Update, _) => {
                self.call(self.indexer.remove(&document.id)).await?;
                task.status = IndexStatus::AwaitingReindex;
                self.call(self.indexer.reindex(document)).await
            }
        }
    }

    fn schedule_retry(&self, task: &mut IndexTask, error: CollaboratorError) {
        task.last_error = Some(error.to_string());

        if task.attempts >= self.config.max_attempts {
            task.status = IndexStatus::Abandoned;
            error!(
                artifact_id = %task.artifact_id,
                attempts = task.attempts,
                "Indexing abandoned: {}",
                error
            );
            return;
        }

        if task.status != IndexStatus::AwaitingReindex {
            task.status = IndexStatus::FailedTransient;
        }
        let backoff = self.config.backoff(task.attempts);
        task.next_attempt_at = Utc::now()
            + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::days(1));
        warn!(
            artifact_id = %task.artifact_id,
            attempts = task.attempts,
            status = %task.status,
            backoff_secs = backoff.as_secs(),
            "Indexing failed, will retry: {}",
            error
        );
    }

    /// Store the outcome of an attempt. Returns false, storing nothing, when
    /// the artifact was deleted while the attempt ran.
    fn record(&self, mut task: IndexTask) -> bool {
        let id = task.artifact_id.clone();
        {
            let mut state = self.state();
            if state.deleted.remove(&id) {
                drop(state);
                if let Some(store) = &self.store {
                    if let Err(e) = store.delete_index_task(&id) {
                        warn!("Failed to drop index task {}: {}", id, e);
                    }
                }
                return false;
            }

            if task.status == IndexStatus::Indexed {
                state.tasks.remove(&id);
                state.documents.remove(&id);
            } else {
                if let Some(existing) = state.tasks.get(&id) {
                    task.attempts = task.attempts.max(existing.attempts);
                }
                if task.status == IndexStatus::Abandoned {
                    state.documents.remove(&id);
                }
                state.tasks.insert(id, task.clone());
            }
        }

        self.persist(&task);
        true
    }

    fn persist(&self, task: &IndexTask) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_index_task(task) {
                warn!("Failed to persist index task {}: {}", task.artifact_id, e);
            }
        }
    }

    fn is_confirmed(&self, id: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        store.is_indexed(id).unwrap_or_else(|e| {
            warn!("Could not check index status of {}: {}", id, e);
            false
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn call<F>(&self, call: F) -> CollaboratorResult<()>
    where
        F: Future<Output = CollaboratorResult<()>>,
    {
        match timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(self.config.call_timeout)),
        }
    }
}

/// Releases an attempt's claim on its id, including when the attempt is
/// dropped partway through.
struct InFlight<'a> {
    queue: &'a IndexQueue,
    id: ArtifactId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.state();
        state.in_flight.remove(&self.id);
        state.deleted.remove(&self.id);
    }
}
