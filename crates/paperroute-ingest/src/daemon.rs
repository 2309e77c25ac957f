//! Wiring of watcher, admission, supervisor and retry worker.

use crate::admission::Admission;
use crate::collaborators::Collaborators;
use crate::dedup::AdmissionCache;
use crate::error::IngestResult;
use crate::index_queue::{IndexQueue, IndexQueueConfig};
use crate::pipeline::Pipeline;
use crate::stability::StabilityGate;
use crate::supervisor::{ShutdownSummary, Supervisor};
use crate::watcher::{scan_directory, CandidateFilter, FileWatcher};
use paperroute_config::Config;
use paperroute_db::Database;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Open the database when persistence is enabled.
pub fn open_store(config: &Config) -> IngestResult<Option<Database>> {
    if !config.indexing.persist {
        return Ok(None);
    }
    Ok(Some(Database::open(config.database_file()?)?))
}

/// Build the index queue, or `None` when indexing is disabled.
pub fn build_index_queue(
    config: &Config,
    collaborators: &Collaborators,
    store: Option<Database>,
) -> IngestResult<Option<Arc<IndexQueue>>> {
    if !config.indexing.enabled {
        return Ok(None);
    }

    let queue = IndexQueue::new(
        Arc::clone(&collaborators.indexer),
        IndexQueueConfig::from_config(&config.indexing, &config.pipeline),
    );
    let queue = match store {
        Some(store) => queue.with_store(store)?,
        None => queue,
    };
    Ok(Some(Arc::new(queue)))
}

/// Build a supervisor around a fully configured pipeline.
pub fn build_supervisor(
    config: &Config,
    collaborators: &Collaborators,
    store: Option<Database>,
) -> IngestResult<Supervisor> {
    let index_queue = build_index_queue(config, collaborators, store.clone())?;
    let pipeline = Pipeline::from_config(config, collaborators, index_queue)?;
    Ok(Supervisor::new(Arc::new(pipeline), &config.pipeline, store))
}

/// Watch the configured directory until `cancel` fires, then shut down
/// gracefully.
pub async fn run_daemon(
    config: &Config,
    collaborators: Collaborators,
    cancel: CancellationToken,
) -> IngestResult<ShutdownSummary> {
    let store = open_store(config)?;
    let supervisor = build_supervisor(config, &collaborators, store)?;

    let filter = CandidateFilter::from_config(config);
    let (candidates, candidate_rx) = mpsc::unbounded_channel();
    let mut watcher = FileWatcher::new(
        &config.directories.watch,
        filter.clone(),
        config.watch.debounce(),
        candidates.clone(),
    )?;
    watcher.start()?;

    if config.watch.scan_existing {
        let existing = scan_directory(&config.directories.watch, &filter)?;
        info!("Startup scan found {} files", existing.len());
        for path in existing {
            if candidates.send(path).is_err() {
                break;
            }
        }
    }
    drop(candidates);

    let admission = Arc::new(Admission::new(
        StabilityGate::from_config(&config.watch),
        AdmissionCache::from_config(&config.watch),
        config.watch.fingerprint,
    ));
    let admitted = admission.spawn(
        candidate_rx,
        config.pipeline.max_concurrent_jobs,
        cancel.clone(),
    );

    let worker = supervisor
        .pipeline()
        .index_queue()
        .map(|queue| Arc::clone(queue).spawn_worker(config.indexing.retry_interval(), cancel.clone()));

    let summary = supervisor.run(admitted, cancel.clone()).await;

    drop(watcher);
    cancel.cancel();
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            debug!("Retry worker ended abnormally: {}", e);
        }
    }

    Ok(summary)
}
