//! Stage sequencing for a single job.

use crate::collaborators::Collaborators;
use crate::error::{IngestError, IngestResult};
use crate::extraction::ExtractionFanOut;
use crate::index_queue::IndexQueue;
use crate::placement::PlacementEngine;
use crate::reconcile::Reconciler;
use crate::retry::RetryPolicy;
use crate::routing::ClassificationRouter;
use paperroute_config::Config;
use paperroute_core::{IngestionJob, PlacementResult, Stage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// A stage error together with the stage it happened in.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: IngestError,
}

impl StageFailure {
    fn at(stage: Stage) -> impl FnOnce(IngestError) -> StageFailure {
        move |error| StageFailure { stage, error }
    }
}

/// Where a running job has got to. Once `placed` is set the artifact is on
/// disk and only indexing remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub placed: Option<PathBuf>,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            stage: Stage::Admission,
            placed: None,
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

fn advance(progress: &watch::Sender<Progress>, stage: Stage) {
    progress.send_modify(|p| p.stage = stage);
}

/// Extraction, reconciliation, classification, placement and indexing, in
/// that order.
pub struct Pipeline {
    fan_out: ExtractionFanOut,
    reconciler: Reconciler,
    router: ClassificationRouter,
    placement: PlacementEngine,
    index_queue: Option<Arc<IndexQueue>>,
}

impl Pipeline {
    pub fn new(
        fan_out: ExtractionFanOut,
        reconciler: Reconciler,
        router: ClassificationRouter,
        placement: PlacementEngine,
        index_queue: Option<Arc<IndexQueue>>,
    ) -> Self {
        Self {
            fan_out,
            reconciler,
            router,
            placement,
            index_queue,
        }
    }

    pub fn from_config(
        config: &Config,
        collaborators: &Collaborators,
        index_queue: Option<Arc<IndexQueue>>,
    ) -> IngestResult<Self> {
        let policy = RetryPolicy::from_config(&config.pipeline);

        Ok(Self::new(
            ExtractionFanOut::new(
                Arc::clone(&collaborators.deterministic),
                Arc::clone(&collaborators.structural),
                policy.clone(),
                config.pipeline.extraction_deadline(),
            ),
            Reconciler::new(Arc::clone(&collaborators.synthesizer), policy.clone()),
            ClassificationRouter::new(
                Arc::clone(&collaborators.classifier),
                config.recipients.clone(),
                config.routing.require_tag_overlap,
                policy,
            )?,
            PlacementEngine::from_config(config),
            index_queue,
        ))
    }

    pub fn index_queue(&self) -> Option<&Arc<IndexQueue>> {
        self.index_queue.as_ref()
    }

    /// Run every stage for `job`. The current stage is published on
    /// `progress`. Indexing failures never fail the job; they leave
    /// `indexed` false and a task in the retry queue.
    pub async fn process(
        &self,
        job: &mut IngestionJob,
        progress: &watch::Sender<Progress>,
    ) -> Result<PlacementResult, StageFailure> {
        job.start();
        let path = job.path.clone();

        advance(progress, Stage::Extraction);
        let pair = self.fan_out.extract(&path).await;

        advance(progress, Stage::Reconciliation);
        let artifact = self
            .reconciler
            .reconcile(&path, pair)
            .await
            .map_err(StageFailure::at(Stage::Reconciliation))?;
        debug!(job_id = %job.id, mode = ?artifact.mode, "Reconciled");

        advance(progress, Stage::Classification);
        let classification = self
            .router
            .route(&artifact)
            .await
            .map_err(StageFailure::at(Stage::Classification))?;

        advance(progress, Stage::Placement);
        let (placement, document) = self
            .placement
            .place(&artifact, &classification, &path)
            .map_err(StageFailure::at(Stage::Placement))?;

        progress.send_modify(|p| {
            p.stage = Stage::Indexing;
            p.placed = Some(placement.path.clone());
        });
        let indexed = match &self.index_queue {
            Some(queue) => queue.submit(document).await,
            None => false,
        };

        job.complete(placement.path.clone(), indexed);
        Ok(placement)
    }
}
