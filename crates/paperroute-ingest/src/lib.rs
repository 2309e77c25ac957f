//! PaperRoute Ingest - The ingestion orchestrator.
//!
//! This crate provides:
//! - Stability gating and admission dedup for watched files
//! - Concurrent fan-out to the two extraction services
//! - Reconciliation, classification routing and collision-safe placement
//! - A non-blocking indexing stage with a bounded retry queue
//! - A supervisor enforcing per-job isolation and bounded concurrency

mod admission;
pub mod collaborators;
mod daemon;
mod dedup;
pub mod deepfellow;
mod error;
mod extraction;
mod index_queue;
mod pipeline;
mod placement;
mod reconcile;
mod retry;
mod routing;
mod stability;
mod supervisor;
mod watcher;

#[cfg(test)]
mod test_support;

pub use admission::{fingerprint_file, Admission, AdmittedFile};
pub use collaborators::Collaborators;
pub use daemon::{build_index_queue, build_supervisor, open_store, run_daemon};
pub use dedup::AdmissionCache;
pub use deepfellow::DeepfellowCollaborator;
pub use error::{CollaboratorError, CollaboratorResult, IngestError, IngestResult};
pub use extraction::{ExtractionFanOut, ExtractionPair};
pub use index_queue::{IndexQueue, IndexQueueConfig, RetryPassSummary};
pub use pipeline::{Pipeline, Progress, StageFailure};
pub use placement::{load_index_document, ArtifactHeader, PlacementEngine};
pub use reconcile::{Reconciler, PRECEDENCE_INSTRUCTION};
pub use retry::{call_with_retry, RetryOutcome, RetryPolicy};
pub use routing::ClassificationRouter;
pub use stability::{Stability, StabilityGate};
pub use supervisor::{JobRegistry, ShutdownSummary, Supervisor};
pub use watcher::{scan_directory, CandidateFilter, FileWatcher};
