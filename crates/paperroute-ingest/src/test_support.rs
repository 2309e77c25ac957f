//! Scripted collaborators and fixtures shared by the unit tests.

use crate::collaborators::{
    Classifier, Collaborators, DeterministicExtractor, IndexDocument, Indexer,
    ProposedClassification, StructuralExtractor, Synthesis, SynthesisRequest, Synthesizer,
};
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::extraction::{ExtractionFanOut, ExtractionPair};
use crate::index_queue::IndexQueue;
use crate::placement::PlacementEngine;
use crate::reconcile::Reconciler;
use crate::retry::RetryPolicy;
use crate::routing::ClassificationRouter;
use async_trait::async_trait;
use paperroute_config::Recipient;
use paperroute_core::{
    DeterministicExtraction, ExtractionOutcome, ExtractionSource, PageText, ReconcileMode,
    ReconciledArtifact, StructuralExtraction,
};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        call_timeout: Duration::from_secs(2),
    }
}

pub fn recipients() -> Vec<Recipient> {
    vec![
        Recipient::new("Household", &["rent", "water"]),
        Recipient::new("Anna", &["anna kowalska", "electricity"]),
    ]
}

fn deterministic(text: &str) -> DeterministicExtraction {
    DeterministicExtraction::from_pages(
        vec![PageText {
            page_number: 1,
            text: text.to_string(),
        }],
        None,
    )
}

fn structural(markdown: &str) -> StructuralExtraction {
    StructuralExtraction {
        markdown: markdown.to_string(),
        tables: None,
        structural_notes: None,
    }
}

/// Extraction results as the fan-out would report them.
pub fn pair(ocr: Option<&str>, markdown: Option<&str>) -> ExtractionPair {
    let latency = Duration::from_millis(1);
    ExtractionPair {
        deterministic: match ocr {
            Some(text) => {
                ExtractionOutcome::success(ExtractionSource::Deterministic, deterministic(text), 1, latency)
            }
            None => ExtractionOutcome::failure(ExtractionSource::Deterministic, "no text layer", 1, latency),
        },
        structural: match markdown {
            Some(md) => ExtractionOutcome::success(ExtractionSource::Structural, structural(md), 1, latency),
            None => ExtractionOutcome::failure(ExtractionSource::Structural, "unsupported format", 1, latency),
        },
    }
}

pub fn artifact(text: &str) -> ReconciledArtifact {
    ReconciledArtifact {
        markdown: text.to_string(),
        document_date: None,
        title: None,
        language: None,
        mode: ReconcileMode::PassThrough(ExtractionSource::Deterministic),
        provenance: Vec::new(),
    }
}

pub fn document(id: &str) -> IndexDocument {
    IndexDocument {
        id: id.to_string(),
        content: format!("content of {id}"),
        metadata: serde_json::json!({ "recipient": "Household" }),
    }
}

/// Pipeline over `mocks` placing into `root`.
pub fn pipeline(root: &Path, mocks: &Mocks, index_queue: Option<Arc<IndexQueue>>) -> crate::Pipeline {
    let collaborators = mocks.collaborators();
    crate::Pipeline::new(
        ExtractionFanOut::new(
            collaborators.deterministic,
            collaborators.structural,
            fast_policy(),
            Duration::from_secs(5),
        ),
        Reconciler::new(collaborators.synthesizer, fast_policy()),
        ClassificationRouter::new(collaborators.classifier, recipients(), true, fast_policy())
            .unwrap(),
        PlacementEngine::new(PathBuf::from(root), 100, true),
        index_queue,
    )
}

/// Call bookkeeping shared by the scripted extractors.
struct Script<T> {
    payload: Result<T, CollaboratorError>,
    queued: Mutex<VecDeque<CollaboratorError>>,
    delay: Option<Duration>,
    calls: AtomicU32,
    active: AtomicU32,
    peak: AtomicU32,
}

struct ActiveGuard<'a>(&'a AtomicU32);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: Clone> Script<T> {
    fn new(payload: Result<T, CollaboratorError>) -> Self {
        Self {
            payload,
            queued: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicU32::new(0),
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        }
    }

    async fn run(&self) -> CollaboratorResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.queued.lock().unwrap().pop_front();
        match queued {
            Some(e) => Err(e),
            None => self.payload.clone(),
        }
    }
}

macro_rules! scripted_extractor {
    ($name:ident, $payload:ty, $build:ident) => {
        pub struct $name(Script<$payload>);

        impl $name {
            pub fn ok(text: &str) -> Self {
                Self(Script::new(Ok($build(text))))
            }

            pub fn failing(error: CollaboratorError) -> Self {
                Self(Script::new(Err(error)))
            }

            /// Return `errors` in order before the scripted result.
            pub fn fail_first(self, errors: Vec<CollaboratorError>) -> Self {
                self.0.queued.lock().unwrap().extend(errors);
                self
            }

            pub fn with_delay(mut self, delay: Duration) -> Self {
                self.0.delay = Some(delay);
                self
            }

            pub fn calls(&self) -> u32 {
                self.0.calls.load(Ordering::SeqCst)
            }

            /// Highest number of overlapping calls seen.
            pub fn peak(&self) -> u32 {
                self.0.peak.load(Ordering::SeqCst)
            }
        }
    };
}

scripted_extractor!(MockDeterministic, DeterministicExtraction, deterministic);
scripted_extractor!(MockStructural, StructuralExtraction, structural);

#[async_trait]
impl DeterministicExtractor for MockDeterministic {
    async fn extract_deterministic(&self, _path: &Path) -> CollaboratorResult<DeterministicExtraction> {
        self.0.run().await
    }
}

#[async_trait]
impl StructuralExtractor for MockStructural {
    async fn extract_structural(&self, _path: &Path) -> CollaboratorResult<StructuralExtraction> {
        self.0.run().await
    }
}

pub struct MockSynthesizer {
    result: Result<Synthesis, CollaboratorError>,
    calls: AtomicU32,
    last: Mutex<Option<(bool, String)>>,
}

impl MockSynthesizer {
    pub fn ok(synthesis: Synthesis) -> Self {
        Self::scripted(Ok(synthesis))
    }

    pub fn failing(error: CollaboratorError) -> Self {
        Self::scripted(Err(error))
    }

    fn scripted(result: Result<Synthesis, CollaboratorError>) -> Self {
        Self {
            result,
            calls: AtomicU32::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether the last request carried both extraction payloads.
    pub fn saw_both_inputs(&self) -> bool {
        matches!(*self.last.lock().unwrap(), Some((true, _)))
    }

    pub fn last_instruction(&self) -> String {
        self.last
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, instruction)| instruction.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> CollaboratorResult<Synthesis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let both = request.deterministic.is_some() && request.structural.is_some();
        *self.last.lock().unwrap() = Some((both, request.instruction.to_string()));
        self.result.clone()
    }
}

pub struct MockClassifier {
    result: Result<ProposedClassification, CollaboratorError>,
    calls: AtomicU32,
}

impl MockClassifier {
    pub fn ok(proposal: ProposedClassification) -> Self {
        Self {
            result: Ok(proposal),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: CollaboratorError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        _markdown: &str,
        _recipients: &[Recipient],
    ) -> CollaboratorResult<ProposedClassification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// In-memory index with per-operation failure budgets.
#[derive(Default)]
pub struct MockIndexer {
    documents: Mutex<HashSet<String>>,
    always_fail: AtomicBool,
    index_failures: AtomicU32,
    reindex_failures: AtomicU32,
    remove_failures: AtomicU32,
    slow_indexes: AtomicU32,
    delay: Duration,
    index_calls: AtomicU32,
    reindex_calls: AtomicU32,
    remove_calls: AtomicU32,
}

fn take_one(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MockIndexer {
    pub fn always_failing() -> Self {
        let indexer = Self::default();
        indexer.always_fail.store(true, Ordering::SeqCst);
        indexer
    }

    pub fn failing_index(self, times: u32) -> Self {
        self.index_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn failing_reindex(self, times: u32) -> Self {
        self.reindex_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn failing_remove(self, times: u32) -> Self {
        self.remove_failures.store(times, Ordering::SeqCst);
        self
    }

    /// The first `times` index calls stall for `delay` before completing.
    pub fn slow_index(mut self, times: u32, delay: Duration) -> Self {
        self.slow_indexes.store(times, Ordering::SeqCst);
        self.delay = delay;
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents.lock().unwrap().contains(id)
    }

    pub fn index_calls(&self) -> u32 {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn reindex_calls(&self) -> u32 {
        self.reindex_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> u32 {
        self.remove_calls.load(Ordering::SeqCst)
    }

    fn check(&self, budget: &AtomicU32, operation: &str) -> CollaboratorResult<()> {
        if self.always_fail.load(Ordering::SeqCst) || take_one(budget) {
            return Err(CollaboratorError::Transient(format!("{operation}: index unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl Indexer for MockIndexer {
    async fn index(&self, document: &IndexDocument) -> CollaboratorResult<()> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.slow_indexes) {
            tokio::time::sleep(self.delay).await;
        }
        self.check(&self.index_failures, "index")?;
        self.documents.lock().unwrap().insert(document.id.clone());
        Ok(())
    }

    async fn reindex(&self, document: &IndexDocument) -> CollaboratorResult<()> {
        self.reindex_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&self.reindex_failures, "reindex")?;
        self.documents.lock().unwrap().insert(document.id.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> CollaboratorResult<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&self.remove_failures, "remove")?;
        self.documents.lock().unwrap().remove(id);
        Ok(())
    }
}

/// One scripted instance of every collaborator.
pub struct Mocks {
    pub deterministic: Arc<MockDeterministic>,
    pub structural: Arc<MockStructural>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub classifier: Arc<MockClassifier>,
    pub indexer: Arc<MockIndexer>,
}

impl Default for Mocks {
    fn default() -> Self {
        Self {
            deterministic: Arc::new(MockDeterministic::ok("Rent for March: 1200")),
            structural: Arc::new(MockStructural::ok("# Rent\n\n| month | amount |\n| March | 1200 |")),
            synthesizer: Arc::new(MockSynthesizer::ok(Synthesis {
                markdown: "# Rent\n\nRent for March: 1200".into(),
                document_date: Some("2024-03-01".into()),
                title: Some("Rent".into()),
                language: Some("en".into()),
            })),
            classifier: Arc::new(MockClassifier::ok(ProposedClassification {
                recipient: "Household".into(),
                category: "bills".into(),
                subject: "March Rent".into(),
                confidence: Some(0.9),
                rationale: Some("mentions rent".into()),
            })),
            indexer: Arc::new(MockIndexer::default()),
        }
    }
}

impl Mocks {
    pub fn with_synthesis(mut self, synthesis: Synthesis) -> Self {
        self.synthesizer = Arc::new(MockSynthesizer::ok(synthesis));
        self
    }

    pub fn with_deterministic(mut self, deterministic: MockDeterministic) -> Self {
        self.deterministic = Arc::new(deterministic);
        self
    }

    pub fn with_deterministic_error(self, error: CollaboratorError) -> Self {
        self.with_deterministic(MockDeterministic::failing(error))
    }

    pub fn with_deterministic_failures(self, errors: Vec<CollaboratorError>) -> Self {
        self.with_deterministic(MockDeterministic::ok("Rent for March: 1200").fail_first(errors))
    }

    pub fn with_structural_error(mut self, error: CollaboratorError) -> Self {
        self.structural = Arc::new(MockStructural::failing(error));
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            deterministic: self.deterministic.clone(),
            structural: self.structural.clone(),
            synthesizer: self.synthesizer.clone(),
            classifier: self.classifier.clone(),
            indexer: self.indexer.clone(),
        }
    }
}
