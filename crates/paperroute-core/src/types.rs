//! Core domain types for PaperRoute.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for ingestion jobs.
pub type JobId = String;

/// Identity of a placed artifact in the index: its final path.
pub type ArtifactId = String;

/// Recipient label used when no configured recipient matches a document.
///
/// Configuration containing this name (in any letter case) is rejected.
pub const FALLBACK_RECIPIENT: &str = "unassigned";

/// Generate a new unique ID.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Check whether a name collides with the fallback label.
pub fn is_fallback_label(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(FALLBACK_RECIPIENT)
}

/// Derived identity of a physical file instance, used for admission dedup
/// only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fingerprint from path, size and modification time (nanoseconds since
    /// the epoch).
    pub fn from_metadata(path: &std::path::Path, size: u64, modified_nanos: u128) -> Self {
        Self(format!("{}:{}:{}", path.display(), size, modified_nanos))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "done" => Some(JobState::Done),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    /// `done` and `failed` admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage a job is in (or failed in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Admission,
    Extraction,
    Reconciliation,
    Classification,
    Placement,
    Indexing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Admission => "admission",
            Stage::Extraction => "extraction",
            Stage::Reconciliation => "reconciliation",
            Stage::Classification => "classification",
            Stage::Placement => "placement",
            Stage::Indexing => "indexing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admission" => Some(Stage::Admission),
            "extraction" => Some(Stage::Extraction),
            "reconciliation" => Some(Stage::Reconciliation),
            "classification" => Some(Stage::Classification),
            "placement" => Some(Stage::Placement),
            "indexing" => Some(Stage::Indexing),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single file moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: JobId,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub arrived_at: DateTime<Utc>,
    pub state: JobState,
    pub failed_stage: Option<Stage>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub output_path: Option<PathBuf>,
    pub indexed: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IngestionJob {
    pub fn new(path: impl Into<PathBuf>, fingerprint: Fingerprint) -> Self {
        Self {
            id: new_id(),
            path: path.into(),
            fingerprint,
            arrived_at: Utc::now(),
            state: JobState::Pending,
            failed_stage: None,
            error_kind: None,
            error: None,
            output_path: None,
            indexed: false,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        if self.state == JobState::Pending {
            self.state = JobState::Processing;
        }
    }

    /// Mark the job done. No-op if the job already reached a terminal state.
    pub fn complete(&mut self, output_path: PathBuf, indexed: bool) {
        if self.state.is_terminal() {
            return;
        }
        self.state = JobState::Done;
        self.output_path = Some(output_path);
        self.indexed = indexed;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the job failed. No-op if the job already reached a terminal state.
    pub fn fail(&mut self, stage: Stage, kind: &str, message: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = JobState::Failed;
        self.failed_stage = Some(stage);
        self.error_kind = Some(kind.to_string());
        self.error = Some(message.into());
        self.finished_at = Some(Utc::now());
    }

    /// File name of the input, for metadata headers and log lines.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Which extraction collaborator produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionSource {
    /// Character-level text extraction (OCR). Authoritative for exact tokens.
    Deterministic,
    /// Layout-aware extraction (vision). Authoritative for structure.
    Structural,
}

impl ExtractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionSource::Deterministic => "deterministic",
            ExtractionSource::Structural => "structural",
        }
    }
}

impl std::fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Text of a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

/// Payload of the deterministic extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterministicExtraction {
    pub full_text: String,
    pub pages: Vec<PageText>,
    pub confidence: Option<f32>,
}

impl DeterministicExtraction {
    /// Build from pages; the full text is the pages joined by blank lines.
    pub fn from_pages(pages: Vec<PageText>, confidence: Option<f32>) -> Self {
        let full_text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            full_text,
            pages,
            confidence: confidence.filter(|c| (0.0..=1.0).contains(c)),
        }
    }
}

/// Payload of the structural extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralExtraction {
    pub markdown: String,
    pub tables: Option<Vec<String>>,
    pub structural_notes: Option<String>,
}

/// Result of one collaborator call (including its retries) for one job.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome<T> {
    pub source: ExtractionSource,
    pub result: Result<T, String>,
    pub attempts: u32,
    pub latency: Duration,
}

impl<T> ExtractionOutcome<T> {
    pub fn success(source: ExtractionSource, payload: T, attempts: u32, latency: Duration) -> Self {
        Self {
            source,
            result: Ok(payload),
            attempts,
            latency,
        }
    }

    pub fn failure(
        source: ExtractionSource,
        error: impl Into<String>,
        attempts: u32,
        latency: Duration,
    ) -> Self {
        Self {
            source,
            result: Err(error.into()),
            attempts,
            latency,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn payload(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().err().map(String::as_str)
    }

    pub fn into_payload(self) -> Option<T> {
        self.result.ok()
    }
}

/// How the reconciled text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Both extractions merged by the synthesis service.
    Merged,
    /// Single-source pass-through.
    PassThrough(ExtractionSource),
}

/// Canonical text of a document after reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledArtifact {
    pub markdown: String,
    pub document_date: Option<NaiveDate>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub mode: ReconcileMode,
    pub provenance: Vec<String>,
}

/// Routing decision for a reconciled document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub recipient: String,
    pub category: String,
    pub subject: String,
    pub confidence: Option<f32>,
    pub rationale: Option<String>,
}

/// Where a document ended up on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementResult {
    /// Final path of the primary artifact; also its index identity.
    pub path: PathBuf,
    /// Copy of the original input, when the copy succeeded.
    pub original_copy: Option<PathBuf>,
    /// 1 when the base name was free, otherwise the numeric suffix used.
    pub collision_counter: u32,
}

impl PlacementResult {
    pub fn artifact_id(&self) -> ArtifactId {
        self.path.to_string_lossy().into_owned()
    }
}

/// Status of an index task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    #[default]
    Pending,
    Indexed,
    FailedTransient,
    /// Delete of an update succeeded but the reindex did not.
    AwaitingReindex,
    Abandoned,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Pending => "pending",
            IndexStatus::Indexed => "indexed",
            IndexStatus::FailedTransient => "failed_transient",
            IndexStatus::AwaitingReindex => "awaiting_reindex",
            IndexStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Some(IndexStatus::Pending),
            "indexed" => Some(IndexStatus::Indexed),
            "failed_transient" => Some(IndexStatus::FailedTransient),
            "awaiting_reindex" => Some(IndexStatus::AwaitingReindex),
            "abandoned" => Some(IndexStatus::Abandoned),
            _ => None,
        }
    }

    /// Whether the retry pass should pick this task up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexStatus::Pending | IndexStatus::FailedTransient | IndexStatus::AwaitingReindex
        )
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation an index task performs when retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexOperation {
    #[default]
    Index,
    Update,
}

impl IndexOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexOperation::Index => "index",
            IndexOperation::Update => "update",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "index" => Some(IndexOperation::Index),
            "update" => Some(IndexOperation::Update),
            _ => None,
        }
    }
}

/// Bookkeeping for one artifact awaiting (re)indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexTask {
    pub artifact_id: ArtifactId,
    pub operation: IndexOperation,
    /// Number of attempts made so far. Never decreases.
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: IndexStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexTask {
    pub fn new(artifact_id: impl Into<ArtifactId>, operation: IndexOperation) -> Self {
        let now = Utc::now();
        Self {
            artifact_id: artifact_id.into(),
            operation,
            attempts: 0,
            next_attempt_at: now,
            status: IndexStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record one more attempt.
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = Utc::now();
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_retryable() && self.next_attempt_at <= now
    }
}
