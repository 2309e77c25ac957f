//! Contracts for the external services the pipeline delegates to.
//!
//! The orchestrator depends only on these traits. The HTTP-backed
//! implementations live in [`crate::deepfellow`].

use crate::error::CollaboratorResult;
use async_trait::async_trait;
use paperroute_config::Recipient;
use paperroute_core::{DeterministicExtraction, StructuralExtraction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Character-level text extraction.
#[async_trait]
pub trait DeterministicExtractor: Send + Sync {
    async fn extract_deterministic(&self, path: &Path) -> CollaboratorResult<DeterministicExtraction>;
}

/// Layout-aware extraction.
#[async_trait]
pub trait StructuralExtractor: Send + Sync {
    async fn extract_structural(&self, path: &Path) -> CollaboratorResult<StructuralExtraction>;
}

/// Input for a merge of the two extraction payloads.
#[derive(Debug, Clone)]
pub struct SynthesisRequest<'a> {
    pub deterministic: Option<&'a DeterministicExtraction>,
    pub structural: Option<&'a StructuralExtraction>,
    /// Which source wins for which kind of content.
    pub instruction: &'a str,
}

/// Output of the synthesis service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub markdown: String,
    #[serde(default)]
    pub document_date: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Merges extraction payloads into one canonical text. Fails only if both
/// inputs are absent.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> CollaboratorResult<Synthesis>;
}

/// Raw, unvalidated classification as returned by the reasoning service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposedClassification {
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default, alias = "reasoning")]
    pub rationale: Option<String>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        markdown: &str,
        recipients: &[Recipient],
    ) -> CollaboratorResult<ProposedClassification>;
}

/// A placed artifact as submitted to the search index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Value,
}

/// Semantic index. `remove` succeeds when the id is already absent.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, document: &IndexDocument) -> CollaboratorResult<()>;
    async fn reindex(&self, document: &IndexDocument) -> CollaboratorResult<()>;
    async fn remove(&self, id: &str) -> CollaboratorResult<()>;
}

/// The full set of collaborators a pipeline needs.
#[derive(Clone)]
pub struct Collaborators {
    pub deterministic: Arc<dyn DeterministicExtractor>,
    pub structural: Arc<dyn StructuralExtractor>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub classifier: Arc<dyn Classifier>,
    pub indexer: Arc<dyn Indexer>,
}
