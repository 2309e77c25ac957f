//! Fallback policy between the two extractions and hand-off to synthesis.

use crate::collaborators::{Synthesis, SynthesisRequest, Synthesizer};
use crate::error::{IngestError, IngestResult};
use crate::extraction::ExtractionPair;
use crate::retry::{call_with_retry, RetryPolicy};
use paperroute_core::{
    parse_document_date, DeterministicExtraction, ExtractionSource, ReconcileMode,
    ReconciledArtifact, StructuralExtraction,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Precedence rule handed to the synthesis service with every merge.
pub const PRECEDENCE_INSTRUCTION: &str = "Take exact tokens (names, numbers, amounts, dates, \
addresses, identifiers) from the OCR text. Take layout and structure (tables, headings, lists) \
from the structural markdown. Never invent content that appears in neither source.";

pub struct Reconciler {
    synthesizer: Arc<dyn Synthesizer>,
    policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, policy: RetryPolicy) -> Self {
        Self {
            synthesizer,
            policy,
        }
    }

    /// Produce the canonical text for a document.
    ///
    /// Both outcomes present: merged by the synthesis service. One present:
    /// normalized pass-through. Neither: [`IngestError::UnreadableDocument`].
    pub async fn reconcile(
        &self,
        path: &Path,
        pair: ExtractionPair,
    ) -> IngestResult<ReconciledArtifact> {
        let mut provenance = Vec::new();
        if let Some(e) = pair.deterministic.error() {
            provenance.push(format!("deterministic extraction failed: {e}"));
        }
        if let Some(e) = pair.structural.error() {
            provenance.push(format!("structural extraction failed: {e}"));
        }

        match (
            pair.deterministic.into_payload(),
            pair.structural.into_payload(),
        ) {
            (Some(deterministic), Some(structural)) => {
                Ok(self.merge(path, deterministic, structural, provenance).await)
            }
            (Some(deterministic), None) => {
                info!("Single-source pass-through (deterministic): {}", path.display());
                Ok(pass_through_deterministic(&deterministic, provenance))
            }
            (None, Some(structural)) => {
                info!("Single-source pass-through (structural): {}", path.display());
                Ok(pass_through_structural(&structural, provenance))
            }
            (None, None) => Err(IngestError::UnreadableDocument(path.to_path_buf())),
        }
    }

    async fn merge(
        &self,
        path: &Path,
        deterministic: DeterministicExtraction,
        structural: StructuralExtraction,
        mut provenance: Vec<String>,
    ) -> ReconciledArtifact {
        let request = SynthesisRequest {
            deterministic: Some(&deterministic),
            structural: Some(&structural),
            instruction: PRECEDENCE_INSTRUCTION,
        };

        let outcome = call_with_retry(&self.policy, "synthesize", || {
            self.synthesizer.synthesize(&request)
        })
        .await;

        match outcome.result {
            Ok(synthesis) if !synthesis.markdown.trim().is_empty() => {
                debug!(attempts = outcome.attempts, "Merged extractions: {}", path.display());
                provenance.push(describe_deterministic(&deterministic));
                provenance.push(describe_structural(&structural));
                provenance.push("merged by synthesis".to_string());
                from_synthesis(synthesis, provenance)
            }
            Ok(_) => {
                warn!("Synthesis returned no text, using OCR text: {}", path.display());
                provenance.push("synthesis returned no text".to_string());
                pass_through_deterministic(&deterministic, provenance)
            }
            Err(e) => {
                warn!("Synthesis failed, using OCR text: {}: {}", path.display(), e);
                provenance.push(format!("synthesis failed: {e}"));
                pass_through_deterministic(&deterministic, provenance)
            }
        }
    }
}

fn from_synthesis(synthesis: Synthesis, provenance: Vec<String>) -> ReconciledArtifact {
    let document_date = synthesis.document_date.as_deref().and_then(|d| {
        parse_document_date(d)
            .map_err(|e| debug!("Ignoring document date: {}", e))
            .ok()
    });

    ReconciledArtifact {
        markdown: normalize_text(&synthesis.markdown),
        document_date,
        title: non_empty(synthesis.title),
        language: non_empty(synthesis.language),
        mode: ReconcileMode::Merged,
        provenance,
    }
}

fn pass_through_deterministic(
    extraction: &DeterministicExtraction,
    mut provenance: Vec<String>,
) -> ReconciledArtifact {
    provenance.push(describe_deterministic(extraction));
    ReconciledArtifact {
        markdown: normalize_text(&extraction.full_text),
        document_date: None,
        title: None,
        language: None,
        mode: ReconcileMode::PassThrough(ExtractionSource::Deterministic),
        provenance,
    }
}

fn pass_through_structural(
    extraction: &StructuralExtraction,
    mut provenance: Vec<String>,
) -> ReconciledArtifact {
    provenance.push(describe_structural(extraction));
    ReconciledArtifact {
        markdown: normalize_text(&extraction.markdown),
        document_date: None,
        title: first_heading(&extraction.markdown),
        language: None,
        mode: ReconcileMode::PassThrough(ExtractionSource::Structural),
        provenance,
    }
}

fn describe_deterministic(extraction: &DeterministicExtraction) -> String {
    match extraction.confidence {
        Some(c) => format!("ocr: {} pages, confidence {:.2}", extraction.pages.len(), c),
        None => format!("ocr: {} pages", extraction.pages.len()),
    }
}

fn describe_structural(extraction: &StructuralExtraction) -> String {
    let tables = extraction.tables.as_ref().map_or(0, Vec::len);
    format!("vision: {} tables", tables)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First markdown heading, without its hashes.
fn first_heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|l| !l.is_empty())
}

/// Light normalization: unix line endings, no trailing whitespace, at most
/// one blank line in a row, single trailing newline.
pub(crate) fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    if !out.is_empty() {
        out.push('\n');
    }
    out
}
