//! Collaborator implementations backed by the DeepFellow HTTP API.

use crate::collaborators::{
    Classifier, Collaborators, DeterministicExtractor, IndexDocument, Indexer,
    ProposedClassification, StructuralExtractor, Synthesis, SynthesisRequest, Synthesizer,
};
use crate::error::{CollaboratorError, CollaboratorResult};
use async_trait::async_trait;
use paperroute_config::Recipient;
use paperroute_core::{DeterministicExtraction, PageText, StructuralExtraction, FALLBACK_RECIPIENT};
use paperroute_deepfellow::{DeepfellowClient, DeepfellowError, ResponsesRequest};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Characters of document text sent for classification.
const CLASSIFY_INPUT_LIMIT: usize = 12_000;

impl From<DeepfellowError> for CollaboratorError {
    fn from(e: DeepfellowError) -> Self {
        if e.is_transient() {
            CollaboratorError::Transient(e.to_string())
        } else {
            CollaboratorError::Permanent(e.to_string())
        }
    }
}

/// Every collaborator role served by one DeepFellow instance.
pub struct DeepfellowCollaborator {
    client: DeepfellowClient,
}

impl DeepfellowCollaborator {
    pub fn new(client: DeepfellowClient) -> Self {
        Self { client }
    }

    /// One shared adapter behind every collaborator slot.
    pub fn collaborators(client: DeepfellowClient) -> Collaborators {
        let shared = Arc::new(Self::new(client));
        Collaborators {
            deterministic: shared.clone(),
            structural: shared.clone(),
            synthesizer: shared.clone(),
            classifier: shared.clone(),
            indexer: shared,
        }
    }

    async fn respond_json<T: DeserializeOwned>(
        &self,
        instructions: String,
        input: String,
        temperature: f32,
    ) -> CollaboratorResult<T> {
        let request = ResponsesRequest::new(self.client.llm_model(), input)
            .with_instructions(instructions)
            .with_temperature(temperature);
        let text = self.client.respond(request).await?;
        parse_json_reply(&text)
    }
}

#[async_trait]
impl DeterministicExtractor for DeepfellowCollaborator {
    async fn extract_deterministic(&self, path: &Path) -> CollaboratorResult<DeterministicExtraction> {
        let response = self.client.ocr(path).await?;
        let pages = response
            .pages
            .into_iter()
            .map(|p| PageText {
                page_number: p.page_number,
                text: p.text,
            })
            .collect();
        Ok(DeterministicExtraction::from_pages(pages, response.confidence))
    }
}

#[async_trait]
impl StructuralExtractor for DeepfellowCollaborator {
    async fn extract_structural(&self, path: &Path) -> CollaboratorResult<StructuralExtraction> {
        let response = self.client.vision(path).await?;
        Ok(StructuralExtraction {
            markdown: response.content,
            tables: response.tables,
            structural_notes: response.structural_notes,
        })
    }
}

#[async_trait]
impl Synthesizer for DeepfellowCollaborator {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> CollaboratorResult<Synthesis> {
        let input = synthesis_input(request)
            .ok_or_else(|| CollaboratorError::Permanent("nothing to synthesize".to_string()))?;
        self.respond_json(synthesis_instructions(request.instruction), input, 0.2)
            .await
    }
}

#[async_trait]
impl Classifier for DeepfellowCollaborator {
    async fn classify(
        &self,
        markdown: &str,
        recipients: &[Recipient],
    ) -> CollaboratorResult<ProposedClassification> {
        self.respond_json(
            CLASSIFY_INSTRUCTIONS.replace("{fallback}", FALLBACK_RECIPIENT),
            classification_input(markdown, recipients),
            0.1,
        )
        .await
    }
}

#[async_trait]
impl Indexer for DeepfellowCollaborator {
    async fn index(&self, document: &IndexDocument) -> CollaboratorResult<()> {
        Ok(self
            .client
            .index_document(&document.id, &document.content, &document.metadata)
            .await?)
    }

    async fn reindex(&self, document: &IndexDocument) -> CollaboratorResult<()> {
        Ok(self
            .client
            .reindex_document(&document.id, &document.content, &document.metadata)
            .await?)
    }

    async fn remove(&self, id: &str) -> CollaboratorResult<()> {
        let existed = self.client.delete_document(id).await?;
        if !existed {
            debug!("Remove of absent document treated as success: {}", id);
        }
        Ok(())
    }
}

const CLASSIFY_INSTRUCTIONS: &str = "You file scanned paperwork. Pick the recipient whose tags \
best match the document. If no recipient matches, use \"{fallback}\". The category is a short \
lowercase slug such as invoices, bank, insurance, medical or taxes. The subject is a short \
lowercase slug describing this particular document. Reply with one JSON object and nothing \
else: {\"recipient\": string, \"category\": string, \"subject\": string, \
\"confidence\": number between 0 and 1, \"reasoning\": string}.";

fn synthesis_instructions(precedence: &str) -> String {
    format!(
        "You merge two extractions of the same scanned document into one clean markdown \
document. {precedence} Reply with one JSON object and nothing else: {{\"markdown\": string, \
\"document_date\": \"YYYY-MM-DD\" or null, \"title\": string or null, \"language\": ISO 639-1 \
code or null}}."
    )
}

fn synthesis_input(request: &SynthesisRequest<'_>) -> Option<String> {
    let mut sections = Vec::new();

    if let Some(det) = request.deterministic {
        sections.push(format!("## OCR text\n\n{}", det.full_text));
    }
    if let Some(st) = request.structural {
        sections.push(format!("## Structural markdown\n\n{}", st.markdown));
        if let Some(tables) = st.tables.as_ref().filter(|t| !t.is_empty()) {
            sections.push(format!("## Tables\n\n{}", tables.join("\n\n")));
        }
        if let Some(notes) = &st.structural_notes {
            sections.push(format!("## Layout notes\n\n{}", notes));
        }
    }

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

fn classification_input(markdown: &str, recipients: &[Recipient]) -> String {
    let table = recipients
        .iter()
        .map(|r| format!("- {}: {}", r.name, r.tags.join(", ")))
        .collect::<Vec<_>>()
        .join("\n");

    let text = match markdown.char_indices().nth(CLASSIFY_INPUT_LIMIT) {
        Some((cut, _)) => &markdown[..cut],
        None => markdown,
    };

    format!("Recipients:\n{}\n\nDocument:\n{}", table, text)
}

/// Deserialize the first JSON object in a model reply. Reasoning blocks
/// before `</think>` are skipped. Malformed replies count as transient so
/// the call is retried.
fn parse_json_reply<T: DeserializeOwned>(text: &str) -> CollaboratorResult<T> {
    let answer = match text.rfind("</think>") {
        Some(idx) => &text[idx + "</think>".len()..],
        None => text,
    };

    let json = extract_json_object(answer).ok_or_else(|| {
        CollaboratorError::Transient("reply contained no JSON object".to_string())
    })?;
    serde_json::from_str(json)
        .map_err(|e| CollaboratorError::Transient(format!("malformed JSON reply: {e}")))
}

/// Slice of the first balanced `{...}` block, respecting string literals.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
