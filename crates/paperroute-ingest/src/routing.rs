//! Validation of classification output against the routing contract.

use crate::collaborators::{Classifier, ProposedClassification};
use crate::error::{IngestError, IngestResult};
use crate::retry::{call_with_retry, RetryPolicy};
use paperroute_config::{validate_recipients, Recipient};
use paperroute_core::slug::{is_slug, slugify};
use paperroute_core::{is_fallback_label, Classification, ReconciledArtifact, FALLBACK_RECIPIENT};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Delegates the decision to the classifier and enforces the result locally.
pub struct ClassificationRouter {
    classifier: Arc<dyn Classifier>,
    recipients: Vec<Recipient>,
    require_tag_overlap: bool,
    policy: RetryPolicy,
}

impl ClassificationRouter {
    /// The recipient table is validated here as well as at config load, so a
    /// router can never be built around the fallback label.
    pub fn new(
        classifier: Arc<dyn Classifier>,
        recipients: Vec<Recipient>,
        require_tag_overlap: bool,
        policy: RetryPolicy,
    ) -> IngestResult<Self> {
        validate_recipients(&recipients)?;
        Ok(Self {
            classifier,
            recipients,
            require_tag_overlap,
            policy,
        })
    }

    pub async fn route(&self, artifact: &ReconciledArtifact) -> IngestResult<Classification> {
        let outcome = call_with_retry(&self.policy, "classify", || {
            self.classifier.classify(&artifact.markdown, &self.recipients)
        })
        .await;

        let proposal = outcome
            .result
            .map_err(|e| IngestError::collaborator("classify", e))?;
        self.enforce(artifact, proposal)
    }

    /// Apply the routing contract to a raw proposal.
    pub fn enforce(
        &self,
        artifact: &ReconciledArtifact,
        proposal: ProposedClassification,
    ) -> IngestResult<Classification> {
        let recipient = self.resolve_recipient(artifact, &proposal.recipient);

        let category = correct_slug("category", &proposal.category);
        if category.is_empty() {
            return Err(IngestError::InvalidClassification(format!(
                "category '{}' has no usable characters",
                proposal.category
            )));
        }

        let mut subject = correct_slug("subject", &proposal.subject);
        if subject.is_empty() {
            subject = artifact.title.as_deref().map(slugify).unwrap_or_default();
        }
        if subject.is_empty() {
            return Err(IngestError::InvalidClassification(format!(
                "subject '{}' has no usable characters",
                proposal.subject
            )));
        }

        Ok(Classification {
            recipient,
            category,
            subject,
            confidence: proposal.confidence.filter(|c| (0.0..=1.0).contains(c)),
            rationale: proposal.rationale.filter(|r| !r.trim().is_empty()),
        })
    }

    fn resolve_recipient(&self, artifact: &ReconciledArtifact, proposed: &str) -> String {
        if self.require_tag_overlap && matching_recipients(artifact, &self.recipients).is_empty() {
            info!("No recipient tags found in document, routing to {}", FALLBACK_RECIPIENT);
            return FALLBACK_RECIPIENT.to_string();
        }

        let proposed = proposed.trim();
        if proposed.is_empty() || is_fallback_label(proposed) {
            return FALLBACK_RECIPIENT.to_string();
        }

        match self
            .recipients
            .iter()
            .find(|r| r.name.trim().eq_ignore_ascii_case(proposed))
        {
            Some(recipient) => recipient.name.trim().to_string(),
            None => {
                warn!("Classifier proposed unknown recipient '{}'", proposed);
                FALLBACK_RECIPIENT.to_string()
            }
        }
    }
}

fn correct_slug(field: &str, value: &str) -> String {
    if is_slug(value) {
        return value.to_string();
    }
    let corrected = slugify(value);
    debug!(field, from = value, to = %corrected, "Corrected classification slug");
    corrected
}

/// Recipients with at least one tag occurring in the document text or title.
pub(crate) fn matching_recipients<'a>(
    artifact: &ReconciledArtifact,
    recipients: &'a [Recipient],
) -> Vec<&'a Recipient> {
    let mut haystack = artifact.markdown.to_lowercase();
    if let Some(title) = &artifact.title {
        haystack.push('\n');
        haystack.push_str(&title.to_lowercase());
    }

    recipients
        .iter()
        .filter(|r| r.tags.iter().any(|tag| contains_word(&haystack, tag)))
        .collect()
}

/// Case-insensitive match of `needle` at word boundaries. `haystack` must
/// already be lowercase.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return false;
    }

    haystack.match_indices(&needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
