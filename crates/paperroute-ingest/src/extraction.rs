//! Concurrent fan-out to the two extraction services.

use crate::collaborators::{DeterministicExtractor, StructuralExtractor};
use crate::retry::{call_with_retry, RetryOutcome, RetryPolicy};
use paperroute_core::{
    DeterministicExtraction, ExtractionOutcome, ExtractionSource, StructuralExtraction,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome of both extraction calls for one document.
#[derive(Debug)]
pub struct ExtractionPair {
    pub deterministic: ExtractionOutcome<DeterministicExtraction>,
    pub structural: ExtractionOutcome<StructuralExtraction>,
}

impl ExtractionPair {
    pub fn any_success(&self) -> bool {
        self.deterministic.is_success() || self.structural.is_success()
    }
}

/// Runs both extractors concurrently under a shared stage deadline.
pub struct ExtractionFanOut {
    deterministic: Arc<dyn DeterministicExtractor>,
    structural: Arc<dyn StructuralExtractor>,
    policy: RetryPolicy,
    deadline: Duration,
}

impl ExtractionFanOut {
    pub fn new(
        deterministic: Arc<dyn DeterministicExtractor>,
        structural: Arc<dyn StructuralExtractor>,
        policy: RetryPolicy,
        deadline: Duration,
    ) -> Self {
        Self {
            deterministic,
            structural,
            policy,
            deadline,
        }
    }

    /// Run both extractions. Always yields two outcomes: a failure on one
    /// side never cancels the other, and a call still running at the deadline
    /// is recorded as failed and left to finish in the background.
    pub async fn extract(&self, path: &Path) -> ExtractionPair {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.deadline;

        let deterministic = {
            let extractor = Arc::clone(&self.deterministic);
            let policy = self.policy.clone();
            let path = path.to_path_buf();
            tokio::spawn(async move {
                call_with_retry(&policy, "extract_deterministic", || {
                    extractor.extract_deterministic(&path)
                })
                .await
            })
        };

        let structural = {
            let extractor = Arc::clone(&self.structural);
            let policy = self.policy.clone();
            let path = path.to_path_buf();
            tokio::spawn(async move {
                call_with_retry(&policy, "extract_structural", || {
                    extractor.extract_structural(&path)
                })
                .await
            })
        };

        let (deterministic, structural) = tokio::join!(
            settle(deterministic, deadline, ExtractionSource::Deterministic, started),
            settle(structural, deadline, ExtractionSource::Structural, started),
        );

        debug!(
            deterministic = deterministic.is_success(),
            structural = structural.is_success(),
            "Extraction finished for {}",
            path.display()
        );

        ExtractionPair {
            deterministic,
            structural,
        }
    }
}

async fn settle<T>(
    handle: JoinHandle<RetryOutcome<T>>,
    deadline: tokio::time::Instant,
    source: ExtractionSource,
    started: Instant,
) -> ExtractionOutcome<T> {
    match tokio::time::timeout_at(deadline, handle).await {
        Ok(Ok(RetryOutcome {
            result: Ok(payload),
            attempts,
        })) => ExtractionOutcome::success(source, payload, attempts, started.elapsed()),
        Ok(Ok(RetryOutcome {
            result: Err(e),
            attempts,
        })) => {
            warn!(source = source.as_str(), attempts, "Extraction failed: {}", e);
            ExtractionOutcome::failure(source, e.to_string(), attempts, started.elapsed())
        }
        Ok(Err(e)) => {
            warn!(source = source.as_str(), "Extraction task aborted: {}", e);
            ExtractionOutcome::failure(source, format!("task failed: {e}"), 0, started.elapsed())
        }
        Err(_) => {
            // The handle is dropped, which detaches the task without
            // cancelling the in-flight request.
            warn!(source = source.as_str(), "Extraction abandoned at stage deadline");
            ExtractionOutcome::failure(
                source,
                "stage deadline exceeded".to_string(),
                0,
                started.elapsed(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::test_support::{fast_policy, MockDeterministic, MockStructural};

    fn fan_out(det: MockDeterministic, st: MockStructural, deadline: Duration) -> ExtractionFanOut {
        ExtractionFanOut::new(Arc::new(det), Arc::new(st), fast_policy(), deadline)
    }

    #[tokio::test]
    async fn test_both_sides_succeed() {
        let pair = fan_out(
            MockDeterministic::ok("Invoice 42"),
            MockStructural::ok("# Invoice"),
            Duration::from_secs(5),
        )
        .extract(Path::new("/inbox/scan.pdf"))
        .await;

        assert_eq!(pair.deterministic.payload().unwrap().full_text, "Invoice 42");
        assert_eq!(pair.structural.payload().unwrap().markdown, "# Invoice");
        assert_eq!(pair.deterministic.attempts, 1);
    }

    #[tokio::test]
    async fn test_one_side_failing_does_not_affect_other() {
        let structural = MockStructural::failing(CollaboratorError::Permanent("415".into()));
        let pair = fan_out(
            MockDeterministic::ok("Invoice 42"),
            structural,
            Duration::from_secs(5),
        )
        .extract(Path::new("/inbox/scan.pdf"))
        .await;

        assert!(pair.deterministic.is_success());
        assert!(!pair.structural.is_success());
        assert!(pair.structural.error().unwrap().contains("415"));
        assert!(pair.any_success());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let deterministic = MockDeterministic::ok("Invoice 42")
            .fail_first(vec![CollaboratorError::Transient("503".into())]);
        let pair = fan_out(deterministic, MockStructural::ok("# Invoice"), Duration::from_secs(5))
            .extract(Path::new("/inbox/scan.pdf"))
            .await;

        assert!(pair.deterministic.is_success());
        assert_eq!(pair.deterministic.attempts, 2);
    }

    #[tokio::test]
    async fn test_deadline_abandons_slow_side() {
        let structural = MockStructural::ok("# Late").with_delay(Duration::from_millis(500));
        let pair = fan_out(
            MockDeterministic::ok("Invoice 42"),
            structural,
            Duration::from_millis(50),
        )
        .extract(Path::new("/inbox/scan.pdf"))
        .await;

        assert!(pair.deterministic.is_success());
        assert_eq!(pair.structural.error(), Some("stage deadline exceeded"));
    }
}
