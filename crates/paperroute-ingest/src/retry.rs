//! Bounded retry with exponential backoff for collaborator calls.

use crate::error::{CollaboratorError, CollaboratorResult};
use paperroute_config::PipelineConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Retry settings shared by every collaborator call of a job.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Timeout applied to each individual attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.call_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            call_timeout: config.call_timeout(),
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (0-based).
    pub fn backoff_for_attempt(&self, retry: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(retry as i32);
        Duration::from_secs_f64(base.min(self.max_backoff.as_secs_f64()))
    }
}

/// Result of a retried call together with the number of attempts made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: CollaboratorResult<T>,
    pub attempts: u32,
}

/// Run `call` until it succeeds, fails permanently, or the attempt bound is
/// reached. Exhausted transient failures come back as
/// [`CollaboratorError::Permanent`].
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CollaboratorResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match timeout(policy.call_timeout, call()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Call succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Ok(Err(e)) => e,
            Err(_) => CollaboratorError::Timeout(policy.call_timeout),
        };

        if !error.is_retryable() {
            return RetryOutcome {
                result: Err(error),
                attempts: attempt,
            };
        }

        if attempt >= max_attempts {
            warn!(operation, attempts = attempt, "Retries exhausted: {}", error);
            return RetryOutcome {
                result: Err(CollaboratorError::Permanent(format!(
                    "gave up after {} attempts: {}",
                    attempt, error
                ))),
                attempts: attempt,
            };
        }

        let backoff = policy.backoff_for_attempt(attempt - 1);
        warn!(
            operation,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            "Transient failure, retrying: {}",
            error
        );
        sleep(backoff).await;
    }
}
