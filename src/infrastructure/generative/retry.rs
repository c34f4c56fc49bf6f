//! Retry with exponential backoff for transient generative failures.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::domain::models::config::RetryConfig;
use crate::domain::ports::generative::GenerativeError;

/// Retry policy with exponential backoff.
///
/// Retries rate-limit, network, and timeout failures; invalid output and
/// cancellation are returned immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, GenerativeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerativeError>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_transient() || attempt >= self.max_retries {
                        return Err(err);
                    }

                    let backoff = self.backoff_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient generative failure, retrying"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// initial * 2^attempt, capped at max_backoff_ms.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}
