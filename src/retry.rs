//! Exponential backoff shared by remote calls and transfers.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

impl RetryAction {
    pub fn when(retryable: bool) -> Self {
        if retryable {
            Self::Retry
        } else {
            Self::Abort
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay_secs: u64,
    /// Ceiling for the exponential part; jitter is added on top.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 5,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    #[cfg(test)]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_secs: 0,
            max_delay_secs: 0,
        }
    }

    /// Wait before the retry that follows failed attempt `retry`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u64.checked_pow(retry).unwrap_or(u64::MAX);
        let backoff = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);
        let jitter_ms = match self.base_delay_secs {
            0 => 0,
            base => rand::thread_rng().gen_range(0..base * 1000),
        };
        Duration::from_secs(backoff) + Duration::from_millis(jitter_ms)
    }
}

/// Drive `operation` until it succeeds, `classify` says abort, or the
/// retry budget is spent. The last error wins.
///
/// `operation` is handed the attempt number so it can reset per-attempt
/// state and report it.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classify: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let exhausted = attempt >= config.max_retries;
        if exhausted || classify(&error) == RetryAction::Abort {
            return Err(error);
        }

        let wait = config.delay_for_retry(attempt);
        attempt += 1;
        tracing::warn!(
            retry = attempt,
            of = config.max_retries,
            wait_ms = wait.as_millis() as u64,
            error = %error,
            "Attempt failed, backing off"
        );
        tokio::time::sleep(wait).await;
    }
}
