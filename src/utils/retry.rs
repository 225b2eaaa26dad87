//! Retry with exponential backoff
//!
//! Used around token minting, where a throttled or briefly unavailable
//! credentials service is worth one more try before failing the acquire.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f64,

    /// Randomize each delay within [delay / 2, delay]
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Delay before retry number `retry` (0-indexed)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.use_jitter && capped_ms >= 2.0 {
            let half = capped_ms / 2.0;
            half + rand::thread_rng().gen_range(0.0..=half)
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

/// Outcome of `retry_with_backoff`
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// Final success, or the last error seen
    pub result: Result<T, E>,

    /// Attempts made, including the first
    pub attempts: u32,

    /// Time spent sleeping between attempts
    pub total_delay: Duration,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_retries` retries have been used up
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    config: &RetryConfig,
    is_retryable: R,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempts = 0;
    let mut total_delay = Duration::ZERO;

    loop {
        attempts += 1;

        let err = match operation().await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_delay,
                }
            }
            Err(err) => err,
        };

        if attempts > config.max_retries || !is_retryable(&err) {
            return RetryResult {
                result: Err(err),
                attempts,
                total_delay,
            };
        }

        let delay = config.calculate_delay(attempts - 1);
        total_delay += delay;

        tracing::debug!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Retrying after transient failure"
        );

        sleep(delay).await;
    }
}

/// Retry configuration presets
pub mod presets {
    use super::*;

    /// Token minting: a single quick retry
    ///
    /// Minting is a local signing step plus a credentials lookup; anything
    /// that still fails after one retry is surfaced to the caller.
    pub fn token_mint() -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(1)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(true)
    }
}
