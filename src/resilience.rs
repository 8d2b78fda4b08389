//! Retry and timeout helpers for schema provider calls.
//!
//! Only transient errors are retried, with exponential jittered backoff up to
//! a bounded number of attempts. Every attempt runs under its own timeout.

use crate::constants::{DEFAULT_RETRY_INITIAL_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS};
use crate::error::SchemaError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (for exponential backoff).
    pub multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (just execute once).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(attempts) = std::env::var("GENERATOR_RETRY_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                config.max_attempts = n.max(1);
            }
        }

        if let Ok(delay) = std::env::var("GENERATOR_RETRY_INITIAL_DELAY_MS") {
            if let Ok(ms) = delay.parse() {
                config.initial_delay = Duration::from_millis(ms);
            }
        }

        config
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);

        let capped_delay_ms = base_delay_ms.min(self.max_delay.as_millis() as f64);

        let final_delay_ms = if self.jitter {
            // Add +/- 25% jitter
            let jitter_factor = 0.75 + (rand_jitter() * 0.5);
            capped_delay_ms * jitter_factor
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms as u64)
    }
}

/// Simple pseudo-random jitter factor between 0.0 and 1.0.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    (nanos as f64) / (u32::MAX as f64)
}

/// Execute an async operation, retrying transient failures.
///
/// Returns the number of attempts made alongside the outcome.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, operation: F) -> (Result<T, SchemaError>, u32)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, SchemaError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!("Retry attempt {} after {:?} delay", attempt + 1, delay);
            sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return (Ok(value), attempt + 1),
            Err(e) if !e.is_transient() => {
                debug!("Non-transient error, not retrying: {}", e);
                return (Err(e), attempt + 1);
            }
            Err(e) => {
                warn!(
                    "Transient error on attempt {}/{}: {}",
                    attempt + 1,
                    max_attempts,
                    e
                );
                attempt += 1;
                if attempt >= max_attempts {
                    return (Err(e), attempt);
                }
            }
        }
    }
}

/// Bound a provider call by `timeout`; expiry is reported as the provider
/// being unavailable for that table.
pub async fn with_timeout<Fut, T>(
    timeout: Duration,
    provider: &str,
    table: &str,
    operation: Fut,
) -> Result<T, SchemaError>
where
    Fut: Future<Output = Result<T, SchemaError>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(SchemaError::unavailable(
            provider,
            table,
            format!("lookup timed out after {:?}", timeout),
        )),
    }
}
