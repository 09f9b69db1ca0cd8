use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::StoreError;

/// Bounded retry for transient storage failures (lock contention, pool exhaustion).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 25,
            max_backoff_ms: 500,
            jitter_ms: 25,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of retries.
///
/// Non-transient errors (quota, not found, ...) are returned untouched on the first
/// attempt. Exhausted transient errors come back as [`StoreError::Unavailable`].
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    op_name: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                if attempt > config.max_retries {
                    debug!(
                        "Exhausted {} retries for {}; last error: {}",
                        config.max_retries, op_name, e
                    );
                    return Err(StoreError::Unavailable(format!(
                        "{} failed after {} attempts: {}",
                        op_name, attempt, e
                    )));
                }

                let wait_duration = calculate_backoff(config, attempt);
                warn!(
                    "{} attempt {}/{} failed with transient error: {}. Retrying in {:?}...",
                    op_name,
                    attempt,
                    config.max_retries + 1,
                    e,
                    wait_duration
                );
                sleep(wait_duration).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_backoff_ms as f64;
    let max = config.max_backoff_ms as f64;

    // Exponential: base * 2^(attempt - 1)
    let raw_backoff = base * 2_f64.powi((attempt as i32) - 1);
    let capped_backoff = raw_backoff.min(max);

    let jitter = rand::thread_rng().gen_range(0..=config.jitter_ms);

    Duration::from_millis((capped_backoff as u64) + jitter)
}
