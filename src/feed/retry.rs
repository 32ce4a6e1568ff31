use std::future::Future;
use std::pin::Pin;

use anyhow::{anyhow, Result};
use rand::Rng;
use serde_json::json;
use tokio::time::{sleep, Duration};

use crate::logging::{obj, v_str, Domain, Logger};

/// Backoff policy for feed reads.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter_factor: 0.3,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff clamped to `max_delay_ms`, then +/- jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((clamped + jitter).max(0.0) as u64)
    }
}

/// Future returned by a retried operation, borrowing its state.
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Run `operation` against `state` until it succeeds or `max_retries` extra
/// attempts are spent. Each failed attempt is logged as a warning before
/// sleeping.
pub async fn retry_async<S, T, F>(
    config: &RetryConfig,
    logger: &Logger,
    operation_name: &str,
    state: &mut S,
    mut operation: F,
) -> Result<T>
where
    S: ?Sized,
    F: FnMut(&mut S) -> BoxFut<'_, T>,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=config.max_retries {
        match operation(&mut *state).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < config.max_retries {
                    let delay = config.delay_for_attempt(attempt);
                    logger.warn(
                        Domain::Market,
                        "retry",
                        obj(&[
                            ("operation", v_str(operation_name)),
                            ("attempt", json!(attempt + 1)),
                            ("max_attempts", json!(config.max_retries + 1)),
                            ("delay_ms", json!(delay.as_millis() as u64)),
                            ("error", v_str(&e.to_string())),
                        ]),
                    );
                    sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("retry_async exhausted without error")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_clamped() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn eventual_success() {
        let config = RetryConfig {
            base_delay_ms: 1,
            ..Default::default()
        };
        let mut attempts = 0u32;
        let result: Result<i32> = retry_async(&config, &Logger::null(), "read", &mut attempts, |n| {
            Box::pin(async move {
                *n += 1;
                if *n < 3 {
                    Err(anyhow!("not yet"))
                } else {
                    Ok(42)
                }
            })
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_with_last_error() {
        let config = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            jitter_factor: 0.0,
            ..Default::default()
        };
        let mut attempts = 0u32;
        let result: Result<i32> = retry_async(&config, &Logger::null(), "read", &mut attempts, |n| {
            Box::pin(async move {
                *n += 1;
                Err(anyhow!("down"))
            })
        })
        .await;
        assert_eq!(result.unwrap_err().to_string(), "down");
        assert_eq!(attempts, 3);
    }
}
