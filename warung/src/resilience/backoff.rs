//! Exponential backoff with jitter for retryable LLM failures.
//!
//! `delay = min(max_delay, initial * multiplier^attempt) + U(0, delay * jitter)`,
//! capped at `max_delay`. Jitter spreads synchronized retries from multiple
//! workers hitting the same recovering provider.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Base delay for an attempt (0-indexed), before jitter. Non-decreasing
    /// in `attempt` and capped at `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }

    /// Base delay plus uniform jitter, still capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let jittered = if self.jitter > 0.0 {
            base + rand::thread_rng().gen_range(0.0..=base * self.jitter)
        } else {
            base
        };
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `op` up to `max_retries + 1` times, sleeping between attempts.
///
/// Only retryable errors (timeouts, connection failures) trigger another
/// attempt; everything else bubbles immediately. Exhaustion yields
/// `LlmError::BackoffExhausted` carrying the attempt count and last error.
pub async fn retry_with_backoff<T, F, Fut>(
    operation: &str,
    max_retries: u32,
    config: &BackoffConfig,
    mut op: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let total_attempts = max_retries + 1;
    let mut last_error = None;

    for attempt in 0..total_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                if attempt + 1 >= total_attempts {
                    error!(operation, retries = max_retries, error = %e, "all retries exhausted");
                    return Err(LlmError::BackoffExhausted {
                        attempts: total_attempts,
                        last: Box::new(e),
                    });
                }
                let delay = config.delay(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    total = total_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after failure"
                );
                last_error = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    // Only reachable with max_retries == u32::MAX overflow-free loops; keep
    // the compiler satisfied with the last seen error.
    Err(LlmError::BackoffExhausted {
        attempts: total_attempts,
        last: Box::new(last_error.unwrap_or(LlmError::Provider("unknown".into()))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn timeout_err() -> LlmError {
        LlmError::Timeout {
            seconds: 1.0,
            operation: "test".into(),
        }
    }

    /// **Scenario**: base delays are non-decreasing and capped.
    #[test]
    fn base_delay_monotonic_and_capped() {
        let cfg = BackoffConfig::default();
        let mut prev = Duration::ZERO;
        for attempt in 0..12 {
            let d = cfg.base_delay(attempt);
            assert!(d >= prev, "attempt {attempt}: {d:?} < {prev:?}");
            assert!(d <= cfg.max_delay);
            prev = d;
        }
        assert_eq!(cfg.base_delay(10), cfg.max_delay);
    }

    #[test]
    fn jittered_delay_within_bounds() {
        let cfg = BackoffConfig::default();
        for attempt in 0..6 {
            let base = cfg.base_delay(attempt).as_secs_f64();
            let d = cfg.delay(attempt).as_secs_f64();
            assert!(d >= base);
            assert!(d <= (base * (1.0 + cfg.jitter)).min(cfg.max_delay.as_secs_f64()) + 1e-9);
        }
    }

    /// **Scenario**: a timeout followed by a success needs exactly one retry.
    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("op", 3, &BackoffConfig::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(timeout_err())
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// **Scenario**: non-retryable errors bubble without further attempts.
    #[tokio::test]
    async fn non_retryable_bubbles_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff("op", 3, &BackoffConfig::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Provider("bad request".into())) }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Provider(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// **Scenario**: exhaustion wraps the last error.
    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff("op", 2, &BackoffConfig::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(timeout_err()) }
        })
        .await;
        match result {
            Err(LlmError::BackoffExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, LlmError::Timeout { .. }));
            }
            other => panic!("expected BackoffExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
