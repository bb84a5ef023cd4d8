// =============================================================================
// Retry / backoff helper
// =============================================================================
//
// A small internal helper replacing "retry/backoff libraries" per
// SPEC_FULL.md §9: takes an async operation, a retry policy, and returns
// either the successful value or the last error. Used by HTTP collectors,
// the WS manager's reconnect loop, and the scheduler's job runner.
// =============================================================================

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_retries, base_delay, max_delay }
    }

    /// `delay = min(base * 2^attempt, max_delay) * jitter`, `jitter ∈ [0.5, 1.5]`
    /// (spec §4.1's reconnect backoff formula, reused here as the general
    /// retry-backoff formula per SPEC_FULL.md §9).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = 2_f64.powi(attempt as i32);
        let base_ms = self.base_delay.as_secs_f64() * exp * 1000.0;
        let capped_ms = base_ms.min(self.max_delay.as_secs_f64() * 1000.0);
        let jitter = rand::thread_rng().gen_range(0.5..=1.5);
        Duration::from_secs_f64((capped_ms * jitter).max(0.0) / 1000.0)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Run `op` up to `policy.max_retries + 1` times, classifying each failure
/// via `classify`. Stops immediately on a non-retryable error kind.
pub async fn with_retry<T, E, F, Fut, C>(
    component: &str,
    policy: RetryPolicy,
    classify: C,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorKind,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify(&e);
                if !kind.is_retryable() || attempt >= policy.max_retries {
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(component, attempt, delay_ms = delay.as_millis() as u64, "operation failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_for_attempt_caps_at_max_delay() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30));
        let d = policy.delay_for_attempt(10);
        assert!(d.as_secs_f64() <= 30.0 * 1.5 + 0.001);
    }

    #[tokio::test]
    async fn with_retry_stops_on_non_retryable_kind() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_retry(
            "test",
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
            |_e: &&str| ErrorKind::ProtocolInvalid,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("bad frame") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retry_retries_transient_errors_up_to_limit() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_retry(
            "test",
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5)),
            |_e: &&str| ErrorKind::TransientNetwork,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("timeout") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn with_retry_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            "test",
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
            |_e: &&str| ErrorKind::TransientNetwork,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 1 {
                        Err("timeout")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
    }
}
