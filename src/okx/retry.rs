// =============================================================================
// Retry Policy — bounded attempts with exponential backoff
// =============================================================================
//
// Delay before attempt n+1 is `base_delay * 2^(n-1)`: with the defaults
// (3 attempts, 1 s) a call that keeps failing transiently sleeps 1 s and 2 s
// and then gives up. Non-retryable errors are returned immediately.
// =============================================================================

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Reusable retry policy parametrised by attempt budget, base delay and a
/// retryability predicate.
pub struct RetryPolicy<E> {
    max_attempts: u32,
    base_delay: Duration,
    is_retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            is_retryable: self.is_retryable,
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl<E: Display> RetryPolicy<E> {
    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: u32, base_delay: Duration, is_retryable: fn(&E) -> bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            is_retryable,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep inserted after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent. `op` receives the 1-based attempt number. The last error is
    /// returned on failure.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_attempts && (self.is_retryable)(&e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(label, attempt, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::okx::FetchError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy<FetchError> {
        RetryPolicy::new(3, Duration::from_secs(1), FetchError::is_transient)
    }

    #[test]
    fn backoff_doubles() {
        let p = policy();
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
    }

    #[test]
    fn zero_attempts_means_one() {
        let p: RetryPolicy<FetchError> =
            RetryPolicy::new(0, Duration::from_millis(5), FetchError::is_transient);
        assert_eq!(p.max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_three_times_gives_up_after_three_seconds() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let out: Result<f64, FetchError> = policy()
            .run("ticker", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::RateLimited) }
            })
            .await;

        assert_eq!(out, Err(FetchError::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_source_is_called_three_times() {
        use crate::okx::PriceSource;
        use crate::testing::ScriptedSource;

        let source = ScriptedSource::with_price("BTC", 64_000.0);
        for _ in 0..3 {
            source.push_response(Err(FetchError::RateLimited));
        }
        let started = tokio::time::Instant::now();

        let out = policy().run("ticker", |_| source.spot_price("BTC")).await;

        assert_eq!(out, Err(FetchError::RateLimited));
        assert_eq!(source.spot_calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        // the queue is drained, so the next call sees the price table
        assert_eq!(source.spot_price("BTC").await, Ok(64_000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<f64, FetchError> = policy()
            .run("ticker", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::Rejected { status: 400 }) }
            })
            .await;

        assert_eq!(out, Err(FetchError::Rejected { status: 400 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_second_attempt() {
        let started = tokio::time::Instant::now();
        let out = policy()
            .run("ticker", |attempt| async move {
                if attempt == 1 {
                    Err(FetchError::Upstream { status: 502 })
                } else {
                    Ok(101.5)
                }
            })
            .await;

        assert_eq!(out, Ok(101.5));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }
}
