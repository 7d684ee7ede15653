use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, warn};

use common::{Error, Result};

/// Bounded exponential-backoff policy for remote calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Ceiling on a single backoff sleep.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry number `attempt + 1`: `base × 2^attempt`, capped
    /// at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying transient failures with exponential backoff.
///
/// - `Error::Transient` — sleep and retry, up to `max_attempts` total
///   attempts; exhaustion surfaces as `Error::DataUnavailable`, which the
///   worker treats as "skip this tick", never as fatal.
/// - `Error::Fatal` — propagated immediately, zero further attempts.
/// - A shutdown signal observed during a backoff sleep aborts the wait and
///   returns `Error::Shutdown` so the process can terminate promptly.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                if attempt + 1 == policy.max_attempts {
                    warn!(attempts = policy.max_attempts, error = %e, "retries exhausted");
                    return Err(Error::DataUnavailable);
                }
                let delay = policy.backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "transient error, backing off");
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.changed() => return Err(Error::Shutdown),
                }
            }
            Err(e) => return Err(e),
        }
    }
    // max_attempts == 0 — nothing was ever tried
    Err(Error::DataUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(31), Duration::from_secs(8));
        // shift overflow saturates instead of wrapping
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success_returns_the_success() {
        let (_tx, mut shutdown) = watch::channel(false);
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result = call_with_retry(&policy(5, 100), &mut shutdown, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(Error::Transient(format!("hiccup {n}")))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // Three backoff sleeps: 100 + 200 + 400 ms of virtual time
        assert_eq!(started.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_data_unavailable_after_exactly_max_attempts() {
        let (_tx, mut shutdown) = watch::channel(false);
        let attempts = AtomicU32::new(0);

        let result: Result<()> = call_with_retry(&policy(3, 10), &mut shutdown, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transient("always down".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::DataUnavailable)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_short_circuits_with_zero_additional_attempts() {
        let (_tx, mut shutdown) = watch::channel(false);
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<()> = call_with_retry(&policy(5, 100), &mut shutdown, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Fatal("bad credentials".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Fatal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO, "fatal must not sleep");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_aborts_the_wait() {
        let (tx, mut shutdown) = watch::channel(false);
        tx.send(true).unwrap();

        let result: Result<()> = call_with_retry(&policy(5, 60_000), &mut shutdown, || async {
            Err(Error::Transient("down".into()))
        })
        .await;

        assert!(matches!(result, Err(Error::Shutdown)));
    }
}
