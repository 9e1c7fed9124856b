//! Retry policies: exponential backoff with jitter, preset-tuned per
//! failure domain, honoring `retry_after` hints from rate-limited upstreams.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

/// A complete retry specification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomized symmetrically around it.
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub const DEFAULT: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
        jitter_factor: 0.1,
    };

    pub const NETWORK: RetryPolicy = RetryPolicy {
        max_attempts: 4,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(60),
        backoff_multiplier: 2.0,
        jitter_factor: 0.3,
    };

    pub const DATABASE: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        backoff_multiplier: 2.0,
        jitter_factor: 0.1,
    };

    pub const AGGRESSIVE: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(60),
        backoff_multiplier: 2.0,
        jitter_factor: 0.2,
    };

    pub const CONSERVATIVE: RetryPolicy = RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 2.0,
        jitter_factor: 0.1,
    };

    /// Deterministic pre-jitter delay for 1-indexed attempt `n`:
    /// `min(initial * multiplier^(n-1), max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exp);
        let capped = scaled.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Jittered delay: `base * (1 + (r - 0.5) * jitter)` with `r` uniform in
    /// [0, 1), clamped at zero.
    pub fn delay_for_attempt(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        if base == 0.0 {
            return Duration::ZERO;
        }
        let r: f64 = rng.random();
        let jittered = base * (1.0 + (r - 0.5) * self.jitter_factor);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Drive `operation` under `policy`. The built-in rule retries when the
/// error reports itself retryable; `should_retry` replaces that rule
/// entirely when provided. A `retry_after` hint overrides the computed
/// delay for that attempt.
pub async fn run<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    should_retry: Option<&(dyn Fn(&CoreError, u32) -> bool + Send + Sync)>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = match should_retry {
                    Some(rule) => rule(&err, attempt),
                    None => err.is_retryable(),
                };
                if !retryable || attempt >= policy.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        kind = %err.kind,
                        "giving up after failure"
                    );
                    return Err(err);
                }

                let delay = match err.retry_after {
                    Some(hint) => hint,
                    None => policy.delay_for_attempt(attempt, &mut rand::rng()),
                };
                debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    kind = %err.kind,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn base_delay_doubles_up_to_the_cap() {
        let policy = RetryPolicy::DEFAULT;
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
        assert_eq!(policy.base_delay(6), Duration::from_secs(30)); // capped at 32 -> 30
        assert_eq!(policy.base_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn jittered_delay_stays_within_band() {
        let policy = RetryPolicy::NETWORK;
        let mut rng = rand::rng();
        for attempt in 1..=6 {
            let base = policy.base_delay(attempt).as_millis() as f64;
            let delay = policy.delay_for_attempt(attempt, &mut rng).as_millis() as f64;
            let half_band = base * policy.jitter_factor / 2.0;
            assert!(delay >= base - half_band - 1.0);
            assert!(delay <= base + half_band + 1.0);
        }
    }

    #[test]
    fn delays_grow_monotonically_modulo_jitter() {
        // delay(n+1) >= delay(n) * multiplier * (1 - jitter/2), up to the cap.
        let policy = RetryPolicy::AGGRESSIVE;
        let mut rng = rand::rng();
        let mut previous = policy.delay_for_attempt(1, &mut rng).as_millis() as f64;
        for attempt in 2..=4 {
            let next = policy.delay_for_attempt(attempt, &mut rng).as_millis() as f64;
            if policy.base_delay(attempt) < policy.max_delay {
                let floor = previous
                    * policy.backoff_multiplier
                    * (1.0 - policy.jitter_factor / 2.0)
                    * (1.0 - policy.jitter_factor / 2.0);
                assert!(next >= floor * 0.99, "attempt {attempt}: {next} < {floor}");
            }
            previous = next;
        }
    }

    #[tokio::test]
    async fn run_retries_transient_failures_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::DEFAULT
        };
        let result = run(&policy, "test-op", None, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::new(ErrorKind::Timeout, "flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_gives_up_on_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = run(&RetryPolicy::DEFAULT, "test-op", None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::invalid_input("bad payload")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_honors_a_custom_rule() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::DEFAULT
        };
        // Retry even non-retryable kinds, but only once.
        let rule = |_: &CoreError, attempt: u32| attempt < 2;
        let result: Result<()> = run(&policy, "test-op", Some(&rule), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::invalid_input("always bad")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
