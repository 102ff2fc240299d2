//! Bounded retry with exponential backoff and jitter.

use arbiter_core::{CoreResult, ToolError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Phrases that mark a transient failure worth retrying
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "temporarily unavailable",
    "service unavailable",
    "rate limit",
    "too many requests",
    "429",
    "503",
];

/// Classify an error message as transient or not
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Backoff policy for retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after the first (0 disables retries)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Jitter fraction applied to each delay (0.0 disables)
    pub jitter: f64,
}

impl RetryPolicy {
    /// Create a policy with the given retry budget and common defaults
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Disable retries entirely
    #[must_use]
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Set the base delay
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay cap
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction (clamped to 0.0..=1.0)
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the retry following `attempt` (0-based), jitter applied
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(31) as i32);
        let raw = self.base_delay.as_secs_f64() * exp;
        let capped = raw.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Drives an async operation through bounded retries
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    /// Create a retrier with the given policy
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in use
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, a non-retryable error occurs, or the
    /// retry budget is exhausted. The closure receives the attempt index.
    ///
    /// # Errors
    ///
    /// Returns the final error once attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, tool: &str, mut op: F) -> CoreResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let transient = err.is_retryable()
                        || matches!(&err, ToolError::Invocation { message, .. } if is_transient_message(message));
                    if !transient || attempt >= self.policy.max_retries {
                        return Err(err);
                    }
                    let delay = self.policy.delay_for(attempt);
                    debug!(tool, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient(tool: &str) -> ToolError {
        ToolError::Invocation {
            tool: tool.to_string(),
            message: "connection reset by peer".to_string(),
            retryable: true,
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient_message("Connection reset by peer"));
        assert!(is_transient_message("upstream timed out"));
        assert!(is_transient_message("HTTP 429 Too Many Requests"));
        assert!(is_transient_message("service temporarily unavailable"));
        assert!(!is_transient_message("invalid argument"));
        assert!(!is_transient_message("permission denied"));
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(5)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        // capped
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(0.5);
        for _ in 0..50 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let retrier = Retrier::new(RetryPolicy::new(3));
        let calls = AtomicU32::new(0);
        let result: CoreResult<u32> = retrier
            .run("t", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let retrier = Retrier::new(
            RetryPolicy::new(5)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(0.0),
        );
        let calls = AtomicU32::new(0);
        let result: CoreResult<&str> = retrier
            .run("t", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient("t"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let retrier = Retrier::new(
            RetryPolicy::new(2)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(0.0),
        );
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = retrier
            .run("t", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient("t")) }
            })
            .await;
        assert!(result.is_err());
        // initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let retrier = Retrier::new(RetryPolicy::new(5));
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = retrier
            .run("t", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ToolError::GuardBlocked {
                        guard: "contract".to_string(),
                        reason: "n > 0".to_string(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_message_triggers_retry_even_if_flagged_non_retryable() {
        let retrier = Retrier::new(
            RetryPolicy::new(1)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(0.0),
        );
        let calls = AtomicU32::new(0);
        let _: CoreResult<()> = retrier
            .run("t", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ToolError::Invocation {
                        tool: "t".to_string(),
                        message: "503 service unavailable".to_string(),
                        retryable: false,
                    })
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
