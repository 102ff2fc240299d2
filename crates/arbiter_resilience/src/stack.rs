//! Composition of the resilience layers.
//!
//! Order is fixed: bulkhead, then rate limiter, then circuit breaker, then
//! retry, then the underlying call. The breaker is checked per attempt so a
//! circuit opened mid-retry stops the remaining attempts.

use crate::{Bulkhead, CircuitBreaker, Retrier, RetryPolicy, SlidingWindowLimiter};
use arbiter_core::CoreResult;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Composes the middleware layers around a tool invocation.
///
/// Every layer is optional except retry, which defaults to no retries.
#[derive(Debug, Clone)]
pub struct ResilienceStack {
    bulkhead: Option<Arc<Bulkhead>>,
    limiter: Option<Arc<SlidingWindowLimiter>>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: RetryPolicy,
    rate_limit_wait: Duration,
}

impl ResilienceStack {
    /// An empty stack: no layers, no retries
    #[must_use]
    pub fn new() -> Self {
        Self {
            bulkhead: None,
            limiter: None,
            breaker: None,
            retry: RetryPolicy::none(),
            rate_limit_wait: Duration::from_secs(30),
        }
    }

    /// Attach a bulkhead
    #[must_use]
    pub fn with_bulkhead(mut self, bulkhead: Arc<Bulkhead>) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    /// Attach a rate limiter
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<SlidingWindowLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Attach a circuit breaker
    #[must_use]
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// How long to wait on a saturated rate limiter before giving up
    #[must_use]
    pub const fn with_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_wait = wait;
        self
    }

    /// The circuit breaker, if attached
    #[must_use]
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// The rate limiter, if attached
    #[must_use]
    pub fn rate_limiter(&self) -> Option<&Arc<SlidingWindowLimiter>> {
        self.limiter.as_ref()
    }

    /// Run `op` for `tool` through every configured layer.
    ///
    /// The bulkhead permit is held for the full duration, including retries.
    /// The rate limiter admits the logical call once; retries do not consume
    /// additional slots.
    ///
    /// # Errors
    ///
    /// Propagates the first layer rejection or the final attempt's error.
    pub async fn invoke<T, F, Fut>(&self, tool: &str, op: F) -> CoreResult<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let _permit = match &self.bulkhead {
            Some(bulkhead) => Some(bulkhead.acquire(tool).await?),
            None => None,
        };

        if let Some(limiter) = &self.limiter {
            limiter.acquire(tool, self.rate_limit_wait).await?;
        }

        let retrier = Retrier::new(self.retry.clone());
        retrier
            .run(tool, |attempt| {
                let op = &op;
                async move {
                    if let Some(breaker) = &self.breaker {
                        breaker.check(tool)?;
                    }
                    let started = Instant::now();
                    let result = op(attempt).await;
                    if let Some(breaker) = &self.breaker {
                        match &result {
                            Ok(_) => {
                                breaker.record_success(tool);
                                breaker.record_latency(tool, started.elapsed());
                            }
                            Err(_) => breaker.record_failure(tool),
                        }
                    }
                    result
                }
            })
            .await
    }
}

impl Default for ResilienceStack {
    fn default() -> Self {
        Self::new()
    }
}
