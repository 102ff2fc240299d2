//! ARBITER Resilience Middleware
//!
//! Retry, circuit breaker, rate limiter, and bulkhead wrappers that compose
//! around a raw tool invocation. Each is independently configurable and
//! independently testable; `ResilienceStack` composes them in the fixed
//! order bulkhead -> rate limiter -> circuit breaker -> retry -> call.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bulkhead;
pub mod circuit;
pub mod rate_limit;
pub mod retry;
pub mod stack;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use rate_limit::{
    Admission, LimitStatus, MemoryStore, RateLimitConfig, RateLimitStore, ScopeUsage,
    SlidingWindowLimiter,
};
pub use retry::{Retrier, RetryPolicy};
pub use stack::ResilienceStack;
