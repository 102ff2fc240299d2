//! Shared error taxonomy for ARBITER.
//!
//! Guard rejections and middleware rejections are structured results, not
//! panics: every variant carries the fields a caller needs to decide whether
//! to retry, back off, or surface the failure.

use thiserror::Error;

/// Core result type
pub type CoreResult<T> = Result<T, ToolError>;

/// Errors produced while orchestrating a tool call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    /// Registry resolution failed
    #[error("tool not found: {name}{}", namespace.as_deref().map(|ns| format!(" (namespace {ns})")).unwrap_or_default())]
    ToolNotFound {
        /// Requested tool name
        name: String,
        /// Namespace searched, if any
        namespace: Option<String>,
    },

    /// Guard-detected argument or result schema violation
    #[error("validation failed for {tool}: {reason}")]
    Validation {
        /// Tool whose arguments or result failed validation
        tool: String,
        /// Human-readable violation summary
        reason: String,
    },

    /// Deadline exceeded
    #[error("tool {tool} timed out after {timeout_ms}ms")]
    Timeout {
        /// Tool that timed out
        tool: String,
        /// Effective timeout that elapsed
        timeout_ms: u64,
    },

    /// Rate limiter saturated
    #[error("rate limit exceeded for {scope} (limit {limit})")]
    RateLimited {
        /// Saturated scope ("global" or a tool name)
        scope: String,
        /// Configured limit for the scope
        limit: u64,
        /// Hint for when a slot may free up
        retry_after_ms: Option<u64>,
    },

    /// Circuit breaker rejected the call
    #[error("circuit breaker is open for {tool} ({failure_count} consecutive failures)")]
    CircuitOpen {
        /// Tool whose breaker is open
        tool: String,
        /// Consecutive failures that opened the breaker
        failure_count: u32,
        /// Time remaining until the next half-open attempt
        retry_after_ms: Option<u64>,
    },

    /// A non-contract, non-schema guard blocked the call
    #[error("blocked by guard {guard}: {reason}")]
    GuardBlocked {
        /// Guard that issued the block
        guard: String,
        /// Violation detail
        reason: String,
    },

    /// Precondition or postcondition failure
    #[error("contract violation for {tool}: {detail}")]
    ContractViolation {
        /// Tool whose contract was violated
        tool: String,
        /// Which conditions failed, with actual values where known
        detail: String,
    },

    /// Opaque failure from the invocation collaborator
    #[error("invocation of {tool} failed: {message}")]
    Invocation {
        /// Tool being invoked
        tool: String,
        /// Transport-reported message
        message: String,
        /// Whether the failure looked transient
        retryable: bool,
    },

    /// Batch was cancelled before the call completed
    #[error("operation cancelled")]
    Cancelled,

    /// Unexpected internal error
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl ToolError {
    /// Whether the error is worth retrying.
    ///
    /// Timeouts and rate limits are transient by definition; invocation
    /// failures carry their own classification. Guard and contract
    /// rejections are never retryable - the same inputs will fail again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Invocation { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Suggested wait before retrying, if the error carries one.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } | Self::CircuitOpen { retry_after_ms, .. } => {
                *retry_after_ms
            }
            _ => None,
        }
    }
}
