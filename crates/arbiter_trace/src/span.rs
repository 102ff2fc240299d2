//! Execution spans.
//!
//! A span is the single record of one call's execution: arguments as
//! submitted and as repaired, every guard decision in order, timing, outcome,
//! and the result or structured error. Spans are built incrementally through
//! [`SpanBuilder`] while the call runs and sealed exactly once at the end.

use arbiter_core::{Arguments, GuardDecision, GuardVerdict, InputHash, SpanId, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal outcome of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanOutcome {
    /// Call completed normally
    Success,
    /// A guard blocked the call before invocation
    Blocked,
    /// The invocation raised a terminal error
    Failed,
    /// The call's deadline elapsed
    Timeout,
    /// The scheduler never dispatched the call
    Skipped,
    /// Call completed after a guard repaired its arguments
    Repaired,
}

impl SpanOutcome {
    /// Whether the call produced a usable result
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Repaired)
    }
}

impl std::fmt::Display for SpanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
            Self::Repaired => "repaired",
        };
        write!(f, "{s}")
    }
}

/// Resource consumption observed for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceUsage {
    /// Peak memory attributed to the call, in bytes
    pub memory_bytes: Option<u64>,
    /// CPU time consumed, in milliseconds
    pub cpu_ms: Option<u64>,
}

/// One recorded call execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSpan {
    /// Trace this span belongs to
    pub trace_id: TraceId,
    /// This span's id
    pub span_id: SpanId,
    /// Parent span, when the call was spawned by another call
    pub parent_span_id: Option<SpanId>,
    /// Caller-assigned call id
    pub call_id: String,
    /// Tool invoked
    pub tool_name: String,
    /// Namespace the tool resolved under, if any
    pub namespace: Option<String>,
    /// Arguments as submitted
    pub arguments: Arguments,
    /// Arguments actually sent, after any guard repair
    pub effective_arguments: Arguments,
    /// Terminal outcome
    pub outcome: SpanOutcome,
    /// Result value, for successful calls
    pub result: Option<Value>,
    /// JSON type name of the result ("object", "number", ...)
    pub result_type: Option<String>,
    /// Error message, for failed/blocked/timeout calls
    pub error: Option<String>,
    /// Whether the recorded error looked transient
    pub error_retryable: Option<bool>,
    /// Every guard decision, in chain order
    pub guard_decisions: Vec<GuardDecision>,
    /// Most severe verdict across the chain
    pub final_verdict: GuardVerdict,
    /// When the span was created
    pub created_at: DateTime<Utc>,
    /// When the invocation began (None when blocked/skipped)
    pub started_at: Option<DateTime<Utc>>,
    /// When the span was sealed
    pub ended_at: Option<DateTime<Utc>>,
    /// Sandbox the call ran in, if tagged
    pub sandbox: Option<String>,
    /// Execution strategy tag, if any
    pub strategy: Option<String>,
    /// Which attempt produced this outcome (0-based)
    pub retry_attempt: u32,
    /// Retry budget the call ran with
    pub max_retries: u32,
    /// Whether the result came from a cache
    pub cache_hit: bool,
    /// Observed resource usage
    pub resource_usage: ResourceUsage,
    /// Whether the tool is declared deterministic
    pub deterministic: bool,
    /// Seed used, for deterministic tools
    pub seed: Option<u64>,
    /// Canonical hash of tool name + arguments
    pub input_hash: InputHash,
}

impl ExecutionSpan {
    /// Wall-clock duration from start to seal, if both were recorded
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Incrementally assembles an [`ExecutionSpan`] while a call runs
#[derive(Debug, Clone)]
pub struct SpanBuilder {
    span: ExecutionSpan,
}

impl SpanBuilder {
    /// Start a span for a call within `trace_id`
    #[must_use]
    pub fn new(
        trace_id: TraceId,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Arguments,
    ) -> Self {
        let tool_name = tool_name.into();
        let input_hash = InputHash::compute(&tool_name, &arguments);
        Self {
            span: ExecutionSpan {
                trace_id,
                span_id: SpanId::new(),
                parent_span_id: None,
                call_id: call_id.into(),
                tool_name,
                namespace: None,
                effective_arguments: arguments.clone(),
                arguments,
                outcome: SpanOutcome::Failed,
                result: None,
                result_type: None,
                error: None,
                error_retryable: None,
                guard_decisions: Vec::new(),
                final_verdict: GuardVerdict::Allow,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                sandbox: None,
                strategy: None,
                retry_attempt: 0,
                max_retries: 0,
                cache_hit: false,
                resource_usage: ResourceUsage::default(),
                deterministic: false,
                seed: None,
                input_hash,
            },
        }
    }

    /// Set the namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.span.namespace = Some(namespace.into());
        self
    }

    /// Link to a parent span
    #[must_use]
    pub fn with_parent(mut self, parent: SpanId) -> Self {
        self.span.parent_span_id = Some(parent);
        self
    }

    /// Tag the sandbox the call runs in
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: impl Into<String>) -> Self {
        self.span.sandbox = Some(sandbox.into());
        self
    }

    /// Tag the execution strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.span.strategy = Some(strategy.into());
        self
    }

    /// Set the retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.span.max_retries = max_retries;
        self
    }

    /// Mark the tool deterministic, with an optional seed
    #[must_use]
    pub fn with_determinism(mut self, deterministic: bool, seed: Option<u64>) -> Self {
        self.span.deterministic = deterministic;
        self.span.seed = seed;
        self
    }

    /// Record one guard decision and fold its verdict into the final verdict
    pub fn record_decision(&mut self, decision: GuardDecision) {
        self.span.final_verdict = self.span.final_verdict.max(decision.verdict);
        self.span.guard_decisions.push(decision);
    }

    /// Replace the effective arguments after a guard repair
    pub fn set_effective_arguments(&mut self, args: Arguments) {
        self.span.effective_arguments = args;
    }

    /// Mark invocation start
    pub fn mark_started(&mut self) {
        self.span.started_at = Some(Utc::now());
    }

    /// Record which attempt produced the terminal outcome
    pub fn set_retry_attempt(&mut self, attempt: u32) {
        self.span.retry_attempt = attempt;
    }

    /// Mark the result as served from cache
    pub fn set_cache_hit(&mut self, hit: bool) {
        self.span.cache_hit = hit;
    }

    /// Record resource usage
    pub fn set_resource_usage(&mut self, usage: ResourceUsage) {
        self.span.resource_usage = usage;
    }

    /// Attach the call's result
    pub fn set_result(&mut self, result: Value) {
        self.span.result_type = Some(json_type_name(&result).to_string());
        self.span.result = Some(result);
    }

    /// Attach structured error info
    pub fn set_error(&mut self, message: impl Into<String>, retryable: bool) {
        self.span.error = Some(message.into());
        self.span.error_retryable = Some(retryable);
    }

    /// The verdict accumulated so far
    #[must_use]
    pub fn final_verdict(&self) -> GuardVerdict {
        self.span.final_verdict
    }

    /// Seal the span with its terminal outcome
    #[must_use]
    pub fn seal(mut self, outcome: SpanOutcome) -> ExecutionSpan {
        self.span.outcome = outcome;
        self.span.ended_at = Some(Utc::now());
        self.span
    }
}

/// JSON type name used for `result_type`
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
