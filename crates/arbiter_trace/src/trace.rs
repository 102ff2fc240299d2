//! Execution traces.
//!
//! A trace is the ordered record of one batch: every span in execution
//! order, the call specs as submitted, and enough context to replay the
//! batch later. The content hash covers the stable span fields only, so two
//! runs of the same batch with the same outcomes hash identically even
//! though their timestamps differ.

use crate::span::{ExecutionSpan, SpanOutcome};
use arbiter_core::{hash::canonical_json, ToolCallSpec, TraceId};
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Ordered record of one batch execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Trace id shared by every span
    pub trace_id: TraceId,
    /// Spans in execution order
    pub spans: Vec<ExecutionSpan>,
    /// Call specs as submitted
    pub specs: Vec<ToolCallSpec>,
    /// Caller-supplied context snapshot
    pub context: BTreeMap<String, Value>,
    /// Environment snapshot (host, versions, ...)
    pub environment: BTreeMap<String, String>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Arbitrary metadata
    pub metadata: BTreeMap<String, Value>,
    /// Whether every recorded tool was deterministic
    pub deterministic: bool,
    /// Batch-level seed, when deterministic
    pub seed: Option<u64>,
    /// When the trace was started
    pub created_at: DateTime<Utc>,
    /// When the batch completed
    pub sealed_at: Option<DateTime<Utc>>,
}

impl ExecutionTrace {
    /// Start an empty trace for a batch of specs
    #[must_use]
    pub fn new(trace_id: TraceId, specs: Vec<ToolCallSpec>) -> Self {
        Self {
            trace_id,
            spans: Vec::new(),
            specs,
            context: BTreeMap::new(),
            environment: BTreeMap::new(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            deterministic: false,
            seed: None,
            created_at: Utc::now(),
            sealed_at: None,
        }
    }

    /// Attach a context entry
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Attach an environment entry
    #[must_use]
    pub fn with_environment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Mark the batch deterministic with an optional seed
    #[must_use]
    pub const fn with_determinism(mut self, deterministic: bool, seed: Option<u64>) -> Self {
        self.deterministic = deterministic;
        self.seed = seed;
        self
    }

    /// Append a span in execution order
    pub fn record(&mut self, span: ExecutionSpan) {
        self.spans.push(span);
    }

    /// Mark the batch complete
    pub fn seal(&mut self) {
        self.sealed_at = Some(Utc::now());
    }

    /// Number of recorded spans
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Spans that produced a usable result
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.spans.iter().filter(|s| s.outcome.is_success()).count()
    }

    /// Spans sealed as failed or timed out
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.spans
            .iter()
            .filter(|s| matches!(s.outcome, SpanOutcome::Failed | SpanOutcome::Timeout))
            .count()
    }

    /// Spans blocked by a guard
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.spans
            .iter()
            .filter(|s| s.outcome == SpanOutcome::Blocked)
            .count()
    }

    /// Spans skipped by the scheduler
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.spans
            .iter()
            .filter(|s| s.outcome == SpanOutcome::Skipped)
            .count()
    }

    /// Distinct tool names in first-use order
    #[must_use]
    pub fn tools_used(&self) -> IndexSet<String> {
        self.spans.iter().map(|s| s.tool_name.clone()).collect()
    }

    /// Span recorded for a given call id, if any
    #[must_use]
    pub fn span_for(&self, call_id: &str) -> Option<&ExecutionSpan> {
        self.spans.iter().find(|s| s.call_id == call_id)
    }

    /// Blake3 hash over the stable span fields (call id, tool, input hash,
    /// outcome, result), for deduplication and cache keys
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for span in &self.spans {
            hasher.update(span.call_id.as_bytes());
            hasher.update(b"\0");
            hasher.update(span.tool_name.as_bytes());
            hasher.update(b"\0");
            hasher.update(span.input_hash.as_str().as_bytes());
            hasher.update(b"\0");
            hasher.update(span.outcome.to_string().as_bytes());
            hasher.update(b"\0");
            if let Some(result) = &span.result {
                hasher.update(canonical_json(result).as_bytes());
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SpanBuilder;
    use arbiter_core::Arguments;
    use serde_json::json;

    fn span(trace_id: TraceId, call_id: &str, tool: &str, outcome: SpanOutcome) -> ExecutionSpan {
        SpanBuilder::new(trace_id, call_id, tool, Arguments::new()).seal(outcome)
    }

    fn sample_trace() -> ExecutionTrace {
        let trace_id = TraceId::new();
        let mut trace = ExecutionTrace::new(trace_id, Vec::new());
        trace.record(span(trace_id, "c1", "fetch", SpanOutcome::Success));
        trace.record(span(trace_id, "c2", "fetch", SpanOutcome::Failed));
        trace.record(span(trace_id, "c3", "store", SpanOutcome::Blocked));
        trace.record(span(trace_id, "c4", "notify", SpanOutcome::Skipped));
        trace.record(span(trace_id, "c5", "calc", SpanOutcome::Repaired));
        trace
    }

    #[test]
    fn test_counts() {
        let trace = sample_trace();
        assert_eq!(trace.span_count(), 5);
        assert_eq!(trace.success_count(), 2);
        assert_eq!(trace.failure_count(), 1);
        assert_eq!(trace.blocked_count(), 1);
        assert_eq!(trace.skipped_count(), 1);
    }

    #[test]
    fn test_tools_used_in_first_use_order() {
        let trace = sample_trace();
        let tools_used = trace.tools_used();
        let tools: Vec<&str> = tools_used.iter().map(String::as_str).collect();
        assert_eq!(tools, vec!["fetch", "store", "notify", "calc"]);
    }

    #[test]
    fn test_span_lookup() {
        let trace = sample_trace();
        assert_eq!(trace.span_for("c3").unwrap().tool_name, "store");
        assert!(trace.span_for("missing").is_none());
    }

    #[test]
    fn test_content_hash_ignores_timestamps() {
        let trace_id = TraceId::new();
        let mut a = ExecutionTrace::new(trace_id, Vec::new());
        let mut b = ExecutionTrace::new(trace_id, Vec::new());

        let mut args = Arguments::new();
        args.insert("x".to_string(), json!(1));
        a.record(SpanBuilder::new(trace_id, "c1", "t", args.clone()).seal(SpanOutcome::Success));
        std::thread::sleep(std::time::Duration::from_millis(2));
        b.record(SpanBuilder::new(trace_id, "c1", "t", args).seal(SpanOutcome::Success));

        assert_ne!(a.spans[0].created_at, b.spans[0].created_at);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_sees_result_change() {
        let trace_id = TraceId::new();
        let mut a = ExecutionTrace::new(trace_id, Vec::new());
        let mut b = ExecutionTrace::new(trace_id, Vec::new());

        let mut builder = SpanBuilder::new(trace_id, "c1", "t", Arguments::new());
        builder.set_result(json!(42));
        a.record(builder.seal(SpanOutcome::Success));

        let mut builder = SpanBuilder::new(trace_id, "c1", "t", Arguments::new());
        builder.set_result(json!(43));
        b.record(builder.seal(SpanOutcome::Success));

        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_seal_sets_timestamp() {
        let mut trace = sample_trace();
        assert!(trace.sealed_at.is_none());
        trace.seal();
        assert!(trace.sealed_at.is_some());
    }

    #[test]
    fn test_trace_serde_round_trip() {
        let mut trace = sample_trace()
            .with_tag("nightly")
            .with_context("user", json!("ops"))
            .with_environment("host", "ci-1");
        trace.seal();

        let json = serde_json::to_string(&trace).unwrap();
        let back: ExecutionTrace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trace);
    }
}
