//! Trace replay for drift detection.
//!
//! Replay re-executes every recorded call's tool and arguments through a
//! live executor and compares the fresh spans field-by-field against the
//! recorded ones. A deterministic tool returning a different result is a
//! behavioral regression; a non-deterministic one is expected drift and is
//! downgraded in lenient mode.

use crate::span::{ExecutionSpan, SpanOutcome};
use crate::trace::ExecutionTrace;
use arbiter_core::Arguments;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// How strictly differences are judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    /// Every difference is fatal
    Strict,
    /// Result drift on non-deterministic tools is tolerated
    Lenient,
    /// Differences are recorded; no pass/fail judgment
    CompareOnly,
}

/// Weight of one recorded difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffSeverity {
    /// Tolerable drift
    Warning,
    /// Behavioral regression
    Error,
}

/// One field that differed between the recorded and replayed span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayDifference {
    /// Index of the span in the recorded trace
    pub span_index: usize,
    /// Call id of the differing span
    pub call_id: String,
    /// Field that differed ("outcome", "final_verdict", "result")
    pub field: String,
    /// Recorded value
    pub expected: Value,
    /// Replayed value
    pub actual: Value,
    /// How seriously to treat the difference
    pub severity: DiffSeverity,
}

/// Outcome of replaying one trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    /// Mode the comparison ran under
    pub mode: ReplayMode,
    /// Every recorded difference
    pub differences: Vec<ReplayDifference>,
    /// Spans that were re-executed and compared
    pub compared_spans: usize,
    /// Fraction of compared spans with no differences
    pub match_rate: f64,
    /// Overall judgment. Always `true` in compare-only mode, which records
    /// differences without passing or failing the run.
    pub success: bool,
}

impl ReplayResult {
    /// Differences at error severity
    #[must_use]
    pub fn errors(&self) -> impl Iterator<Item = &ReplayDifference> {
        self.differences
            .iter()
            .filter(|d| d.severity == DiffSeverity::Error)
    }
}

/// Executes one call during replay.
///
/// Implementations run the tool through their full pipeline (guards and
/// middleware included) and return the resulting span.
#[async_trait]
pub trait ReplayExecutor: Send + Sync {
    /// Execute `tool_name` with `arguments` and return the sealed span
    async fn execute(
        &self,
        call_id: &str,
        tool_name: &str,
        namespace: Option<&str>,
        arguments: &Arguments,
    ) -> ExecutionSpan;
}

/// Replays recorded traces against a live executor
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayEngine;

impl ReplayEngine {
    /// Create a replay engine
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Re-execute every recorded call and compare the fresh spans against
    /// the trace.
    ///
    /// Spans the scheduler skipped were never invoked and are not replayed.
    pub async fn replay<E: ReplayExecutor>(
        &self,
        trace: &ExecutionTrace,
        executor: &E,
        mode: ReplayMode,
    ) -> ReplayResult {
        let mut differences = Vec::new();
        let mut compared = 0usize;
        let mut matched = 0usize;

        for (index, recorded) in trace.spans.iter().enumerate() {
            if recorded.outcome == SpanOutcome::Skipped {
                continue;
            }
            let fresh = executor
                .execute(
                    &recorded.call_id,
                    &recorded.tool_name,
                    recorded.namespace.as_deref(),
                    &recorded.arguments,
                )
                .await;

            let before = differences.len();
            compare_spans(index, recorded, &fresh, mode, &mut differences);
            compared += 1;
            if differences.len() == before {
                matched += 1;
            }
        }

        let match_rate = if compared == 0 {
            1.0
        } else {
            matched as f64 / compared as f64
        };
        let success = match mode {
            ReplayMode::Strict => differences.is_empty(),
            ReplayMode::Lenient => !differences.iter().any(|d| d.severity == DiffSeverity::Error),
            ReplayMode::CompareOnly => true,
        };

        info!(
            trace_id = %trace.trace_id,
            compared,
            differences = differences.len(),
            match_rate,
            success,
            "replay complete"
        );

        ReplayResult {
            mode,
            differences,
            compared_spans: compared,
            match_rate,
            success,
        }
    }
}

fn compare_spans(
    span_index: usize,
    recorded: &ExecutionSpan,
    fresh: &ExecutionSpan,
    mode: ReplayMode,
    differences: &mut Vec<ReplayDifference>,
) {
    let mut push = |field: &str, expected: Value, actual: Value, severity: DiffSeverity| {
        differences.push(ReplayDifference {
            span_index,
            call_id: recorded.call_id.clone(),
            field: field.to_string(),
            expected,
            actual,
            severity,
        });
    };

    if recorded.outcome != fresh.outcome {
        push(
            "outcome",
            Value::String(recorded.outcome.to_string()),
            Value::String(fresh.outcome.to_string()),
            DiffSeverity::Error,
        );
    }

    if recorded.final_verdict != fresh.final_verdict {
        push(
            "final_verdict",
            Value::String(recorded.final_verdict.to_string()),
            Value::String(fresh.final_verdict.to_string()),
            DiffSeverity::Error,
        );
    }

    if recorded.result != fresh.result {
        // result drift on a deterministic tool is always a regression;
        // on a non-deterministic tool only strict mode escalates it
        let severity = if recorded.deterministic || mode == ReplayMode::Strict {
            DiffSeverity::Error
        } else {
            DiffSeverity::Warning
        };
        push(
            "result",
            recorded.result.clone().unwrap_or(Value::Null),
            fresh.result.clone().unwrap_or(Value::Null),
            severity,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SpanBuilder;
    use arbiter_core::TraceId;
    use serde_json::json;
    use std::collections::HashMap;

    /// Replays every tool with a canned result
    struct CannedExecutor {
        results: HashMap<String, Value>,
        deterministic: bool,
    }

    #[async_trait]
    impl ReplayExecutor for CannedExecutor {
        async fn execute(
            &self,
            call_id: &str,
            tool_name: &str,
            _namespace: Option<&str>,
            arguments: &Arguments,
        ) -> ExecutionSpan {
            let mut builder =
                SpanBuilder::new(TraceId::new(), call_id, tool_name, arguments.clone())
                    .with_determinism(self.deterministic, None);
            builder.mark_started();
            if let Some(result) = self.results.get(tool_name) {
                builder.set_result(result.clone());
            }
            builder.seal(SpanOutcome::Success)
        }
    }

    fn recorded_trace(result: Value, deterministic: bool) -> ExecutionTrace {
        let trace_id = TraceId::new();
        let mut trace = ExecutionTrace::new(trace_id, Vec::new());
        let mut builder =
            SpanBuilder::new(trace_id, "c1", "calc", Arguments::new())
                .with_determinism(deterministic, None);
        builder.mark_started();
        builder.set_result(result);
        trace.record(builder.seal(SpanOutcome::Success));
        trace.seal();
        trace
    }

    fn canned(result: Value, deterministic: bool) -> CannedExecutor {
        CannedExecutor {
            results: HashMap::from([("calc".to_string(), result)]),
            deterministic,
        }
    }

    #[tokio::test]
    async fn test_identical_run_matches() {
        let trace = recorded_trace(json!(42), true);
        let executor = canned(json!(42), true);
        let result = ReplayEngine::new()
            .replay(&trace, &executor, ReplayMode::Strict)
            .await;
        assert!(result.success);
        assert!(result.differences.is_empty());
        assert_eq!(result.match_rate, 1.0);
    }

    #[tokio::test]
    async fn test_deterministic_drift_is_error() {
        let trace = recorded_trace(json!(42), true);
        let executor = canned(json!(43), true);
        let result = ReplayEngine::new()
            .replay(&trace, &executor, ReplayMode::Lenient)
            .await;

        assert!(!result.success);
        assert_eq!(result.differences.len(), 1);
        let diff = &result.differences[0];
        assert_eq!(diff.field, "result");
        assert_eq!(diff.expected, json!(42));
        assert_eq!(diff.actual, json!(43));
        assert_eq!(diff.severity, DiffSeverity::Error);
    }

    #[tokio::test]
    async fn test_nondeterministic_drift_tolerated_in_lenient() {
        let trace = recorded_trace(json!(42), false);
        let executor = canned(json!(43), false);
        let result = ReplayEngine::new()
            .replay(&trace, &executor, ReplayMode::Lenient)
            .await;

        assert!(result.success);
        assert_eq!(result.differences.len(), 1);
        assert_eq!(result.differences[0].severity, DiffSeverity::Warning);
        assert_eq!(result.match_rate, 0.0);
    }

    #[tokio::test]
    async fn test_strict_escalates_nondeterministic_drift() {
        let trace = recorded_trace(json!(42), false);
        let executor = canned(json!(43), false);
        let result = ReplayEngine::new()
            .replay(&trace, &executor, ReplayMode::Strict)
            .await;
        assert!(!result.success);
        assert_eq!(result.differences[0].severity, DiffSeverity::Error);
    }

    #[tokio::test]
    async fn test_compare_only_never_fails() {
        let trace = recorded_trace(json!(42), true);
        let executor = canned(json!(43), true);
        let result = ReplayEngine::new()
            .replay(&trace, &executor, ReplayMode::CompareOnly)
            .await;
        assert!(result.success);
        assert_eq!(result.differences.len(), 1);
    }

    #[tokio::test]
    async fn test_outcome_change_is_error() {
        let trace_id = TraceId::new();
        let mut trace = ExecutionTrace::new(trace_id, Vec::new());
        trace.record(
            SpanBuilder::new(trace_id, "c1", "calc", Arguments::new())
                .seal(SpanOutcome::Blocked),
        );

        let executor = canned(json!(1), true);
        let result = ReplayEngine::new()
            .replay(&trace, &executor, ReplayMode::Lenient)
            .await;

        assert!(!result.success);
        assert!(result.differences.iter().any(|d| d.field == "outcome"));
    }

    #[tokio::test]
    async fn test_skipped_spans_not_replayed() {
        let trace_id = TraceId::new();
        let mut trace = ExecutionTrace::new(trace_id, Vec::new());
        trace.record(
            SpanBuilder::new(trace_id, "c1", "calc", Arguments::new())
                .seal(SpanOutcome::Skipped),
        );

        let executor = canned(json!(1), true);
        let result = ReplayEngine::new()
            .replay(&trace, &executor, ReplayMode::Strict)
            .await;

        assert_eq!(result.compared_spans, 0);
        assert!(result.success);
        assert_eq!(result.match_rate, 1.0);
    }
}
