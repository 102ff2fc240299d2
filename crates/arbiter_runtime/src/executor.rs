//! Per-call execution pipeline.
//!
//! For one call: seed a span builder, run guard pre-checks, invoke through
//! the resilience stack with the effective (possibly repaired) arguments,
//! run guard post-checks, and seal the span with exactly one terminal
//! outcome. A blocked call never reaches the invoker.

use crate::invoker::{ResolvedTool, ToolInvoker, ToolRegistry};
use arbiter_core::{Arguments, GuardVerdict, ToolCallSpec, ToolError, TraceId};
use arbiter_guard::GuardChain;
use arbiter_resilience::ResilienceStack;
use arbiter_trace::{ExecutionSpan, ReplayExecutor, SpanBuilder, SpanOutcome};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fallback per-call timeout when neither the caller nor the plan set one
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs single calls through guards, middleware, and the invoker
#[derive(Clone)]
pub struct ToolExecutor {
    invoker: Arc<dyn ToolInvoker>,
    registry: Option<Arc<dyn ToolRegistry>>,
    guards: GuardChain,
    stack: ResilienceStack,
    default_timeout: Duration,
}

impl ToolExecutor {
    /// Create an executor over an invoker with no guards and an empty
    /// resilience stack
    #[must_use]
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            invoker,
            registry: None,
            guards: GuardChain::new(),
            stack: ResilienceStack::new(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Attach a registry for schema/determinism resolution
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the guard chain
    #[must_use]
    pub fn with_guards(mut self, guards: GuardChain) -> Self {
        self.guards = guards;
        self
    }

    /// Set the resilience stack
    #[must_use]
    pub fn with_stack(mut self, stack: ResilienceStack) -> Self {
        self.stack = stack;
        self
    }

    /// Set the fallback timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Execute one call and seal its span.
    ///
    /// `plan_timeout_ms` and `plan_max_retries` come from the scheduler;
    /// explicit per-spec values take precedence over them.
    pub async fn execute_call(
        &self,
        trace_id: TraceId,
        spec: &ToolCallSpec,
        plan_timeout_ms: Option<u64>,
        plan_max_retries: u32,
    ) -> ExecutionSpan {
        let max_retries = spec.max_retries.unwrap_or(plan_max_retries);
        let timeout = spec
            .timeout_ms
            .or(plan_timeout_ms)
            .map_or(self.default_timeout, Duration::from_millis);

        let mut builder = SpanBuilder::new(
            trace_id,
            spec.call_id.clone(),
            spec.tool_name.clone(),
            spec.args.clone(),
        )
        .with_max_retries(max_retries);

        // resolve metadata; a missing tool is a terminal failure, not a
        // reason to run the guards
        if let Some(registry) = &self.registry {
            match registry.resolve(&spec.tool_name, None).await {
                Ok(resolved) => builder = apply_resolution(builder, &resolved),
                Err(err) => {
                    builder.set_error(err.to_string(), false);
                    return builder.seal(SpanOutcome::Failed);
                }
            }
        }

        // guard pre-checks
        let pre = self.guards.check(&spec.tool_name, &spec.args).await;
        for decision in &pre.decisions {
            builder.record_decision(decision.clone());
        }
        if pre.is_blocked() {
            let reason = pre
                .result
                .reason
                .clone()
                .unwrap_or_else(|| "blocked by guard".to_string());
            warn!(call_id = %spec.call_id, tool = %spec.tool_name, %reason, "call blocked");
            builder.set_error(reason, false);
            return builder.seal(SpanOutcome::Blocked);
        }

        let effective_args = pre
            .result
            .repaired_args
            .clone()
            .unwrap_or_else(|| spec.args.clone());
        builder.set_effective_arguments(effective_args.clone());
        let repaired = pre.verdict() == GuardVerdict::Repair;

        // invoke through the middleware stack; each attempt is individually
        // bounded by the effective timeout
        builder.mark_started();
        let last_attempt = AtomicU32::new(0);
        let invocation = self
            .stack
            .invoke(&spec.tool_name, |attempt| {
                last_attempt.store(attempt, Ordering::SeqCst);
                let args = &effective_args;
                async move {
                    match tokio::time::timeout(
                        timeout,
                        self.invoker.invoke(&spec.tool_name, args, Some(timeout)),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ToolError::Timeout {
                            tool: spec.tool_name.clone(),
                            timeout_ms: timeout.as_millis() as u64,
                        }),
                    }
                }
            })
            .await;
        builder.set_retry_attempt(last_attempt.load(Ordering::SeqCst));

        match invocation {
            Ok(result) => {
                // guard post-checks on the result
                let post = self
                    .guards
                    .check_output(&spec.tool_name, &effective_args, &result)
                    .await;
                for decision in &post.decisions {
                    builder.record_decision(decision.clone());
                }
                if post.is_blocked() {
                    let reason = post
                        .result
                        .reason
                        .clone()
                        .unwrap_or_else(|| "result blocked by guard".to_string());
                    builder.set_error(reason, false);
                    return builder.seal(SpanOutcome::Blocked);
                }

                builder.set_result(result);
                debug!(call_id = %spec.call_id, tool = %spec.tool_name, "call succeeded");
                if repaired {
                    builder.seal(SpanOutcome::Repaired)
                } else {
                    builder.seal(SpanOutcome::Success)
                }
            }
            Err(ToolError::Timeout { tool, timeout_ms }) => {
                builder.set_error(
                    format!("tool {tool} timed out after {timeout_ms}ms"),
                    true,
                );
                builder.seal(SpanOutcome::Timeout)
            }
            Err(err) => {
                let retryable = err.is_retryable();
                builder.set_error(err.to_string(), retryable);
                builder.seal(SpanOutcome::Failed)
            }
        }
    }
}

fn apply_resolution(builder: SpanBuilder, resolved: &ResolvedTool) -> SpanBuilder {
    let builder = builder.with_determinism(resolved.deterministic, None);
    match &resolved.namespace {
        Some(ns) => builder.with_namespace(ns.clone()),
        None => builder,
    }
}

#[async_trait]
impl ReplayExecutor for ToolExecutor {
    async fn execute(
        &self,
        call_id: &str,
        tool_name: &str,
        _namespace: Option<&str>,
        arguments: &Arguments,
    ) -> ExecutionSpan {
        // replay runs outside any plan; a synthetic spec reuses the full
        // per-call pipeline
        match ToolCallSpec::new(call_id, tool_name) {
            Ok(spec) => {
                let spec = spec.with_args(arguments.clone());
                self.execute_call(TraceId::new(), &spec, None, 0).await
            }
            Err(err) => {
                let mut builder =
                    SpanBuilder::new(TraceId::new(), call_id, tool_name, arguments.clone());
                builder.set_error(err.to_string(), false);
                builder.seal(SpanOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_core::{CoreResult, GuardResult};
    use arbiter_guard::{ContractGuard, Guard, ToolContract};
    use arbiter_resilience::RetryPolicy;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    /// Invoker with canned per-tool behavior
    struct StubInvoker {
        results: HashMap<String, Value>,
        fail_tools: Vec<String>,
        slow_tools: Vec<String>,
    }

    impl StubInvoker {
        fn returning(tool: &str, value: Value) -> Self {
            Self {
                results: HashMap::from([(tool.to_string(), value)]),
                fail_tools: Vec::new(),
                slow_tools: Vec::new(),
            }
        }

        fn failing(tool: &str) -> Self {
            Self {
                results: HashMap::new(),
                fail_tools: vec![tool.to_string()],
                slow_tools: Vec::new(),
            }
        }

        fn slow(tool: &str) -> Self {
            Self {
                results: HashMap::new(),
                fail_tools: Vec::new(),
                slow_tools: vec![tool.to_string()],
            }
        }
    }

    #[async_trait]
    impl ToolInvoker for StubInvoker {
        async fn invoke(
            &self,
            tool_name: &str,
            args: &Arguments,
            _timeout: Option<Duration>,
        ) -> CoreResult<Value> {
            if self.slow_tools.iter().any(|t| t == tool_name) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.fail_tools.iter().any(|t| t == tool_name) {
                return Err(ToolError::Invocation {
                    tool: tool_name.to_string(),
                    message: "boom".to_string(),
                    retryable: false,
                });
            }
            self.results
                .get(tool_name)
                .cloned()
                .map(Ok)
                .unwrap_or_else(|| Ok(json!({"echo": args})))
        }
    }

    fn spec(call_id: &str, tool: &str) -> ToolCallSpec {
        ToolCallSpec::new(call_id, tool).unwrap()
    }

    #[tokio::test]
    async fn test_success_path() {
        let executor =
            ToolExecutor::new(Arc::new(StubInvoker::returning("calc", json!(42))));
        let span = executor
            .execute_call(TraceId::new(), &spec("c1", "calc"), None, 0)
            .await;

        assert_eq!(span.outcome, SpanOutcome::Success);
        assert_eq!(span.result, Some(json!(42)));
        assert!(span.started_at.is_some());
        assert_eq!(span.final_verdict, GuardVerdict::Allow);
    }

    #[tokio::test]
    async fn test_block_never_invokes() {
        let contract = ContractGuard::new().with_contract(
            "calc",
            ToolContract::new()
                .with_require("n > 0")
                .unwrap()
                .with_strict(true),
        );
        let guards = GuardChain::new().with_guard(Arc::new(contract));
        let executor = ToolExecutor::new(Arc::new(StubInvoker::returning("calc", json!(1))))
            .with_guards(guards);

        let call = spec("c1", "calc").with_arg("n", json!(-5));
        let span = executor.execute_call(TraceId::new(), &call, None, 0).await;

        assert_eq!(span.outcome, SpanOutcome::Blocked);
        assert_eq!(span.final_verdict, GuardVerdict::Block);
        // never invoked, so no start timestamp and no result
        assert!(span.started_at.is_none());
        assert!(span.result.is_none());
        assert!(span.error.is_some());
    }

    #[tokio::test]
    async fn test_repair_uses_effective_args() {
        /// Coerces a string `n` into an integer
        struct CoerceGuard;

        #[async_trait]
        impl Guard for CoerceGuard {
            fn name(&self) -> &str {
                "coerce"
            }

            async fn check(&self, _tool_name: &str, args: &Arguments) -> GuardResult {
                let mut repaired = args.clone();
                repaired.insert("n".to_string(), json!(30));
                GuardResult::repair("coerced n", repaired)
            }
        }

        let guards = GuardChain::new().with_guard(Arc::new(CoerceGuard));
        let executor =
            ToolExecutor::new(Arc::new(StubInvoker::returning("echo", json!("ok"))))
                .with_guards(guards);

        let call = spec("c1", "echo").with_arg("n", json!("30"));
        let span = executor.execute_call(TraceId::new(), &call, None, 0).await;

        assert_eq!(span.outcome, SpanOutcome::Repaired);
        assert_eq!(span.arguments["n"], json!("30"));
        assert_eq!(span.effective_arguments["n"], json!(30));
    }

    #[tokio::test]
    async fn test_invocation_failure_seals_failed() {
        let executor = ToolExecutor::new(Arc::new(StubInvoker::failing("calc")));
        let span = executor
            .execute_call(TraceId::new(), &spec("c1", "calc"), None, 0)
            .await;

        assert_eq!(span.outcome, SpanOutcome::Failed);
        assert!(span.error.as_deref().unwrap().contains("boom"));
        assert_eq!(span.error_retryable, Some(false));
    }

    #[tokio::test]
    async fn test_timeout_seals_timeout() {
        let executor = ToolExecutor::new(Arc::new(StubInvoker::slow("slow")));
        let call = spec("c1", "slow").with_timeout_ms(20);
        let span = executor.execute_call(TraceId::new(), &call, None, 0).await;

        assert_eq!(span.outcome, SpanOutcome::Timeout);
        assert_eq!(span.error_retryable, Some(true));
    }

    #[tokio::test]
    async fn test_plan_timeout_applies_when_spec_has_none() {
        let executor = ToolExecutor::new(Arc::new(StubInvoker::slow("slow")));
        let span = executor
            .execute_call(TraceId::new(), &spec("c1", "slow"), Some(20), 0)
            .await;
        assert_eq!(span.outcome, SpanOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_retry_attempt_recorded() {
        /// Fails once, then succeeds
        struct FlakyInvoker {
            calls: AtomicU32,
        }

        #[async_trait]
        impl ToolInvoker for FlakyInvoker {
            async fn invoke(
                &self,
                tool_name: &str,
                _args: &Arguments,
                _timeout: Option<Duration>,
            ) -> CoreResult<Value> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ToolError::Invocation {
                        tool: tool_name.to_string(),
                        message: "connection reset".to_string(),
                        retryable: true,
                    })
                } else {
                    Ok(json!("recovered"))
                }
            }
        }

        let stack = arbiter_resilience::ResilienceStack::new().with_retry_policy(
            RetryPolicy::new(2)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(0.0),
        );
        let executor = ToolExecutor::new(Arc::new(FlakyInvoker {
            calls: AtomicU32::new(0),
        }))
        .with_stack(stack);

        let span = executor
            .execute_call(TraceId::new(), &spec("c1", "flaky"), None, 2)
            .await;

        assert_eq!(span.outcome, SpanOutcome::Success);
        assert_eq!(span.retry_attempt, 1);
        assert_eq!(span.max_retries, 2);
    }

    #[tokio::test]
    async fn test_post_check_block() {
        /// Blocks any result containing "secret"
        struct OutputGuard;

        #[async_trait]
        impl Guard for OutputGuard {
            fn name(&self) -> &str {
                "output"
            }

            async fn check(&self, _tool_name: &str, _args: &Arguments) -> GuardResult {
                GuardResult::allow()
            }

            async fn check_output(
                &self,
                _tool_name: &str,
                _args: &Arguments,
                result: &Value,
            ) -> GuardResult {
                if result.to_string().contains("secret") {
                    GuardResult::block("leaked secret in result")
                } else {
                    GuardResult::allow()
                }
            }
        }

        let guards = GuardChain::new().with_guard(Arc::new(OutputGuard));
        let executor = ToolExecutor::new(Arc::new(StubInvoker::returning(
            "fetch",
            json!({"body": "secret token"}),
        )))
        .with_guards(guards);

        let span = executor
            .execute_call(TraceId::new(), &spec("c1", "fetch"), None, 0)
            .await;

        assert_eq!(span.outcome, SpanOutcome::Blocked);
        assert!(span.result.is_none());
        // both the pre and post decision were recorded
        assert_eq!(span.guard_decisions.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_before_guards() {
        struct EmptyRegistry;

        #[async_trait]
        impl ToolRegistry for EmptyRegistry {
            async fn resolve(
                &self,
                tool_name: &str,
                _namespace: Option<&str>,
            ) -> CoreResult<ResolvedTool> {
                Err(ToolError::ToolNotFound {
                    name: tool_name.to_string(),
                    namespace: None,
                })
            }
        }

        let executor = ToolExecutor::new(Arc::new(StubInvoker::returning("x", json!(1))))
            .with_registry(Arc::new(EmptyRegistry));
        let span = executor
            .execute_call(TraceId::new(), &spec("c1", "ghost"), None, 0)
            .await;

        assert_eq!(span.outcome, SpanOutcome::Failed);
        assert!(span.error.as_deref().unwrap().contains("not found"));
        assert!(span.guard_decisions.is_empty());
    }
}
