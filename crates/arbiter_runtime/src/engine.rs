//! Batch orchestration.
//!
//! A batch is planned once, then executed stage by stage: calls within a
//! stage run concurrently, stages run strictly in sequence. Scheduler skips
//! become `skipped` spans up front so every submitted call yields exactly
//! one span. Cancellation aborts in-flight work and seals the remaining
//! calls as cancelled failures; resource permits release as their tasks
//! drop.

use crate::executor::ToolExecutor;
use arbiter_core::{CoreResult, SchedulingConstraints, ToolCallSpec, ToolError, TraceId};
use arbiter_plan::Planner;
use arbiter_trace::{ExecutionTrace, SpanBuilder, SpanOutcome};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Signals batch-level cancellation to a running engine
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    /// Create an unset token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // register interest before re-checking, so a cancel() racing this
        // call cannot slip between the check and the wait
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Plans and executes batches of tool calls
#[derive(Clone)]
pub struct BatchEngine {
    planner: Planner,
    executor: Arc<ToolExecutor>,
}

impl BatchEngine {
    /// Create an engine with default planning parameters
    #[must_use]
    pub fn new(executor: Arc<ToolExecutor>) -> Self {
        Self {
            planner: Planner::new(),
            executor,
        }
    }

    /// Replace the planner
    #[must_use]
    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    /// Execute a batch to completion.
    ///
    /// # Errors
    ///
    /// Returns error when planning rejects the batch (duplicate call ids);
    /// individual call failures are recorded on their spans, not raised.
    pub async fn run(
        &self,
        calls: Vec<ToolCallSpec>,
        constraints: &SchedulingConstraints,
    ) -> CoreResult<ExecutionTrace> {
        self.run_with_cancel(calls, constraints, &CancelToken::new())
            .await
    }

    /// Execute a batch, observing a cancellation token.
    ///
    /// # Errors
    ///
    /// Returns error when planning rejects the batch.
    pub async fn run_with_cancel(
        &self,
        calls: Vec<ToolCallSpec>,
        constraints: &SchedulingConstraints,
        cancel: &CancelToken,
    ) -> CoreResult<ExecutionTrace> {
        let plan = self.planner.plan(&calls, constraints)?;
        let trace_id = TraceId::new();
        let mut trace = ExecutionTrace::new(trace_id, calls.clone());
        let specs: HashMap<&str, &ToolCallSpec> =
            calls.iter().map(|c| (c.call_id.as_str(), c)).collect();

        info!(
            %trace_id,
            calls = calls.len(),
            stages = plan.stage_count(),
            skipped = plan.skipped.len(),
            "batch planned"
        );

        // scheduler skips become spans before anything runs
        for call_id in &plan.skipped {
            let Some(spec) = specs.get(call_id.as_str()) else {
                continue;
            };
            let mut builder = SpanBuilder::new(
                trace_id,
                call_id.clone(),
                spec.tool_name.clone(),
                spec.args.clone(),
            );
            if let Some(reason) = plan.skip_reason(call_id) {
                builder.set_error(reason.detail.clone(), false);
            }
            trace.record(builder.seal(SpanOutcome::Skipped));
        }

        let mut abandoned: Vec<&str> = Vec::new();
        for (stage_index, stage) in plan.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                abandoned.extend(stage.iter().map(String::as_str));
                continue;
            }

            let mut tasks: JoinSet<(usize, arbiter_trace::ExecutionSpan)> = JoinSet::new();
            for (slot, call_id) in stage.iter().enumerate() {
                let Some(spec) = specs.get(call_id.as_str()) else {
                    continue;
                };
                let executor = Arc::clone(&self.executor);
                let spec = (*spec).clone();
                let timeout_ms = plan.per_call_timeout_ms;
                let max_retries = plan.per_call_max_retries;
                tasks.spawn(async move {
                    let span = executor
                        .execute_call(trace_id, &spec, timeout_ms, max_retries)
                        .await;
                    (slot, span)
                });
            }

            // spans land in submission order regardless of completion order
            let mut stage_spans: Vec<Option<arbiter_trace::ExecutionSpan>> =
                vec![None; stage.len()];
            loop {
                tokio::select! {
                    joined = tasks.join_next() => {
                        match joined {
                            Some(Ok((slot, span))) => stage_spans[slot] = Some(span),
                            Some(Err(err)) => warn!(stage = stage_index, error = %err, "stage task panicked"),
                            None => break,
                        }
                    }
                    () = cancel.cancelled() => {
                        warn!(%trace_id, stage = stage_index, "batch cancelled, aborting stage");
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        break;
                    }
                }
            }

            for (slot, call_id) in stage.iter().enumerate() {
                match stage_spans[slot].take() {
                    Some(span) => trace.record(span),
                    None => abandoned.push(call_id.as_str()),
                }
            }
        }

        for call_id in abandoned {
            let Some(spec) = specs.get(call_id) else {
                continue;
            };
            let mut builder = SpanBuilder::new(
                trace_id,
                call_id.to_string(),
                spec.tool_name.clone(),
                spec.args.clone(),
            );
            builder.set_error(ToolError::Cancelled.to_string(), false);
            trace.record(builder.seal(SpanOutcome::Failed));
        }

        trace.seal();
        info!(
            %trace_id,
            spans = trace.span_count(),
            succeeded = trace.success_count(),
            failed = trace.failure_count(),
            "batch complete"
        );
        Ok(trace)
    }
}
