//! Guard trait and chain composition.

use arbiter_core::{Arguments, GuardDecision, GuardResult, GuardVerdict};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A policy check over a tool call's inputs or outputs.
///
/// Guards must be cheap and synchronous in spirit; the async signature
/// exists only for guards that resolve external state on first use (the
/// schema guard's provider fetch).
#[async_trait]
pub trait Guard: Send + Sync {
    /// Stable guard name, recorded on spans
    fn name(&self) -> &str;

    /// Validate a call before execution
    async fn check(&self, tool_name: &str, args: &Arguments) -> GuardResult;

    /// Validate a call's result after execution
    async fn check_output(&self, tool_name: &str, args: &Arguments, result: &Value) -> GuardResult {
        let _ = (tool_name, args, result);
        GuardResult::allow()
    }
}

/// Aggregate outcome of running a chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    /// Most severe result, with repaired arguments carried forward
    pub result: GuardResult,
    /// Per-guard decisions in execution order
    pub decisions: Vec<GuardDecision>,
}

impl ChainOutcome {
    /// The aggregate verdict
    #[must_use]
    pub fn verdict(&self) -> GuardVerdict {
        self.result.verdict
    }

    /// Whether the chain blocked the call
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.result.verdict.is_blocking()
    }
}

/// Ordered collection of guards with most-severe aggregation
#[derive(Clone, Default)]
pub struct GuardChain {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardChain {
    /// Create an empty chain
    #[must_use]
    pub fn new() -> Self {
        Self { guards: Vec::new() }
    }

    /// Append a guard; guards run in registration order
    #[must_use]
    pub fn with_guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    /// Append a guard in place
    pub fn register(&mut self, guard: Arc<dyn Guard>) {
        self.guards.push(guard);
    }

    /// Number of registered guards
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether the chain has no guards
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Run all pre-execution checks.
    ///
    /// Stops at the first `Block`; earlier `Repair` results survive in the
    /// aggregate so the executor can pick up coerced arguments.
    pub async fn check(&self, tool_name: &str, args: &Arguments) -> ChainOutcome {
        let mut aggregate = GuardResult::allow();
        let mut decisions = Vec::with_capacity(self.guards.len());

        for guard in &self.guards {
            let result = guard.check(tool_name, args).await;
            decisions.push(GuardDecision::new(guard.name(), &result));

            if result.verdict != GuardVerdict::Allow {
                debug!(guard = guard.name(), tool = tool_name, verdict = %result.verdict, "guard verdict");
            }

            let blocked = result.verdict.is_blocking();
            aggregate = aggregate.merge(result);
            if blocked {
                break;
            }
        }

        ChainOutcome {
            result: aggregate,
            decisions,
        }
    }

    /// Run all post-execution checks against a result value
    pub async fn check_output(
        &self,
        tool_name: &str,
        args: &Arguments,
        result: &Value,
    ) -> ChainOutcome {
        let mut aggregate = GuardResult::allow();
        let mut decisions = Vec::with_capacity(self.guards.len());

        for guard in &self.guards {
            let outcome = guard.check_output(tool_name, args, result).await;
            decisions.push(GuardDecision::new(guard.name(), &outcome));

            let blocked = outcome.verdict.is_blocking();
            aggregate = aggregate.merge(outcome);
            if blocked {
                break;
            }
        }

        ChainOutcome {
            result: aggregate,
            decisions,
        }
    }
}
