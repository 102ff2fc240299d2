//! Plan-shape guard: anomaly detection over agent-generated call plans.
//!
//! Watches for pathological shapes - endless chains, tool-diversity
//! explosions, oversized batches, and fan-out/fan-in "map-reduce bombs" -
//! across both incremental per-call checks and whole-batch checks.

use arbiter_core::{Arguments, GuardResult, ToolCallSpec};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::chain::Guard;

/// Thresholds for plan-shape anomalies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanShapeConfig {
    /// Longest tolerated dependency chain
    pub max_chain_length: usize,
    /// Most distinct tool names tolerated in one session
    pub max_unique_tools: usize,
    /// Largest tolerated single batch
    pub max_batch_size: usize,
    /// Most calls tolerated depending on one common ancestor
    pub max_fan_out: usize,
    /// Shared-dependency count past which a map-reduce bomb is flagged
    pub fan_out_threshold: usize,
}

impl Default for PlanShapeConfig {
    fn default() -> Self {
        Self {
            max_chain_length: 10,
            max_unique_tools: 16,
            max_batch_size: 32,
            max_fan_out: 8,
            fan_out_threshold: 8,
        }
    }
}

/// How violations are enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    /// Detection disabled
    Off,
    /// Violations reported but execution continues
    Warn,
    /// Violations stop execution
    #[default]
    Block,
}

/// Mutable detector state, shared behind a mutex
#[derive(Debug, Default)]
struct ShapeState {
    /// Cumulative chain depth across recorded calls
    chain_depth: usize,
    /// Distinct tool names recorded
    tools_seen: IndexSet<String>,
    /// dependency call id -> how many recorded calls depend on it
    dependent_counts: IndexMap<String, usize>,
    /// Total calls recorded
    recorded: usize,
}

/// Stateful anomaly detector over sequences and batches of calls
pub struct PlanShapeGuard {
    config: PlanShapeConfig,
    enforcement: Enforcement,
    state: Mutex<ShapeState>,
}

impl PlanShapeGuard {
    /// Create a guard with default thresholds, blocking on violation
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PlanShapeConfig::default(),
            enforcement: Enforcement::Block,
            state: Mutex::new(ShapeState::default()),
        }
    }

    /// Set the thresholds
    #[must_use]
    pub fn with_config(mut self, config: PlanShapeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the enforcement level
    #[must_use]
    pub const fn with_enforcement(mut self, enforcement: Enforcement) -> Self {
        self.enforcement = enforcement;
        self
    }

    /// Record one executed call into the incremental state
    pub fn record_call(&self, spec: &ToolCallSpec) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.recorded += 1;
        state.tools_seen.insert(spec.tool_name.clone());
        if !spec.depends_on.is_empty() {
            state.chain_depth += 1;
        }
        for dep in &spec.depends_on {
            *state.dependent_counts.entry(dep.clone()).or_insert(0) += 1;
        }
    }

    /// Reset the incremental state
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *state = ShapeState::default();
    }

    /// Check a whole batch against the thresholds, considering recorded state
    #[must_use]
    pub fn check_batch(&self, batch: &[ToolCallSpec]) -> GuardResult {
        if self.enforcement == Enforcement::Off {
            return GuardResult::allow();
        }

        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut violations = Vec::new();

        if batch.len() > self.config.max_batch_size {
            violations.push(format!(
                "batch of {} calls exceeds max batch size {}",
                batch.len(),
                self.config.max_batch_size
            ));
        }

        let mut tools: IndexSet<&str> = state.tools_seen.iter().map(String::as_str).collect();
        tools.extend(batch.iter().map(|c| c.tool_name.as_str()));
        if tools.len() > self.config.max_unique_tools {
            violations.push(format!(
                "{} distinct tools exceeds max {}",
                tools.len(),
                self.config.max_unique_tools
            ));
        }

        let longest = state.chain_depth + longest_chain(batch);
        if longest > self.config.max_chain_length {
            violations.push(format!(
                "dependency chain of length {} exceeds max {}",
                longest, self.config.max_chain_length
            ));
        }

        let mut counts: IndexMap<&str, usize> = state
            .dependent_counts
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        for call in batch {
            for dep in &call.depends_on {
                *counts.entry(dep.as_str()).or_insert(0) += 1;
            }
        }
        for (dep, count) in &counts {
            if *count > self.config.max_fan_out {
                violations.push(format!(
                    "{count} calls fan out from '{dep}', exceeding max {}",
                    self.config.max_fan_out
                ));
                break;
            }
        }

        // Map-reduce bomb: a wide fan-out whose results converge again.
        if let Some((dep, count)) = counts.iter().find(|(_, c)| **c > self.config.fan_out_threshold)
        {
            let fan_in = batch.iter().any(|c| c.depends_on.len() > 1);
            if fan_in {
                violations.push(format!(
                    "map-reduce bomb: {count} calls share dependency '{dep}' and re-converge"
                ));
            }
        }

        drop(state);
        self.resolve(violations)
    }

    /// Check a planned stage list (flattens to a batch check)
    #[must_use]
    pub fn check_plan(&self, batch: &[ToolCallSpec]) -> GuardResult {
        self.check_batch(batch)
    }

    /// Incremental check against recorded state only
    #[must_use]
    pub fn check_recorded(&self, next_tool: &str) -> GuardResult {
        if self.enforcement == Enforcement::Off {
            return GuardResult::allow();
        }

        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut violations = Vec::new();

        if state.chain_depth >= self.config.max_chain_length {
            violations.push(format!(
                "cumulative chain depth {} reached max {}",
                state.chain_depth, self.config.max_chain_length
            ));
        }

        let mut unique = state.tools_seen.len();
        if !state.tools_seen.contains(next_tool) {
            unique += 1;
        }
        if unique > self.config.max_unique_tools {
            violations.push(format!(
                "{unique} distinct tools exceeds max {}",
                self.config.max_unique_tools
            ));
        }

        if let Some((dep, count)) = state
            .dependent_counts
            .iter()
            .find(|(_, c)| **c > self.config.max_fan_out)
        {
            violations.push(format!(
                "{count} recorded calls fan out from '{dep}', exceeding max {}",
                self.config.max_fan_out
            ));
        }

        drop(state);
        self.resolve(violations)
    }

    fn resolve(&self, violations: Vec<String>) -> GuardResult {
        if violations.is_empty() {
            return GuardResult::allow();
        }
        let summary = violations.join("; ");
        match self.enforcement {
            Enforcement::Off => GuardResult::allow(),
            Enforcement::Warn => GuardResult::warn(summary),
            Enforcement::Block => GuardResult::block(summary),
        }
    }
}

impl Default for PlanShapeGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Guard for PlanShapeGuard {
    fn name(&self) -> &str {
        "plan_shape"
    }

    async fn check(&self, tool_name: &str, _args: &Arguments) -> GuardResult {
        self.check_recorded(tool_name)
    }
}

/// Longest dependency chain within a batch (edges outside the batch and
/// cycles contribute nothing).
fn longest_chain(batch: &[ToolCallSpec]) -> usize {
    let ids: IndexMap<&str, &ToolCallSpec> =
        batch.iter().map(|c| (c.call_id.as_str(), c)).collect();

    fn depth<'a>(
        id: &'a str,
        ids: &IndexMap<&'a str, &'a ToolCallSpec>,
        memo: &mut IndexMap<&'a str, usize>,
        visiting: &mut IndexSet<&'a str>,
    ) -> usize {
        if let Some(&d) = memo.get(id) {
            return d;
        }
        if !visiting.insert(id) {
            return 0; // cycle; reported elsewhere
        }
        let d = match ids.get(id) {
            Some(spec) => {
                1 + spec
                    .depends_on
                    .iter()
                    .map(|dep| depth(dep.as_str(), ids, memo, visiting))
                    .max()
                    .unwrap_or(0)
            }
            None => 0,
        };
        visiting.swap_remove(id);
        memo.insert(id, d);
        d
    }

    let mut memo = IndexMap::new();
    let mut visiting = IndexSet::new();
    batch
        .iter()
        .map(|c| depth(c.call_id.as_str(), &ids, &mut memo, &mut visiting))
        .max()
        .unwrap_or(0)
}
