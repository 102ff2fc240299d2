//! Staged planning of tool call batches.
//!
//! `Planner::plan` is a pure function over the batch and its constraints:
//! the same inputs always yield the same plan. Within a stage, candidates
//! are ordered by priority (descending), then declared cost (ascending),
//! then call id; admission respects per-pool concurrency limits with
//! unused ready calls rolling into the next stage.

use arbiter_core::{
    CoreResult, ExecutionPlan, SchedulingConstraints, SkipCause, SkipReason, ToolCallSpec,
    ToolError,
};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::graph::DependencyGraph;

/// Default fraction of the deadline past which low-priority calls are shed
const DEFAULT_SKIP_THRESHOLD_RATIO: f64 = 0.8;

/// Default per-call retry budget when the caller does not override it
const DEFAULT_MAX_RETRIES: u32 = 3;

/// DAG scheduler turning call batches into staged execution plans
#[derive(Debug, Clone)]
pub struct Planner {
    /// Fraction of `deadline_ms` past which non-maximal-priority calls skip
    skip_threshold_ratio: f64,
    /// Retry budget stamped onto the plan
    default_max_retries: u32,
}

impl Planner {
    /// Create a planner with default thresholds
    #[must_use]
    pub fn new() -> Self {
        Self {
            skip_threshold_ratio: DEFAULT_SKIP_THRESHOLD_RATIO,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the deadline skip threshold ratio (clamped to 0.0..=1.0)
    #[must_use]
    pub fn with_skip_threshold_ratio(mut self, ratio: f64) -> Self {
        self.skip_threshold_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Set the default per-call retry budget
    #[must_use]
    pub const fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Plan a batch of calls under the given constraints.
    ///
    /// Every call id ends up in exactly one stage or in the skip set.
    ///
    /// # Errors
    ///
    /// Returns error if the batch contains duplicate call ids.
    pub fn plan(
        &self,
        calls: &[ToolCallSpec],
        constraints: &SchedulingConstraints,
    ) -> CoreResult<ExecutionPlan> {
        let mut seen = IndexSet::new();
        for call in calls {
            if !seen.insert(call.call_id.as_str()) {
                return Err(ToolError::Validation {
                    tool: call.tool_name.clone(),
                    reason: format!("duplicate call_id {}", call.call_id),
                });
            }
        }

        let graph = DependencyGraph::build(calls);
        let mut skips = SkipSet::new(&graph);

        // Unknown dependency ids never become satisfiable, so the call is
        // shed up front instead of stalling silently.
        for (call_id, missing) in graph.unknown_dependencies() {
            let named: Vec<&str> = missing.iter().map(String::as_str).collect();
            skips.mark(
                call_id,
                SkipCause::UnsatisfiableDependency,
                format!("depends on unknown call id(s): {}", named.join(", ")),
            );
        }

        // Cycle participants are marked before cascading so every member
        // reports cycle_detected rather than dependency_skipped.
        let cyclic: Vec<&str> = calls
            .iter()
            .map(|c| c.call_id.as_str())
            .filter(|id| !skips.contains(id) && graph.in_cycle(id))
            .collect();
        for id in &cyclic {
            skips.mark(id, SkipCause::CycleDetected, "participates in a dependency cycle");
        }

        skips.cascade_all();

        let plan = self.build_stages(calls, constraints, skips)?;
        Ok(plan)
    }

    fn build_stages(
        &self,
        calls: &[ToolCallSpec],
        constraints: &SchedulingConstraints,
        mut skips: SkipSet<'_>,
    ) -> CoreResult<ExecutionPlan> {
        let max_priority = calls.iter().map(|c| c.metadata.priority).max();

        let mut scheduled: IndexSet<String> = IndexSet::new();
        let mut stages: Vec<Vec<String>> = Vec::new();
        let mut pool_peak: IndexMap<String, usize> = IndexMap::new();
        let mut cumulative_est: u64 = 0;
        let mut cumulative_cost: f64 = 0.0;
        let mut critical_path: u64 = 0;

        loop {
            let mut ready: Vec<&ToolCallSpec> = calls
                .iter()
                .filter(|c| !scheduled.contains(&c.call_id) && !skips.contains(&c.call_id))
                .filter(|c| c.depends_on.iter().all(|dep| scheduled.contains(dep)))
                .collect();
            if ready.is_empty() {
                break;
            }

            ready.sort_by(|a, b| {
                b.metadata
                    .priority
                    .cmp(&a.metadata.priority)
                    .then_with(|| {
                        a.metadata
                            .cost
                            .unwrap_or(0.0)
                            .total_cmp(&b.metadata.cost.unwrap_or(0.0))
                    })
                    .then_with(|| a.call_id.cmp(&b.call_id))
            });

            let mut stage: Vec<String> = Vec::new();
            let mut pool_counts: IndexMap<String, usize> = IndexMap::new();
            let mut stage_max_est: u64 = 0;
            let mut shed_any = false;

            for call in ready {
                let est = call.metadata.est_ms.unwrap_or(0);
                let cost = call.metadata.cost.unwrap_or(0.0);

                if let Some(deadline) = constraints.deadline_ms {
                    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                    let threshold = (deadline as f64 * self.skip_threshold_ratio) as u64;
                    if cumulative_est + est > threshold
                        && Some(call.metadata.priority) != max_priority
                    {
                        debug!(call_id = %call.call_id, est, threshold, "shedding call past deadline threshold");
                        skips.mark(
                            &call.call_id,
                            SkipCause::DeadlineExceeded,
                            format!(
                                "cumulative estimate {}ms exceeds {}ms threshold of {}ms deadline",
                                cumulative_est + est,
                                threshold,
                                deadline
                            ),
                        );
                        skips.cascade_from(&call.call_id);
                        shed_any = true;
                        continue;
                    }
                }

                if let Some(max_cost) = constraints.max_cost {
                    if cumulative_cost + cost > max_cost {
                        debug!(call_id = %call.call_id, cost, max_cost, "shedding call past cost budget");
                        skips.mark(
                            &call.call_id,
                            SkipCause::CostExceeded,
                            format!(
                                "cumulative cost {:.2} exceeds budget {:.2}",
                                cumulative_cost + cost,
                                max_cost
                            ),
                        );
                        skips.cascade_from(&call.call_id);
                        shed_any = true;
                        continue;
                    }
                }

                let pool = call.pool();
                let used = pool_counts.get(pool).copied().unwrap_or(0);
                let cap = match constraints.pool_limit(pool) {
                    // A zero-budget pool still admits one call per stage so
                    // ready work always makes forward progress.
                    Some(0) => 1,
                    Some(limit) => limit,
                    None => usize::MAX,
                };
                if used >= cap {
                    // Rolls into the next stage.
                    continue;
                }

                *pool_counts.entry(pool.to_string()).or_insert(0) += 1;
                stage.push(call.call_id.clone());
                cumulative_est += est;
                cumulative_cost += cost;
                stage_max_est = stage_max_est.max(est);
            }

            if stage.is_empty() {
                if !shed_any {
                    // No admission and no shed: nothing can make progress.
                    break;
                }
                continue;
            }

            for (pool, count) in &pool_counts {
                let peak = pool_peak.entry(pool.clone()).or_insert(0);
                *peak = (*peak).max(*count);
            }
            critical_path += stage_max_est;
            scheduled.extend(stage.iter().cloned());
            stages.push(stage);
        }

        // Anything left unscheduled and unskipped indicates a planner bug;
        // the partition invariant is part of the public contract.
        for call in calls {
            if !scheduled.contains(&call.call_id) && !skips.contains(&call.call_id) {
                return Err(ToolError::Internal {
                    message: format!("call {} was neither scheduled nor skipped", call.call_id),
                });
            }
        }

        let stage_count = stages.len() as u64;
        let per_call_timeout_ms = constraints
            .deadline_ms
            .map(|deadline| (deadline / stage_count.max(1)).max(1));

        let (skipped, skip_reasons) = skips.into_parts();
        let has_work = !stages.is_empty();

        Ok(ExecutionPlan {
            stages,
            per_call_timeout_ms,
            per_call_max_retries: self.default_max_retries,
            skipped,
            skip_reasons,
            critical_path_ms: has_work.then_some(critical_path),
            estimated_total_ms: has_work.then_some(cumulative_est),
            pool_utilization: pool_peak,
        })
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

/// Skip bookkeeping with cascade support
struct SkipSet<'g> {
    graph: &'g DependencyGraph,
    skipped: IndexSet<String>,
    reasons: Vec<SkipReason>,
}

impl<'g> SkipSet<'g> {
    fn new(graph: &'g DependencyGraph) -> Self {
        Self {
            graph,
            skipped: IndexSet::new(),
            reasons: Vec::new(),
        }
    }

    fn contains(&self, call_id: &str) -> bool {
        self.skipped.contains(call_id)
    }

    /// Record a skip; the first reason for a call wins
    fn mark(&mut self, call_id: &str, cause: SkipCause, detail: impl Into<String>) {
        if self.skipped.insert(call_id.to_string()) {
            self.reasons.push(SkipReason::new(call_id, cause, detail));
        }
    }

    /// Cascade `dependency_skipped` to every transitive dependent
    fn cascade_from(&mut self, call_id: &str) {
        for dependent in self.graph.transitive_dependents(call_id) {
            self.mark(
                &dependent,
                SkipCause::DependencySkipped,
                format!("dependency {call_id} was skipped"),
            );
        }
    }

    /// Cascade from every call skipped so far
    fn cascade_all(&mut self) {
        let roots: Vec<String> = self.skipped.iter().cloned().collect();
        for root in roots {
            self.cascade_from(&root);
        }
    }

    fn into_parts(self) -> (IndexSet<String>, Vec<SkipReason>) {
        (self.skipped, self.reasons)
    }
}
