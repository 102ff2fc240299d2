//! Execution plans produced by the DAG scheduler.
//!
//! Invariant: every planned call id appears in exactly one stage or in the
//! skip set, never both. Unknown dependency ids surface as explicit
//! `UnsatisfiableDependency` skips rather than silently stalling.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Why a call was skipped instead of scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCause {
    /// Admitting the call would overrun the batch deadline
    DeadlineExceeded,
    /// Admitting the call would overrun the cost budget
    CostExceeded,
    /// A direct or transitive dependency was skipped
    DependencySkipped,
    /// The call participates in a dependency cycle
    CycleDetected,
    /// The call depends on an id that is not in the batch
    UnsatisfiableDependency,
}

impl std::fmt::Display for SkipCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::CostExceeded => "cost_exceeded",
            Self::DependencySkipped => "dependency_skipped",
            Self::CycleDetected => "cycle_detected",
            Self::UnsatisfiableDependency => "unsatisfiable_dependency",
        };
        write!(f, "{s}")
    }
}

/// Skip decision for a single call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipReason {
    /// Skipped call id
    pub call_id: String,
    /// Why it was skipped
    pub cause: SkipCause,
    /// Human-readable detail, e.g. which dependency caused the cascade
    pub detail: String,
}

impl SkipReason {
    /// Create a new skip reason
    #[must_use]
    pub fn new(call_id: impl Into<String>, cause: SkipCause, detail: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            cause,
            detail: detail.into(),
        }
    }
}

/// Ordered stages of parallel-executable call ids plus skip decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Stages in execution order; each stage is safe to run fully in parallel
    pub stages: Vec<Vec<String>>,
    /// Per-call timeout budget derived from the deadline, if any
    pub per_call_timeout_ms: Option<u64>,
    /// Per-call retry budget
    pub per_call_max_retries: u32,
    /// Calls that will not run
    pub skipped: IndexSet<String>,
    /// One reason per skipped call
    pub skip_reasons: Vec<SkipReason>,
    /// Sum across stages of the longest estimated duration in each stage
    pub critical_path_ms: Option<u64>,
    /// Sum of all scheduled calls' estimated durations
    pub estimated_total_ms: Option<u64>,
    /// Peak concurrent calls per pool across all stages
    pub pool_utilization: IndexMap<String, usize>,
}

impl ExecutionPlan {
    /// Create an empty plan
    #[must_use]
    pub fn empty() -> Self {
        Self {
            stages: Vec::new(),
            per_call_timeout_ms: None,
            per_call_max_retries: 0,
            skipped: IndexSet::new(),
            skip_reasons: Vec::new(),
            critical_path_ms: None,
            estimated_total_ms: None,
            pool_utilization: IndexMap::new(),
        }
    }

    /// Number of stages
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Number of scheduled (non-skipped) calls
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }

    /// Whether the call is scheduled in some stage
    #[must_use]
    pub fn contains(&self, call_id: &str) -> bool {
        self.stages
            .iter()
            .any(|stage| stage.iter().any(|id| id == call_id))
    }

    /// Index of the stage a call is scheduled in
    #[must_use]
    pub fn stage_of(&self, call_id: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.iter().any(|id| id == call_id))
    }

    /// Whether the call was skipped
    #[must_use]
    pub fn is_skipped(&self, call_id: &str) -> bool {
        self.skipped.contains(call_id)
    }

    /// Skip reason for a call, if it was skipped
    #[must_use]
    pub fn skip_reason(&self, call_id: &str) -> Option<&SkipReason> {
        self.skip_reasons.iter().find(|r| r.call_id == call_id)
    }
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> ExecutionPlan {
        let mut plan = ExecutionPlan::empty();
        plan.stages = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string()],
        ];
        plan.skipped.insert("d".to_string());
        plan.skip_reasons.push(SkipReason::new(
            "d",
            SkipCause::DependencySkipped,
            "dependency b was skipped",
        ));
        plan
    }

    #[test]
    fn test_plan_empty() {
        let plan = ExecutionPlan::empty();
        assert_eq!(plan.stage_count(), 0);
        assert_eq!(plan.scheduled_count(), 0);
        assert!(!plan.contains("a"));
    }

    #[test]
    fn test_plan_queries() {
        let plan = sample_plan();
        assert_eq!(plan.stage_count(), 2);
        assert_eq!(plan.scheduled_count(), 3);
        assert_eq!(plan.stage_of("b"), Some(0));
        assert_eq!(plan.stage_of("c"), Some(1));
        assert_eq!(plan.stage_of("d"), None);
        assert!(plan.is_skipped("d"));
        assert!(!plan.is_skipped("a"));
    }

    #[test]
    fn test_skip_reason_lookup() {
        let plan = sample_plan();
        let reason = plan.skip_reason("d").unwrap();
        assert_eq!(reason.cause, SkipCause::DependencySkipped);
        assert!(reason.detail.contains('b'));
        assert!(plan.skip_reason("a").is_none());
    }

    #[test]
    fn test_skip_cause_display() {
        assert_eq!(format!("{}", SkipCause::DeadlineExceeded), "deadline_exceeded");
        assert_eq!(format!("{}", SkipCause::CycleDetected), "cycle_detected");
    }

    #[test]
    fn test_skip_cause_serde_snake_case() {
        let json = serde_json::to_string(&SkipCause::UnsatisfiableDependency).unwrap();
        assert_eq!(json, "\"unsatisfiable_dependency\"");
    }
}
