//! Scheduling constraints for one planning cycle.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Constraints the planner must honor for a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingConstraints {
    /// Wall-clock budget for the whole batch, in milliseconds
    pub deadline_ms: Option<u64>,
    /// Cost budget for the whole batch
    pub max_cost: Option<f64>,
    /// Per-pool concurrency limits
    pub pool_limits: IndexMap<String, usize>,
    /// Clock anchor in epoch milliseconds; fixed in tests for determinism
    pub now_ms: u64,
}

impl SchedulingConstraints {
    /// Create unconstrained defaults anchored at the given clock
    #[must_use]
    pub fn new(now_ms: u64) -> Self {
        Self {
            deadline_ms: None,
            max_cost: None,
            pool_limits: IndexMap::new(),
            now_ms,
        }
    }

    /// Set the batch deadline
    #[must_use]
    pub const fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Set the cost budget
    #[must_use]
    pub const fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// Set the concurrency limit for a pool
    #[must_use]
    pub fn with_pool_limit(mut self, pool: impl Into<String>, limit: usize) -> Self {
        self.pool_limits.insert(pool.into(), limit);
        self
    }

    /// Effective concurrency limit for a pool (unlimited when unset)
    #[must_use]
    pub fn pool_limit(&self, pool: &str) -> Option<usize> {
        self.pool_limits.get(pool).copied()
    }
}

impl Default for SchedulingConstraints {
    fn default() -> Self {
        Self::new(0)
    }
}
