//! Dependency graph over call ids.
//!
//! Edges point from a call to the calls it depends on. Iteration order is
//! insertion order everywhere (`IndexMap`/`IndexSet`) so planning stays
//! deterministic.

use arbiter_core::ToolCallSpec;
use indexmap::{IndexMap, IndexSet};

/// Dependency graph built from a batch of call specs
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// call id -> ids it depends on (only ids present in the batch)
    deps: IndexMap<String, IndexSet<String>>,
    /// call id -> ids that depend on it
    dependents: IndexMap<String, IndexSet<String>>,
    /// call id -> dependency ids missing from the batch
    unknown: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    /// Build a graph from a batch of call specs
    #[must_use]
    pub fn build(calls: &[ToolCallSpec]) -> Self {
        let ids: IndexSet<&str> = calls.iter().map(|c| c.call_id.as_str()).collect();
        let mut graph = Self::default();

        for call in calls {
            let mut known = IndexSet::new();
            let mut missing = IndexSet::new();
            for dep in &call.depends_on {
                if ids.contains(dep.as_str()) {
                    known.insert(dep.clone());
                    graph
                        .dependents
                        .entry(dep.clone())
                        .or_default()
                        .insert(call.call_id.clone());
                } else {
                    missing.insert(dep.clone());
                }
            }
            graph.deps.insert(call.call_id.clone(), known);
            if !missing.is_empty() {
                graph.unknown.insert(call.call_id.clone(), missing);
            }
        }

        graph
    }

    /// Dependencies of a call that exist in the batch
    #[must_use]
    pub fn dependencies(&self, call_id: &str) -> Option<&IndexSet<String>> {
        self.deps.get(call_id)
    }

    /// Direct dependents of a call
    #[must_use]
    pub fn dependents(&self, call_id: &str) -> Option<&IndexSet<String>> {
        self.dependents.get(call_id)
    }

    /// Calls whose dependency lists name ids absent from the batch
    #[must_use]
    pub fn unknown_dependencies(&self) -> &IndexMap<String, IndexSet<String>> {
        &self.unknown
    }

    /// All direct and transitive dependents of a call, in discovery order
    #[must_use]
    pub fn transitive_dependents(&self, call_id: &str) -> IndexSet<String> {
        let mut seen = IndexSet::new();
        let mut stack: Vec<&str> = vec![call_id];

        while let Some(current) = stack.pop() {
            if let Some(children) = self.dependents.get(current) {
                for child in children {
                    if seen.insert(child.clone()) {
                        stack.push(child);
                    }
                }
            }
        }

        seen
    }

    /// Whether a call can reach itself through its dependency edges
    #[must_use]
    pub fn in_cycle(&self, call_id: &str) -> bool {
        let mut stack: Vec<&str> = Vec::new();
        let mut visited = IndexSet::new();

        if let Some(deps) = self.deps.get(call_id) {
            stack.extend(deps.iter().map(String::as_str));
        }

        while let Some(current) = stack.pop() {
            if current == call_id {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(deps) = self.deps.get(current) {
                stack.extend(deps.iter().map(String::as_str));
            }
        }

        false
    }

    /// Number of calls in the graph
    #[must_use]
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    /// Whether the graph has no calls
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}
