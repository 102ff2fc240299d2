//! Tool call specifications and scheduling metadata.
//!
//! These are caller-supplied, immutable for the lifetime of one
//! scheduling-and-execution cycle.

use crate::error::{CoreResult, ToolError};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Argument mapping for a tool call
pub type Arguments = serde_json::Map<String, Value>;

/// Name of the default resource pool
pub const DEFAULT_POOL: &str = "default";

/// Scheduling metadata attached to a tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Resource pool the call draws from
    pub pool: String,
    /// Relative weight within its pool (>= 1)
    pub weight: u32,
    /// Estimated duration in milliseconds
    pub est_ms: Option<u64>,
    /// Declared cost in budget units
    pub cost: Option<f64>,
    /// Priority - higher is scheduled earlier
    pub priority: i32,
}

impl ToolMetadata {
    /// Create metadata with defaults (pool "default", weight 1, priority 0)
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: DEFAULT_POOL.to_string(),
            weight: 1,
            est_ms: None,
            cost: None,
            priority: 0,
        }
    }

    /// Set the resource pool
    #[must_use]
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = pool.into();
        self
    }

    /// Set the weight (clamped to a minimum of 1)
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    /// Set the estimated duration
    #[must_use]
    pub const fn with_est_ms(mut self, est_ms: u64) -> Self {
        self.est_ms = Some(est_ms);
        self
    }

    /// Set the declared cost
    #[must_use]
    pub const fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Set the priority
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Specification of a single tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSpec {
    /// Unique, non-empty call identifier
    pub call_id: String,
    /// Non-empty tool name
    pub tool_name: String,
    /// Structured arguments
    pub args: Arguments,
    /// Scheduling metadata
    pub metadata: ToolMetadata,
    /// Call ids this call depends on (ordered)
    pub depends_on: IndexSet<String>,
    /// Per-call timeout override
    pub timeout_ms: Option<u64>,
    /// Per-call retry budget override
    pub max_retries: Option<u32>,
}

impl ToolCallSpec {
    /// Create a new call spec
    ///
    /// # Errors
    ///
    /// Returns error if `call_id` or `tool_name` is empty
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>) -> CoreResult<Self> {
        let call_id = call_id.into();
        let tool_name = tool_name.into();

        if call_id.is_empty() {
            return Err(ToolError::Validation {
                tool: tool_name,
                reason: "call_id must not be empty".to_string(),
            });
        }
        if tool_name.is_empty() {
            return Err(ToolError::Validation {
                tool: call_id,
                reason: "tool_name must not be empty".to_string(),
            });
        }

        Ok(Self {
            call_id,
            tool_name,
            args: Arguments::new(),
            metadata: ToolMetadata::new(),
            depends_on: IndexSet::new(),
            timeout_ms: None,
            max_retries: None,
        })
    }

    /// Set the arguments
    #[must_use]
    pub fn with_args(mut self, args: Arguments) -> Self {
        self.args = args;
        self
    }

    /// Set a single argument
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Set the scheduling metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: ToolMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a dependency on another call id
    #[must_use]
    pub fn with_dependency(mut self, call_id: impl Into<String>) -> Self {
        self.depends_on.insert(call_id.into());
        self
    }

    /// Set the per-call timeout
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the per-call retry budget
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Pool this call draws from
    #[must_use]
    pub fn pool(&self) -> &str {
        &self.metadata.pool
    }

    /// Whether this call has no dependencies
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.depends_on.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_defaults() {
        let meta = ToolMetadata::new();
        assert_eq!(meta.pool, "default");
        assert_eq!(meta.weight, 1);
        assert_eq!(meta.priority, 0);
        assert!(meta.est_ms.is_none());
        assert!(meta.cost.is_none());
    }

    #[test]
    fn test_metadata_weight_clamped() {
        let meta = ToolMetadata::new().with_weight(0);
        assert_eq!(meta.weight, 1);
    }

    #[test]
    fn test_metadata_builders() {
        let meta = ToolMetadata::new()
            .with_pool("db")
            .with_est_ms(250)
            .with_cost(1.5)
            .with_priority(10);
        assert_eq!(meta.pool, "db");
        assert_eq!(meta.est_ms, Some(250));
        assert_eq!(meta.cost, Some(1.5));
        assert_eq!(meta.priority, 10);
    }

    #[test]
    fn test_call_spec_new() {
        let spec = ToolCallSpec::new("c1", "fetch").unwrap();
        assert_eq!(spec.call_id, "c1");
        assert_eq!(spec.tool_name, "fetch");
        assert!(spec.is_root());
        assert_eq!(spec.pool(), "default");
    }

    #[test]
    fn test_call_spec_empty_id_rejected() {
        assert!(ToolCallSpec::new("", "fetch").is_err());
        assert!(ToolCallSpec::new("c1", "").is_err());
    }

    #[test]
    fn test_call_spec_builders() {
        let spec = ToolCallSpec::new("c2", "transform")
            .unwrap()
            .with_arg("input", json!("data"))
            .with_dependency("c1")
            .with_timeout_ms(5_000)
            .with_max_retries(2);

        assert_eq!(spec.args.get("input"), Some(&json!("data")));
        assert!(spec.depends_on.contains("c1"));
        assert_eq!(spec.timeout_ms, Some(5_000));
        assert_eq!(spec.max_retries, Some(2));
        assert!(!spec.is_root());
    }

    #[test]
    fn test_call_spec_serde_roundtrip() {
        let spec = ToolCallSpec::new("c1", "fetch")
            .unwrap()
            .with_arg("url", json!("https://example.com"))
            .with_dependency("c0");
        let encoded = serde_json::to_string(&spec).unwrap();
        let decoded: ToolCallSpec = serde_json::from_str(&encoded).unwrap();
        assert_eq!(spec, decoded);
    }
}
