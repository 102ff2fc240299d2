//! Collaborator seams: invocation and registry.
//!
//! The runtime never talks to a transport directly. It invokes through
//! [`ToolInvoker`] and resolves tool metadata through [`ToolRegistry`], both
//! opaque async traits supplied by the embedding process.

use arbiter_core::{Arguments, CoreResult, ToolError};
use arbiter_guard::{ArgumentSchema, SchemaProvider};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Executes one tool call against the outside world.
///
/// The runtime treats implementations as opaque, potentially slow, and
/// potentially failing; it enforces its own timeout around `invoke`.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke `tool_name` with `args`.
    ///
    /// # Errors
    ///
    /// Implementations report transport failures as
    /// [`ToolError::Invocation`], classifying transient conditions as
    /// retryable.
    async fn invoke(
        &self,
        tool_name: &str,
        args: &Arguments,
        timeout: Option<Duration>,
    ) -> CoreResult<Value>;
}

/// What the registry knows about a resolved tool
#[derive(Debug, Clone, Default)]
pub struct ResolvedTool {
    /// Namespace the tool resolved under
    pub namespace: Option<String>,
    /// Declared argument schema, if the tool publishes one
    pub schema: Option<ArgumentSchema>,
    /// Whether the tool is deterministic (same inputs, same result)
    pub deterministic: bool,
}

/// Resolves tool names to metadata.
///
/// Used only to obtain declared schemas and determinism flags; invocation
/// goes through [`ToolInvoker`].
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Resolve a tool, searching `namespace` when given.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ToolNotFound`] when no tool matches.
    async fn resolve(&self, tool_name: &str, namespace: Option<&str>) -> CoreResult<ResolvedTool>;
}

/// Adapts a [`ToolRegistry`] into the schema guard's provider seam, so
/// declared schemas feed `SchemaStrictnessGuard` without a second lookup
/// path.
pub struct RegistrySchemaProvider {
    registry: Arc<dyn ToolRegistry>,
}

impl RegistrySchemaProvider {
    /// Wrap a registry
    #[must_use]
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SchemaProvider for RegistrySchemaProvider {
    async fn fetch(&self, tool_name: &str) -> CoreResult<Option<ArgumentSchema>> {
        match self.registry.resolve(tool_name, None).await {
            Ok(resolved) => Ok(resolved.schema),
            // an unknown tool has no schema to enforce; the invoker will
            // surface the resolution failure
            Err(ToolError::ToolNotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
