//! ARBITER Runtime
//!
//! The orchestrating layer: per-call execution through guards and
//! resilience middleware ([`ToolExecutor`]), and batch execution over a
//! dependency-aware plan ([`BatchEngine`]). Transport and registry are
//! opaque collaborators supplied by the embedding process.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod executor;
pub mod invoker;

pub use engine::{BatchEngine, CancelToken};
pub use executor::ToolExecutor;
pub use invoker::{RegistrySchemaProvider, ResolvedTool, ToolInvoker, ToolRegistry};
