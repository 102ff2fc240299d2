//! ARBITER Core Types
//!
//! This crate contains pure value types and logic with no I/O: tool call
//! specifications, scheduling constraints, execution plans, guard verdicts,
//! and the shared error taxonomy. Everything here is serializable and
//! deterministic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call;
pub mod constraints;
pub mod error;
pub mod hash;
pub mod id;
pub mod plan;
pub mod verdict;

// Re-exports
pub use call::{Arguments, ToolCallSpec, ToolMetadata};
pub use constraints::SchedulingConstraints;
pub use error::{CoreResult, ToolError};
pub use hash::InputHash;
pub use id::{SpanId, TraceId};
pub use plan::{ExecutionPlan, SkipCause, SkipReason};
pub use verdict::{GuardDecision, GuardResult, GuardVerdict};
