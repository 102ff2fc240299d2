//! ARBITER Span, Trace, and Replay Engine
//!
//! One [`ExecutionSpan`] is recorded per call, aggregated into an
//! [`ExecutionTrace`] per batch. Traces serialize to JSON Lines and can be
//! replayed against a live executor to detect behavioral drift.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod export;
pub mod replay;
pub mod span;
pub mod trace;

pub use export::{read_trace, write_trace, ExportError};
pub use replay::{
    DiffSeverity, ReplayDifference, ReplayEngine, ReplayExecutor, ReplayMode, ReplayResult,
};
pub use span::{ExecutionSpan, ResourceUsage, SpanBuilder, SpanOutcome};
pub use trace::ExecutionTrace;
