//! ARBITER DAG Scheduler
//!
//! Turns a batch of tool call specifications plus scheduling constraints
//! into an ordered list of parallel-executable stages. Planning is a pure
//! function: no I/O, fully deterministic given the constraints' clock
//! anchor.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph;
pub mod planner;

pub use graph::DependencyGraph;
pub use planner::Planner;
