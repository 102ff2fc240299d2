//! ARBITER Guard Chain
//!
//! Composable policy checks that validate tool calls before and after
//! execution. Each guard returns a verdict (`Allow`/`Warn`/`Repair`/`Block`);
//! a chain runs guards in registration order and resolves to the most
//! severe verdict, short-circuiting on `Block`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod contract;
pub mod plan_shape;
pub mod schema;

pub use chain::{ChainOutcome, Guard, GuardChain};
pub use contract::{ContractGuard, ToolContract};
pub use plan_shape::{Enforcement, PlanShapeConfig, PlanShapeGuard};
pub use schema::{ArgumentSchema, PropertySchema, SchemaMode, SchemaProvider, SchemaStrictnessGuard, SchemaType};
