//! Rill intermediate representation.
//!
//! An arena-based SSA IR for an asynchronous tensor/resource dataflow
//! dialect: resources with lifetimes, timepoints ordering execution
//! regions, and in-place result/operand ties. Storage is handle-addressed
//! so rewrites never invalidate references to untouched operations.

pub mod arena;
mod attr;
mod builder;
mod display;
pub mod dominance;
mod error;
mod module;
mod op;
mod types;
mod verify;

pub use arena::{Arena, Handle};
pub use attr::{Affinity, Attr};
pub use builder::Builder;
pub use display::dump_module;
pub use dominance::DominanceInfo;
pub use error::Diagnostic;
pub use module::{Block, InsertPoint, Module, OpOperand, Region, Value, ValueDef};
pub use op::{Loc, OpKind, Operation};
pub use types::{Lifetime, Literal, Scalar, ScalarKind, Type};
pub use verify::verify;
