//! Design graph IR for the deparam specialization engine.
//!
//! ## Modules
//!
//! - [`design`]: The [`Design`] arena, modules, value identity
//! - [`node`]: Node kinds, instantiation sites and pins
//! - [`literal`]: Folded constant values
//! - [`value_hash`]: Deterministic structural hashing
//! - [`error`]: Diagnostics and internal errors
//! - [`builder`]: Fluent module construction

pub mod builder;
pub mod design;
pub mod error;
pub mod ids;
pub mod literal;
pub mod node;
pub mod span;
pub mod value_hash;

pub use builder::ModuleBuilder;
pub use design::{Design, Module, ModuleFlags, ModuleKind};
pub use error::{EngineError, EvalError, InternalError, ParamError};
pub use ids::{ModuleId, NodeId};
pub use literal::Literal;
pub use node::{
    BinaryOp, Cell, ClassRef, FwdType, IfacePort, IfaceRef, Node, NodeKind, Param, ParamFlags,
    ParamType, Pin, UnaryOp,
};
pub use span::Span;
pub use value_hash::ValueHash;
