//! Deparam Engine
//!
//! Parameter specialization for HDL design hierarchies: every instantiation
//! site that binds parameters is redirected to a concrete module built for
//! exactly those values.
//!
//! ## Architecture
//!
//! - **Worklist**: bodies are traversed breadth-first by hierarchy level
//! - **Per site**: bind, key, then reuse a default instance, a wrapper, a
//!   cached specialization, or clone the template
//! - **Repair**: levels and module order are fixed once the worklist drains
//!
//! ## Modules
//!
//! - [`binder`]: Folding of site bindings through the evaluator
//! - [`key`]: Specialization names
//! - [`cache`]: Key -> instance memoization
//! - [`clone`]: Template cloning and pin relinking
//! - [`hier`]: Hierarchical block wrapper matching
//! - [`scheduler`]: The worklist driver
//! - [`topology`]: Level repair and pruning
//! - [`eval`]: The constant/type evaluator seam
//! - [`config`]: Pass configuration

pub mod binder;
pub mod cache;
pub mod clone;
pub mod config;
pub mod eval;
pub mod hier;
pub mod key;
pub mod scheduler;
pub mod topology;

pub use binder::{Binder, SiteBinding};
pub use cache::{InstanceCache, InstanceInfo, Lookup, Reservation};
pub use clone::{CloneMap, CloneRequest, Cloner};
pub use config::{HierBlockOption, ParamConfig};
pub use eval::{BasicEvaluator, ConstEvaluator};
pub use hier::{HierBlockRegistry, are_same};
pub use key::KeyBuilder;
pub use scheduler::{ParamOutput, ParamPass};
pub use topology::{ParentMap, TopologyOutput, TopologyPass};
