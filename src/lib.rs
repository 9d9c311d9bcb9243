//! Deparam
//!
//! Parameter specialization (de-parameterization) for HDL design hierarchies.
//! After [`deparameterize`] runs, every instantiation site of a parameterized
//! module, interface or class names a concrete module whose parameters are
//! fixed, and the module list is ordered by hierarchy level.
//!
//! ## Example
//!
//! ```
//! use deparam::{BasicEvaluator, Design, ModuleKind, ParamConfig, deparameterize};
//!
//! let mut design = Design::new();
//! let mut adder = design.build_module("Adder", ModuleKind::Module);
//! let eight = adder.int(8);
//! adder.param("WIDTH", Some(eight));
//! adder.set_level(1);
//! let adder = adder.finish();
//!
//! let mut top = design.build_module("Top", ModuleKind::Module);
//! let sixteen = top.int(16);
//! top.cell("u0", adder, &[("WIDTH", sixteen)]);
//! top.finish();
//!
//! let output = deparameterize(&mut design, &mut BasicEvaluator::new(), &ParamConfig::new())
//!     .unwrap();
//! assert!(output.is_success());
//! assert!(design.module_exists("Adder__W16"));
//! ```

use tracing::info;

pub use deparam_core::{
    BinaryOp, Cell, ClassRef, Design, EngineError, EvalError, FwdType, IfacePort, IfaceRef,
    InternalError, Literal, Module, ModuleBuilder, ModuleFlags, ModuleId, ModuleKind, Node,
    NodeId, NodeKind, Param, ParamError, ParamFlags, ParamType, Pin, Span, UnaryOp, ValueHash,
};
pub use deparam_engine::{
    BasicEvaluator, ConstEvaluator, HierBlockOption, ParamConfig, ParamOutput, ParamPass,
};

/// Specialize every parameterized instantiation in `design`.
///
/// Diagnostics are collected in the returned [`ParamOutput`]; the design is
/// still fully processed when some are reported. An [`InternalError`] means
/// the pass stopped part way and the design must not be used further.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn deparameterize<E: ConstEvaluator + ?Sized>(
    design: &mut Design,
    evaluator: &mut E,
    config: &ParamConfig,
) -> Result<ParamOutput, InternalError> {
    let output = ParamPass::new(design, evaluator, config)?.run()?;
    info!(
        created = output.instances_created,
        cache_hits = output.cache_hits,
        default_instances = output.default_instances,
        wrappers = output.wrappers_matched,
        deleted = output.modules_deleted,
        errors = output.errors.len(),
        "deparameterized design"
    );
    Ok(output)
}
