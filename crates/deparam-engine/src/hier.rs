//! Hierarchical block wrapper matching.
//!
//! In a sub-run, hierarchical blocks have already been built elsewhere and
//! appear in the design under their mangled names. A site instantiating such
//! a block is pointed at the wrapper whose recorded parameter values equal the
//! site's bindings, instead of being cloned.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use deparam_core::{
    Design, InternalError, Literal, ModuleFlags, ModuleId, NodeId, NodeKind, ParamError, Span,
};

use crate::config::{HierBlockOption, ParamConfig};

/// Value equality between a site binding and a wrapper's recorded value.
///
/// Strings compare as strings. Against a real, the binding is converted to
/// real and compared with a relative epsilon. Otherwise the binding is cast
/// to the recorded value's width (reals rounded, signed values sign-extended)
/// and compared bitwise.
pub fn are_same(pin: &Literal, recorded: &Literal) -> bool {
    if let Literal::Str(p) = pin {
        return matches!(recorded, Literal::Str(r) if r == p);
    }
    match recorded {
        Literal::Str(_) => false,
        Literal::Real(r) => pin.as_f64().is_some_and(|v| epsilon_equal(v, r.0)),
        Literal::Int { bits, width, .. } => pin
            .as_i128()
            .map(|v| Literal::int(v, *width, false))
            .is_some_and(|cast| matches!(cast, Literal::Int { bits: b, .. } if b == *bits)),
    }
}

fn epsilon_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// Registry of pre-built hierarchical block wrappers.
#[derive(Debug, Default)]
pub struct HierBlockRegistry {
    sub_run: bool,
    options: Vec<HierBlockOption>,
    /// Original template name -> option indices, in registry order.
    by_orig: FxHashMap<String, Vec<usize>>,
    params: Vec<FxHashMap<String, Literal>>,
}

impl HierBlockRegistry {
    /// Index the configured wrappers. A wrapper listing one parameter twice is
    /// a configuration bug.
    pub fn new(config: &ParamConfig) -> Result<Self, InternalError> {
        let mut registry = Self {
            sub_run: config.hier_sub_run,
            ..Self::default()
        };
        for (index, option) in config.hier_blocks.iter().enumerate() {
            let mut values = FxHashMap::default();
            for (name, value) in &option.params {
                if values.insert(name.clone(), value.clone()).is_some() {
                    return Err(InternalError::DuplicateHierParam {
                        module: option.mangled_name.clone(),
                        name: name.clone(),
                    });
                }
            }
            registry
                .by_orig
                .entry(option.orig_name.clone())
                .or_default()
                .push(index);
            registry.params.push(values);
            registry.options.push(option.clone());
        }
        Ok(registry)
    }

    pub fn is_sub_run(&self) -> bool {
        self.sub_run
    }

    pub fn is_hier_block(&self, orig_name: &str) -> bool {
        self.by_orig.contains_key(orig_name)
    }

    /// Mangled names of every registered wrapper.
    pub fn wrapper_names(&self) -> FxHashSet<&str> {
        self.options.iter().map(|o| o.mangled_name.as_str()).collect()
    }

    /// Find the wrapper for `template` whose recorded values match `bindings`
    /// (formal, folded value). Bindings equal to the template's own default
    /// are ignored. The first match in registry order wins.
    pub fn find_by_params(
        &self,
        design: &mut Design,
        template: ModuleId,
        bindings: &[(NodeId, Literal)],
        span: Span,
    ) -> Result<ModuleId, ParamError> {
        let orig = design.module(template).orig_name.clone();
        let candidates = self.by_orig.get(&orig).map(Vec::as_slice).unwrap_or_default();

        let matched = candidates.iter().copied().find(|&index| {
            let recorded = &self.params[index];
            let mut matched = 0;
            for (formal, value) in bindings {
                let NodeKind::Param(param) = &design.node(*formal).kind else {
                    continue;
                };
                let default = param.value.and_then(|v| design.literal(v));
                if default.is_some_and(|d| are_same(value, d)) {
                    trace!(param = %param.name, "binding equals default");
                    continue;
                }
                match recorded.get(&param.name) {
                    Some(r) if are_same(value, r) => matched += 1,
                    _ => return false,
                }
            }
            matched == recorded.len()
        });

        let wrapper = matched.and_then(|index| {
            let mangled = &self.options[index].mangled_name;
            design.find_module(mangled)
        });
        let Some(wrapper) = wrapper else {
            let key = bindings
                .iter()
                .map(|(formal, value)| {
                    format!("{}={}", design.node(*formal).name().unwrap_or("?"), value)
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ParamError::WrapperNotFound {
                span,
                module: orig,
                key,
            });
        };
        debug!(template = %orig, wrapper = %design.module(wrapper).name, "matched wrapper");
        design.module_mut(wrapper).flags.remove(ModuleFlags::DEAD);
        Ok(wrapper)
    }
}
