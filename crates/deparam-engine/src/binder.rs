//! Constant/type binding of instantiation sites.
//!
//! The binder folds every parameter pin of a site through the
//! [`ConstEvaluator`], writes the folded value back into the pin, and builds
//! the site's long specialization name from the pins that differ from the
//! template's defaults. Binding failures are reported and replaced by a
//! placeholder so the pass can keep going.
//!
//! ## Pins
//!
//! ```text
//! Param      fold_constant -> Const      "_W16"  or "_Wz3"
//! Param[]    InitArray kept as is        "_Az4"
//! ParamType  fold_type -> concrete type  "_Tz5"
//! IfacePort  connected interface         "_Bz6"  + relink (port, iface)
//! ```

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use deparam_core::{
    Design, FwdType, Literal, ModuleId, ModuleKind, NodeId, NodeKind, Param, ParamError,
    ParamFlags, ParamType, Pin,
};

use crate::eval::ConstEvaluator;
use crate::hier::are_same;
use crate::key::KeyBuilder;

/// Folded bindings of one instantiation site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteBinding {
    /// `<template>_` plus one fragment per overriding pin, or the finished
    /// name of a hierarchical block.
    pub long_name: String,
    /// Some pin differs from the template's default.
    pub any_overrides: bool,
    /// Interface ports whose connected interface differs from the declared
    /// one: (port formal in the template, connected interface).
    pub iface_relinks: Vec<(NodeId, ModuleId)>,
    /// Every value pin that folded: (formal, value).
    pub values: Vec<(NodeId, Literal)>,
}

impl SiteBinding {
    fn push_fragment(&mut self, label: &str, value: &str) {
        self.long_name.push('_');
        self.long_name.push_str(label);
        self.long_name.push_str(value);
        self.any_overrides = true;
    }
}

/// Pin folding and key fragment construction for one pass.
pub struct Binder<'p, E: ConstEvaluator + ?Sized> {
    evaluator: &'p mut E,
    keys: &'p mut KeyBuilder,
}

/// Context shared by the pins of one site.
struct SiteCtx {
    site: NodeId,
    template: ModuleId,
    site_name: String,
    hier: bool,
}

impl<'p, E: ConstEvaluator + ?Sized> Binder<'p, E> {
    pub fn new(evaluator: &'p mut E, keys: &'p mut KeyBuilder) -> Self {
        Self { evaluator, keys }
    }

    /// Fold the pins of `site`, which instantiates `template`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn bind_site(
        &mut self,
        design: &mut Design,
        site: NodeId,
        template: ModuleId,
        errors: &mut Vec<ParamError>,
    ) -> SiteBinding {
        let module = design.module(template);
        let ctx = SiteCtx {
            site,
            template,
            site_name: design
                .node(site)
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| module.name.clone()),
            hier: module.is_hier_block(),
        };
        let mut binding = SiteBinding {
            long_name: format!("{}_", module.name),
            ..SiteBinding::default()
        };
        let mut hier_values: FxHashMap<String, NodeId> = FxHashMap::default();

        let params: Vec<Pin> = design
            .node(site)
            .site_params()
            .map(<[Pin]>::to_vec)
            .unwrap_or_default();
        for (index, pin) in params.iter().enumerate() {
            let Some(formal) = pin.formal else {
                debug!(pin = %pin.name, site = %ctx.site_name, "pin names no parameter; skipped");
                continue;
            };
            let Some(expr) = pin.expr else {
                continue;
            };
            match design.node(formal).kind.clone() {
                NodeKind::Param(param) => self.bind_value(
                    design,
                    &ctx,
                    index,
                    pin,
                    (formal, expr),
                    &param,
                    &mut binding,
                    &mut hier_values,
                    errors,
                ),
                NodeKind::ParamType(param) => self.bind_type(
                    design,
                    &ctx,
                    index,
                    pin,
                    (formal, expr),
                    &param,
                    &mut binding,
                    &mut hier_values,
                    errors,
                ),
                _ => debug!(pin = %pin.name, "parameter pin bound to a non-parameter; skipped"),
            }
        }

        if ctx.hier {
            binding.long_name = self.keys.hier_block_name(design, template, &hier_values);
            binding.any_overrides = binding.long_name != design.module(template).name;
        }

        let ports = match &design.node(site).kind {
            NodeKind::Cell(cell) => cell.pins.clone(),
            _ => Vec::new(),
        };
        self.bind_interfaces(design, template, &ports, &mut binding, errors);

        trace!(site = %ctx.site_name, long_name = %binding.long_name, "bound site");
        binding
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_value(
        &mut self,
        design: &mut Design,
        ctx: &SiteCtx,
        index: usize,
        pin: &Pin,
        (formal, expr): (NodeId, NodeId),
        param: &Param,
        binding: &mut SiteBinding,
        hier_values: &mut FxHashMap<String, NodeId>,
        errors: &mut Vec<ParamError>,
    ) {
        if param.is_array && matches!(design.node(expr).kind, NodeKind::InitArray(_)) {
            if ctx.hier {
                errors.push(ParamError::UnsupportedHierParam {
                    span: pin.span,
                    name: param.name.clone(),
                    module: design.module(ctx.template).orig_name.clone(),
                });
                return;
            }
            let label = self.keys.small_name(design, ctx.template, formal);
            let value = self.keys.value_number(design, expr);
            binding.push_fragment(&label, &value);
            return;
        }

        let folded = match self.evaluator.fold_constant(design, expr) {
            Ok(lit) => coerce(lit, param),
            Err(cause) => {
                errors.push(ParamError::ConstantRequired {
                    span: pin.span,
                    name: pin.name.clone(),
                    site: ctx.site_name.clone(),
                    cause,
                });
                let zero = design.add_node(NodeKind::Const(Literal::zero(param.width)), pin.span);
                set_pin_expr(design, ctx.site, index, zero);
                return;
            }
        };
        let value_node = if design.literal(expr) == Some(&folded) {
            expr
        } else {
            let span = design.node(expr).span;
            let node = design.add_node(NodeKind::Const(folded.clone()), span);
            set_pin_expr(design, ctx.site, index, node);
            node
        };
        binding.values.push((formal, folded.clone()));

        if ctx.hier {
            hier_values.insert(param.name.clone(), value_node);
            return;
        }

        let default = param.value.and_then(|v| self.default_literal(design, v, param));
        if default.is_some_and(|d| are_same(&folded, &d)) {
            trace!(param = %param.name, "pin equals default");
            return;
        }
        let label = self.keys.small_name(design, ctx.template, formal);
        let value = self.keys.literal_value(design, value_node);
        binding.push_fragment(&label, &value);
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_type(
        &mut self,
        design: &mut Design,
        ctx: &SiteCtx,
        index: usize,
        pin: &Pin,
        (formal, expr): (NodeId, NodeId),
        param: &ParamType,
        binding: &mut SiteBinding,
        hier_values: &mut FxHashMap<String, NodeId>,
        errors: &mut Vec<ParamError>,
    ) {
        let Ok(folded) = self.evaluator.fold_type(design, expr) else {
            errors.push(ParamError::ParamTypeNotType {
                span: pin.span,
                name: pin.name.clone(),
                site: ctx.site_name.clone(),
            });
            return;
        };
        let orig = match param.default {
            None => None,
            Some(default) => match design.skip_type_refs(default) {
                Some(t) if design.node(t).is_type() => Some(t),
                _ => {
                    errors.push(ParamError::ParamTypeVarNotType {
                        span: pin.span,
                        name: param.name.clone(),
                    });
                    return;
                }
            },
        };
        if !fwd_compatible(design, param.fwd, folded) {
            errors.push(ParamError::ForwardTypeViolation {
                span: pin.span,
                name: param.name.clone(),
                expected: param.fwd.as_str(),
                actual: design.value_string(folded),
            });
        }
        if folded != expr {
            set_pin_expr(design, ctx.site, index, folded);
        }

        if ctx.hier {
            hier_values.insert(param.name.clone(), folded);
            return;
        }
        if orig.is_some_and(|o| similar_type(design, o, folded)) {
            trace!(param = %param.name, "type pin equals default");
            return;
        }
        let label = self.keys.small_name(design, ctx.template, formal);
        let value = self.keys.value_number(design, folded);
        binding.push_fragment(&label, &value);
    }

    /// Compare each interface port's declared interface with the one its pin
    /// connects. A differing interface is part of the key and is relinked in
    /// the clone.
    fn bind_interfaces(
        &mut self,
        design: &Design,
        template: ModuleId,
        ports: &[Pin],
        binding: &mut SiteBinding,
        errors: &mut Vec<ParamError>,
    ) {
        for pin in ports {
            let (Some(formal), Some(expr)) = (pin.formal, pin.expr) else {
                continue;
            };
            let NodeKind::IfacePort(port) = &design.node(formal).kind else {
                continue;
            };
            let Some(port_iref) = iface_ref_of(design, port.dtype) else {
                errors.push(ParamError::IfacePortNotInterface {
                    span: pin.span,
                    port: port.name.clone(),
                });
                continue;
            };
            let pin_iref = match &design.node(expr).kind {
                NodeKind::VarRef(target) => match &design.node(*target).kind {
                    NodeKind::Var { dtype, .. } => iface_ref_of(design, *dtype),
                    NodeKind::IfacePort(p) => iface_ref_of(design, p.dtype),
                    _ => None,
                },
                _ => None,
            };
            let Some(pin_iref) = pin_iref else {
                errors.push(ParamError::IfacePortUnconnected {
                    span: pin.span,
                    port: port.name.clone(),
                });
                continue;
            };

            let declared = design.iface_via_cell(port_iref);
            let connected = design.iface_via_cell(pin_iref);
            let (Some(declared), Some(connected)) = (declared, connected) else {
                continue;
            };
            if declared == connected {
                continue;
            }
            let (expected, actual) = (design.module(declared), design.module(connected));
            if expected.orig_name != actual.orig_name {
                errors.push(ParamError::InterfaceMismatch {
                    span: pin.span,
                    port: port.name.clone(),
                    expected: expected.orig_name.clone(),
                    actual: actual.name.clone(),
                });
                continue;
            }
            let label = self.keys.small_name(design, template, formal);
            let value = self.keys.value_number(design, pin_iref);
            binding.push_fragment(&label, &value);
            binding.iface_relinks.push((formal, connected));
        }
    }

    /// Fold a parameter of a module body in place, once.
    pub fn constify_param(
        &mut self,
        design: &mut Design,
        param: NodeId,
        module: ModuleId,
        errors: &mut Vec<ParamError>,
    ) {
        let NodeKind::Param(p) = &design.node(param).kind else {
            return;
        };
        if p.flags.contains(ParamFlags::CONST_PROPAGATED) {
            return;
        }
        let p = p.clone();
        let Some(value) = p.value else {
            return;
        };

        let new_value = if matches!(design.node(value).kind, NodeKind::InitArray(_)) {
            None
        } else {
            match self.evaluator.fold_constant(design, value) {
                Ok(lit) => {
                    let lit = coerce(lit, &p);
                    (design.literal(value) != Some(&lit))
                        .then(|| design.add_node(NodeKind::Const(lit), design.node(value).span))
                }
                Err(cause) => {
                    let span = design.node(param).span;
                    errors.push(ParamError::ConstantRequired {
                        span,
                        name: p.name.clone(),
                        site: design.module(module).name.clone(),
                        cause,
                    });
                    Some(design.add_node(NodeKind::Const(Literal::zero(p.width)), span))
                }
            }
        };

        if let NodeKind::Param(p) = &mut design.node_mut(param).kind {
            if new_value.is_some() {
                p.value = new_value;
            }
            p.flags.insert(ParamFlags::CONST_PROPAGATED);
        }
    }

    fn default_literal(
        &mut self,
        design: &Design,
        value: NodeId,
        param: &Param,
    ) -> Option<Literal> {
        let lit = match design.literal(value) {
            Some(lit) => lit.clone(),
            None => self.evaluator.fold_constant(design, value).ok()?,
        };
        Some(coerce(lit, param))
    }
}

fn set_pin_expr(design: &mut Design, site: NodeId, index: usize, expr: NodeId) {
    if let Some(pin) = design
        .node_mut(site)
        .site_params_mut()
        .and_then(|params| params.get_mut(index))
    {
        pin.expr = Some(expr);
    }
}

/// The interface reference of a port type: an `IfaceRef`, or an unpacked
/// array of them.
fn iface_ref_of(design: &Design, dtype: NodeId) -> Option<NodeId> {
    match &design.node(dtype).kind {
        NodeKind::IfaceRef(_) => Some(dtype),
        NodeKind::UnpackArray { sub, .. } => {
            matches!(design.node(*sub).kind, NodeKind::IfaceRef(_)).then_some(*sub)
        }
        _ => None,
    }
}

/// Convert a folded value to the parameter's declared type: strings take
/// integers as packed characters, sized parameters truncate or extend.
fn coerce(lit: Literal, param: &Param) -> Literal {
    if param.is_string {
        return to_string_literal(lit);
    }
    match lit {
        Literal::Int { width, signed, .. } if width != param.width => {
            lit.cast_int(param.width, signed).unwrap_or(lit)
        }
        other => other,
    }
}

/// String parameters given a packed integer take its bytes as characters,
/// leading zero bytes dropped.
fn to_string_literal(lit: Literal) -> Literal {
    match lit {
        Literal::Int { bits, width, .. } => {
            let bytes = width.div_ceil(8) as usize;
            let text: Vec<u8> = (0..bytes)
                .rev()
                .map(|i| (bits >> (i * 8)) as u8)
                .skip_while(|b| *b == 0)
                .collect();
            Literal::Str(String::from_utf8_lossy(&text).into_owned())
        }
        other => other,
    }
}

fn fwd_compatible(design: &Design, fwd: FwdType, ty: NodeId) -> bool {
    match (fwd, &design.node(ty).kind) {
        (FwdType::None, _) => true,
        (FwdType::Enum, NodeKind::Enum { .. }) => true,
        (FwdType::Struct, NodeKind::Struct { union: false, .. }) => true,
        (FwdType::Union, NodeKind::Struct { union: true, .. }) => true,
        (FwdType::Class | FwdType::InterfaceClass, NodeKind::ClassRef(c)) => {
            design.module(c.target).kind == ModuleKind::Class
        }
        _ => false,
    }
}

fn similar_type(design: &Design, a: NodeId, b: NodeId) -> bool {
    a == b
        || (design.structural_hash(a) == design.structural_hash(b)
            && design.value_string(a) == design.value_string(b))
}
