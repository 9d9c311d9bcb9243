//! Template cloning.
//!
//! A specialization is a deep copy of its template's body with the site's
//! bindings written into the copied formals. Copies are made node by node into
//! fresh arena slots; every intra-module reference is then rewritten through
//! the [`CloneMap`]. Module handles (`Cell::target`, `ClassRef::target`) and
//! pin formals are not nodes of the copied body and are left alone, except for
//! self references of a class, which are patched explicitly.
//!
//! Templates that are elaborated in place as their own default instance keep
//! a detached pristine copy, so later specializations still start from the
//! generic body.

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use deparam_core::{
    Design, EngineError, InternalError, Module, ModuleFlags, ModuleId, NodeId, NodeKind,
    ParamError, ParamFlags, Span,
};

use crate::cache::InstanceInfo;
use crate::hier::are_same;

/// Old node -> copied node.
pub type CloneMap = FxHashMap<NodeId, NodeId>;

/// Copy every node reachable from `roots` into fresh slots and rewrite the
/// copies' internal references. Returns the copied roots and the map.
pub fn copy_nodes(design: &mut Design, roots: &[NodeId]) -> (Vec<NodeId>, CloneMap) {
    let mut reachable = Vec::new();
    let mut map = CloneMap::default();
    for &root in roots {
        design.walk(root, &mut |id| {
            if !map.contains_key(&id) {
                map.insert(id, id);
                reachable.push(id);
            }
        });
    }
    for &old in &reachable {
        let node = design.node(old).clone();
        let new = design.add_node(node.kind, node.span);
        map.insert(old, new);
    }
    for &old in &reachable {
        let new = map[&old];
        design.node_mut(new).remap(&|id| map.get(&id).copied());
    }
    let copied = roots.iter().map(|r| map[r]).collect();
    (copied, map)
}

/// What to build.
#[derive(Debug, Clone)]
pub struct CloneRequest<'a> {
    /// Template named by the site.
    pub template: ModuleId,
    /// Name of the new module.
    pub name: String,
    /// Level of the module containing the site.
    pub parent_level: u32,
    /// The site whose parameter pins are written into the clone.
    pub site: NodeId,
    /// (template interface port, connected interface) pairs.
    pub iface_relinks: &'a [(NodeId, ModuleId)],
    pub span: Span,
}

/// Builds specializations and owns the pristine copies.
#[derive(Debug, Default)]
pub struct Cloner {
    /// Template -> detached unaltered copy.
    pristine: FxHashMap<ModuleId, ModuleId>,
    /// Formal of a pristine copy -> formal of its template.
    original_formals: FxHashMap<NodeId, NodeId>,
    max_recursion_depth: u32,
}

impl Cloner {
    pub fn new(max_recursion_depth: u32) -> Self {
        Self {
            max_recursion_depth,
            ..Self::default()
        }
    }

    pub fn has_pristine(&self, template: ModuleId) -> bool {
        self.pristine.contains_key(&template)
    }

    pub fn pristine_of(&self, template: ModuleId) -> Option<ModuleId> {
        self.pristine.get(&template).copied()
    }

    /// Keep a detached copy of `template` before it is elaborated in place.
    pub fn ensure_pristine(&mut self, design: &mut Design, template: ModuleId) -> ModuleId {
        if let Some(copy) = self.pristine_of(template) {
            return copy;
        }
        let source = design.module(template).clone();
        let (stmts, _) = copy_nodes(design, &source.stmts);
        for (&orig, &copy) in source.stmts.iter().zip(&stmts) {
            if design.node(orig).is_gparam() {
                self.original_formals.insert(copy, orig);
            }
        }
        let copy = design.add_detached_module(Module { stmts, ..source });
        trace!(template = %design.module(template).name, "stored pristine copy");
        self.pristine.insert(template, copy);
        copy
    }

    /// Build the specialization of `request.template` for the site.
    ///
    /// Fails with a [`ParamError`] when the recursion limit is exceeded; the
    /// design is then unchanged.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn clone_module(
        &mut self,
        design: &mut Design,
        request: &CloneRequest<'_>,
    ) -> Result<InstanceInfo, EngineError> {
        let template = request.template;
        let src = design.module(template);
        let new_level = src.level.max(request.parent_level + 1);
        if new_level - src.level > self.max_recursion_depth {
            return Err(ParamError::RecursionDepthExceeded {
                span: request.span,
                module: src.orig_name.clone(),
                max: self.max_recursion_depth,
            }
            .into());
        }

        let source_id = self.pristine_of(template).unwrap_or(template);
        let source = design.module(source_id).clone();
        let (stmts, map) = copy_nodes(design, &source.stmts);

        let mut flags = source.flags;
        flags.remove(
            ModuleFlags::HAS_GPARAM
                | ModuleFlags::RECURSIVE_CLONE
                | ModuleFlags::DEAD
                | ModuleFlags::DELETED,
        );
        let module = Module {
            name: request.name.clone(),
            orig_name: design.module(template).orig_name.clone(),
            level: new_level,
            stmts: stmts.clone(),
            flags,
            ..source.clone()
        };
        let id = design.add_detached_module(module);
        self.patch_self_refs(design, &map, template, source_id, id);
        design.insert_module_after(template, id);

        let mut formals = FxHashMap::default();
        for (&src_stmt, &new_stmt) in source.stmts.iter().zip(&stmts) {
            if !design.node(src_stmt).is_gparam() {
                continue;
            }
            let original = if source_id == template {
                src_stmt
            } else {
                self.original_formals.get(&src_stmt).copied().unwrap_or(src_stmt)
            };
            formals.insert(original, new_stmt);
        }
        let info = InstanceInfo { module: id, formals };

        for &(port, iface) in request.iface_relinks {
            let Some(clone_port) = info.clone_of(port) else {
                return Err(InternalError::PinNotInCloneMap {
                    name: design.node(port).name().unwrap_or("?").to_string(),
                    module: request.name.clone(),
                }
                .into());
            };
            relink_port_iface(design, clone_port, iface);
        }

        relink_pins(design, request.site, &info, &request.name)?;
        assign_params(design, request.site);

        debug!(
            template = %design.module(template).name,
            instance = %request.name,
            level = new_level,
            "specialized"
        );
        Ok(info)
    }

    /// Class self references in a fresh copy: a bare reference names the new
    /// instance; a parameterized one goes back to the template and is resolved
    /// as a site of its own.
    fn patch_self_refs(
        &self,
        design: &mut Design,
        map: &CloneMap,
        template: ModuleId,
        source: ModuleId,
        new: ModuleId,
    ) {
        for &copied in map.values() {
            if let NodeKind::ClassRef(class_ref) = &mut design.node_mut(copied).kind {
                if class_ref.target == template || class_ref.target == source {
                    class_ref.target = if class_ref.params.is_empty() {
                        new
                    } else {
                        template
                    };
                }
            }
        }
    }
}

/// Point the site's parameter pins at the instance's formals.
pub fn relink_pins(
    design: &mut Design,
    site: NodeId,
    info: &InstanceInfo,
    instance: &str,
) -> Result<(), InternalError> {
    let mut params = design
        .node(site)
        .site_params()
        .map(<[_]>::to_vec)
        .unwrap_or_default();
    for pin in &mut params {
        let Some(formal) = pin.formal else {
            continue;
        };
        pin.formal = Some(info.clone_of(formal).ok_or_else(|| InternalError::PinNotInCloneMap {
            name: pin.name.clone(),
            module: instance.to_string(),
        })?);
    }
    if let Some(slot) = design.node_mut(site).site_params_mut() {
        *slot = params;
    }
    Ok(())
}

/// Point a cell's port connections at the same-named formals of `module`.
pub fn relink_pins_by_name(
    design: &mut Design,
    cell: NodeId,
    module: ModuleId,
) -> Result<(), InternalError> {
    let NodeKind::Cell(c) = &design.node(cell).kind else {
        return Ok(());
    };
    let mut pins = c.pins.clone();
    for pin in &mut pins {
        if pin.formal.is_none() {
            continue;
        }
        pin.formal = Some(design.find_formal(module, &pin.name).ok_or_else(|| {
            InternalError::PinNotInCloneMap {
                name: pin.name.clone(),
                module: design.module(module).name.clone(),
            }
        })?);
    }
    if let NodeKind::Cell(c) = &mut design.node_mut(cell).kind {
        c.pins = pins;
    }
    Ok(())
}

fn relink_port_iface(design: &mut Design, port: NodeId, iface: ModuleId) {
    let NodeKind::IfacePort(p) = &design.node(port).kind else {
        return;
    };
    let dtype = p.dtype;
    let iref = match &design.node(dtype).kind {
        NodeKind::UnpackArray { sub, .. } => *sub,
        _ => dtype,
    };
    if let NodeKind::IfaceRef(r) = &mut design.node_mut(iref).kind {
        trace!(port = %port, iface = %iface, "relinked interface port");
        r.iface = Some(iface);
    }
}

/// Write the site's (relinked) pin values into the instance's formals.
fn assign_params(design: &mut Design, site: NodeId) {
    let params = design
        .node(site)
        .site_params()
        .map(<[_]>::to_vec)
        .unwrap_or_default();
    for pin in params {
        let (Some(formal), Some(expr)) = (pin.formal, pin.expr) else {
            continue;
        };
        match design.node(formal).kind.clone() {
            NodeKind::Param(param) => {
                let default = param.value.and_then(|v| design.literal(v));
                let overridden = match (design.literal(expr), default) {
                    (Some(value), Some(default)) => !are_same(value, default),
                    _ => true,
                };
                let (copied, _) = copy_nodes(design, &[expr]);
                if let NodeKind::Param(p) = &mut design.node_mut(formal).kind {
                    p.value = copied.first().copied();
                    p.flags.set(ParamFlags::OVERRIDDEN, overridden);
                    p.flags.remove(ParamFlags::CONST_PROPAGATED);
                }
            }
            NodeKind::ParamType(_) => {
                let (copied, _) = copy_nodes(design, &[expr]);
                if let NodeKind::ParamType(p) = &mut design.node_mut(formal).kind {
                    p.default = copied.first().copied();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deparam_core::{BinaryOp, FwdType, Literal, ModuleKind};

    fn request<'a>(
        template: ModuleId,
        name: &str,
        site: NodeId,
        parent_level: u32,
    ) -> CloneRequest<'a> {
        CloneRequest {
            template,
            name: name.to_string(),
            parent_level,
            site,
            iface_relinks: &[],
            span: Span::default(),
        }
    }

    #[test]
    fn copy_rewrites_internal_refs() {
        let mut design = Design::new();
        let mut b = design.build_module("M", ModuleKind::Module);
        let four = b.int(4);
        let n = b.param("N", Some(four));
        let r = b.var_ref(n);
        let l = b.localparam("L", r);
        b.finish();

        let (copies, map) = copy_nodes(&mut design, &[n, l]);
        let NodeKind::Param(p) = &design.node(copies[1]).kind else {
            panic!("expected param");
        };
        let value = p.value.unwrap();
        assert_eq!(design.node(value).kind, NodeKind::VarRef(copies[0]));
        assert_eq!(map[&n], copies[0]);
        assert_ne!(map[&four], four);
    }

    #[test]
    fn clone_assigns_bound_values() {
        let mut design = Design::new();
        let mut b = design.build_module("Adder", ModuleKind::Module);
        let eight = b.int(8);
        let width = b.param("WIDTH", Some(eight));
        let adder = b.finish();
        let mut top = design.build_module("Top", ModuleKind::Module);
        let sixteen = top.int(16);
        let cell = top.cell("u0", adder, &[("WIDTH", sixteen)]);
        let top = top.finish();

        let mut cloner = Cloner::new(100);
        let info = cloner
            .clone_module(&mut design, &request(adder, "Adder__W16", cell, 0))
            .unwrap();
        let m = design.module(info.module);
        assert_eq!(m.name, "Adder__W16");
        assert_eq!(m.orig_name, "Adder");
        assert_eq!(m.level, 1);
        assert!(!m.has_gparam());
        // Placed after the template, past the level-0 modules that follow it
        assert_eq!(design.order(), &[adder, top, info.module]);

        let clone_width = info.clone_of(width).unwrap();
        let NodeKind::Param(p) = &design.node(clone_width).kind else {
            panic!("expected param");
        };
        assert!(p.flags.contains(ParamFlags::OVERRIDDEN));
        assert_eq!(design.literal(p.value.unwrap()), Some(&Literal::integer(16)));

        // Site pins now name the clone's formal
        let pins = design.node(cell).site_params().unwrap();
        assert_eq!(pins[0].formal, Some(clone_width));

        // Template untouched
        let NodeKind::Param(orig) = &design.node(width).kind else {
            panic!("expected param");
        };
        assert_eq!(orig.value, Some(eight));
    }

    #[test]
    fn clones_start_from_pristine_copy() {
        let mut design = Design::new();
        let mut b = design.build_module("Fifo", ModuleKind::Module);
        let logic = b.basic_type("logic", false, None);
        let t = b.param_type("T", Some(logic), FwdType::None);
        let fifo = b.finish();

        let mut cloner = Cloner::new(100);
        let pristine = cloner.ensure_pristine(&mut design, fifo);
        assert!(!design.order().contains(&pristine));
        assert_eq!(cloner.ensure_pristine(&mut design, fifo), pristine);

        // Elaborate the template in place
        let wide = design.add_node(
            NodeKind::BasicType {
                name: "bit".into(),
                signed: false,
                range: None,
            },
            Span::default(),
        );
        if let NodeKind::ParamType(p) = &mut design.node_mut(t).kind {
            p.default = Some(wide);
        }

        let mut top = design.build_module("Top", ModuleKind::Module);
        let ty = top.basic_type("logic", false, Some((7, 0)));
        let cell = top.cell("u0", fifo, &[("T", ty)]);
        top.finish();

        let info = cloner
            .clone_module(&mut design, &request(fifo, "Fifo__Tz1", cell, 0))
            .unwrap();
        let clone_t = info.clone_of(t).unwrap();
        let NodeKind::ParamType(p) = &design.node(clone_t).kind else {
            panic!("expected param type");
        };
        let value = p.default.unwrap();
        assert_eq!(design.value_string(value), "logic[7:0]");
        assert_ne!(value, ty);
    }

    #[test]
    fn recursion_limit_is_enforced() {
        let mut design = Design::new();
        let mut b = design.build_module("Node", ModuleKind::Module);
        let n = b.param("N", None);
        let own = b.id();
        let n_ref = b.var_ref(n);
        let one = b.int(1);
        let dec = b.binary(BinaryOp::Sub, n_ref, one);
        let cell = b.cell("next", own, &[("N", dec)]);
        let node = b.finish();

        let mut cloner = Cloner::new(2);
        assert!(cloner.clone_module(&mut design, &request(node, "Node__N1", cell, 1)).is_ok());
        let err = cloner
            .clone_module(&mut design, &request(node, "Node__N2", cell, 2))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Param(ParamError::RecursionDepthExceeded { max: 2, .. })
        ));
        assert!(!design.module_exists("Node__N2"));
    }

    #[test]
    fn class_self_refs_are_patched() {
        let mut design = Design::new();
        let mut b = design.build_module("List", ModuleKind::Class);
        let zero = b.int(0);
        let n = b.param("N", Some(zero));
        let own = b.id();
        let bare = b.class_ref(own, &[]);
        b.var("this_type", bare);
        let n_ref = b.var_ref(n);
        let param_ref = b.class_ref(own, &[("N", n_ref)]);
        b.var("next", param_ref);
        let list = b.finish();

        let mut top = design.build_module("Top", ModuleKind::Module);
        let three = top.int(3);
        let site = top.class_ref(list, &[("N", three)]);
        top.var("l", site);
        top.finish();

        let mut cloner = Cloner::new(100);
        let info = cloner
            .clone_module(&mut design, &request(list, "List__N3", site, 0))
            .unwrap();
        let mut targets = Vec::new();
        for &stmt in &design.module(info.module).stmts {
            if let NodeKind::Var { dtype, .. } = &design.node(stmt).kind {
                if let NodeKind::ClassRef(c) = &design.node(*dtype).kind {
                    targets.push(c.target);
                }
            }
        }
        assert_eq!(targets, vec![info.module, list]);
    }

    #[test]
    fn interface_ports_follow_relinks() {
        let mut design = Design::new();
        let bus = design.build_module("Bus", ModuleKind::Interface).finish();
        let bus16 = design.build_module("Bus__W16", ModuleKind::Interface).finish();
        let mut dev = design.build_module("Dev", ModuleKind::Module);
        let port = dev.iface_port("b", bus, None);
        let dev = dev.finish();
        let mut top = design.build_module("Top", ModuleKind::Module);
        let cell = top.cell("d0", dev, &[]);
        top.finish();

        let relinks = [(port, bus16)];
        let mut cloner = Cloner::new(100);
        let info = cloner
            .clone_module(
                &mut design,
                &CloneRequest {
                    iface_relinks: &relinks,
                    ..request(dev, "Dev__Bz1", cell, 0)
                },
            )
            .unwrap();
        let clone_port = info.clone_of(port).unwrap();
        let NodeKind::IfacePort(p) = &design.node(clone_port).kind else {
            panic!("expected port");
        };
        let NodeKind::IfaceRef(r) = &design.node(p.dtype).kind else {
            panic!("expected iface ref");
        };
        assert_eq!(r.iface, Some(bus16));
    }

    #[test]
    fn port_pins_relink_by_name() {
        let mut design = Design::new();
        let bus = design.build_module("Bus", ModuleKind::Interface).finish();
        let mut dev = design.build_module("Dev", ModuleKind::Module);
        dev.iface_port("b", bus, None);
        let dev = dev.finish();
        let mut dev2 = design.build_module("Dev_copy", ModuleKind::Module);
        let port2 = dev2.iface_port("b", bus, None);
        let dev2 = dev2.finish();

        let mut top = design.build_module("Top", ModuleKind::Module);
        let (_, var) = top.interface_instance("bus0", bus, &[]);
        let conn = top.var_ref(var);
        let cell = top.cell_with_pins("d0", dev, &[], &[("b", conn)]);
        top.finish();

        relink_pins_by_name(&mut design, cell, dev2).unwrap();
        let NodeKind::Cell(c) = &design.node(cell).kind else {
            panic!("expected cell");
        };
        assert_eq!(c.pins[0].formal, Some(port2));
    }
}
