//! Fluent construction of modules.
//!
//! ```
//! use deparam_core::{Design, ModuleKind};
//!
//! let mut design = Design::new();
//! let mut adder = design.build_module("Adder", ModuleKind::Module);
//! let eight = adder.int(8);
//! adder.param("WIDTH", Some(eight));
//! let adder = adder.finish();
//!
//! let mut top = design.build_module("Top", ModuleKind::Module);
//! let sixteen = top.int(16);
//! top.cell("u0", adder, &[("WIDTH", sixteen)]);
//! top.finish();
//!
//! assert!(design.module(adder).has_gparam());
//! ```

use crate::{
    BinaryOp, Cell, ClassRef, Design, FwdType, IfacePort, IfaceRef, Literal, Module, ModuleFlags,
    ModuleId, ModuleKind, NodeId, NodeKind, Param, ParamFlags, ParamType, Pin, Span, UnaryOp,
    literal::INTEGER_WIDTH,
};

impl Design {
    /// Start a new module. It is listed immediately, so sites inside its own
    /// body may target it.
    pub fn build_module(&mut self, name: &str, kind: ModuleKind) -> ModuleBuilder<'_> {
        let id = self.add_module(Module::new(name, kind));
        ModuleBuilder {
            design: self,
            id,
            scopes: vec![Vec::new()],
            span: Span::default(),
        }
    }
}

/// Builds one module's body.
///
/// Declarations (`param`, `param_type`, `iface_port`, `var`, `cell`, `begin`)
/// are appended to the current scope; expression and type helpers only
/// allocate nodes.
pub struct ModuleBuilder<'d> {
    design: &'d mut Design,
    id: ModuleId,
    scopes: Vec<Vec<NodeId>>,
    span: Span,
}

impl<'d> ModuleBuilder<'d> {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn design(&self) -> &Design {
        &*self.design
    }

    pub fn design_mut(&mut self) -> &mut Design {
        &mut *self.design
    }

    pub fn set_level(&mut self, level: u32) -> &mut Self {
        self.design.module_mut(self.id).level = level;
        self
    }

    pub fn set_flags(&mut self, flags: ModuleFlags) -> &mut Self {
        self.design.module_mut(self.id).flags.insert(flags);
        self
    }

    /// Span attached to nodes created from here on.
    pub fn set_span(&mut self, span: Span) -> &mut Self {
        self.span = span;
        self
    }

    fn node(&mut self, kind: NodeKind) -> NodeId {
        self.design.add_node(kind, self.span)
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = self.node(kind);
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(id);
        }
        id
    }

    // ==========================================================================
    // Expressions
    // ==========================================================================

    pub fn lit(&mut self, value: Literal) -> NodeId {
        self.node(NodeKind::Const(value))
    }

    pub fn int(&mut self, value: i128) -> NodeId {
        self.lit(Literal::integer(value))
    }

    pub fn string(&mut self, value: &str) -> NodeId {
        self.lit(Literal::string(value))
    }

    pub fn var_ref(&mut self, target: NodeId) -> NodeId {
        self.node(NodeKind::VarRef(target))
    }

    pub fn unary(&mut self, op: UnaryOp, arg: NodeId) -> NodeId {
        self.node(NodeKind::Unary { op, arg })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.node(NodeKind::Binary { op, lhs, rhs })
    }

    pub fn cond(&mut self, cond: NodeId, then: NodeId, els: NodeId) -> NodeId {
        self.node(NodeKind::Cond { cond, then, els })
    }

    pub fn init_array(&mut self, items: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::InitArray(items))
    }

    // ==========================================================================
    // Types
    // ==========================================================================

    pub fn basic_type(&mut self, name: &str, signed: bool, range: Option<(i64, i64)>) -> NodeId {
        self.node(NodeKind::BasicType {
            name: name.to_string(),
            signed,
            range,
        })
    }

    pub fn packed(&mut self, left: i64, right: i64, sub: NodeId) -> NodeId {
        self.node(NodeKind::PackedArray { left, right, sub })
    }

    pub fn unpacked(&mut self, left: i64, right: i64, sub: NodeId) -> NodeId {
        self.node(NodeKind::UnpackArray { left, right, sub })
    }

    pub fn struct_type(&mut self, packed: bool, members: &[(&str, NodeId)]) -> NodeId {
        self.node(NodeKind::Struct {
            packed,
            union: false,
            members: members.iter().map(|(n, t)| (n.to_string(), *t)).collect(),
        })
    }

    pub fn union_type(&mut self, members: &[(&str, NodeId)]) -> NodeId {
        self.node(NodeKind::Struct {
            packed: true,
            union: true,
            members: members.iter().map(|(n, t)| (n.to_string(), *t)).collect(),
        })
    }

    pub fn enum_type(&mut self, name: &str, base: NodeId) -> NodeId {
        self.node(NodeKind::Enum {
            name: name.to_string(),
            base,
        })
    }

    pub fn type_ref(&mut self, param_type: NodeId) -> NodeId {
        self.node(NodeKind::TypeRef(param_type))
    }

    /// A class type reference, parameterized by name.
    pub fn class_ref(&mut self, target: ModuleId, params: &[(&str, NodeId)]) -> NodeId {
        let params = self.pins(target, params);
        self.node(NodeKind::ClassRef(ClassRef { target, params }))
    }

    pub fn iface_ref(
        &mut self,
        iface: ModuleId,
        cell: Option<NodeId>,
        modport: Option<&str>,
    ) -> NodeId {
        self.node(NodeKind::IfaceRef(IfaceRef {
            iface: Some(iface),
            cell,
            modport: modport.map(str::to_string),
            params: Vec::new(),
        }))
    }

    // ==========================================================================
    // Declarations
    // ==========================================================================

    /// An overridable 32-bit value parameter.
    pub fn param(&mut self, name: &str, default: Option<NodeId>) -> NodeId {
        self.push_param(name, true, default, INTEGER_WIDTH, false, false)
    }

    /// An overridable value parameter of an explicit width.
    pub fn sized_param(&mut self, name: &str, default: Option<NodeId>, width: u32) -> NodeId {
        self.push_param(name, true, default, width, false, false)
    }

    pub fn string_param(&mut self, name: &str, default: Option<NodeId>) -> NodeId {
        self.push_param(name, true, default, INTEGER_WIDTH, true, false)
    }

    /// An overridable unpacked-array parameter; accepts `InitArray` values.
    pub fn array_param(&mut self, name: &str, default: Option<NodeId>) -> NodeId {
        self.push_param(name, true, default, INTEGER_WIDTH, false, true)
    }

    pub fn localparam(&mut self, name: &str, value: NodeId) -> NodeId {
        self.push_param(name, false, Some(value), INTEGER_WIDTH, false, false)
    }

    fn push_param(
        &mut self,
        name: &str,
        is_gparam: bool,
        value: Option<NodeId>,
        width: u32,
        is_string: bool,
        is_array: bool,
    ) -> NodeId {
        if is_gparam {
            self.set_flags(ModuleFlags::HAS_GPARAM);
        }
        self.push(NodeKind::Param(Param {
            name: name.to_string(),
            is_gparam,
            value,
            width,
            is_string,
            is_array,
            flags: ParamFlags::empty(),
        }))
    }

    pub fn param_type(&mut self, name: &str, default: Option<NodeId>, fwd: FwdType) -> NodeId {
        self.set_flags(ModuleFlags::HAS_GPARAM);
        self.push(NodeKind::ParamType(ParamType {
            name: name.to_string(),
            default,
            fwd,
            is_gparam: true,
        }))
    }

    /// An interface port of interface `iface`.
    pub fn iface_port(&mut self, name: &str, iface: ModuleId, modport: Option<&str>) -> NodeId {
        let dtype = self.iface_ref(iface, None, modport);
        self.push(NodeKind::IfacePort(IfacePort {
            name: name.to_string(),
            dtype,
        }))
    }

    pub fn var(&mut self, name: &str, dtype: NodeId) -> NodeId {
        self.push(NodeKind::Var {
            name: name.to_string(),
            dtype,
        })
    }

    /// A module instance with parameter overrides.
    pub fn cell(&mut self, name: &str, target: ModuleId, params: &[(&str, NodeId)]) -> NodeId {
        self.cell_with_pins(name, target, params, &[])
    }

    /// A module instance with parameter overrides and port connections.
    pub fn cell_with_pins(
        &mut self,
        name: &str,
        target: ModuleId,
        params: &[(&str, NodeId)],
        pins: &[(&str, NodeId)],
    ) -> NodeId {
        let params = self.pins(target, params);
        let pins = self.pins(target, pins);
        self.push(NodeKind::Cell(Cell {
            name: name.to_string(),
            target,
            params,
            pins,
            recursive: false,
        }))
    }

    /// An interface instance: the cell plus the variable naming it, whose
    /// type is an interface reference bound through the cell.
    pub fn interface_instance(
        &mut self,
        name: &str,
        iface: ModuleId,
        params: &[(&str, NodeId)],
    ) -> (NodeId, NodeId) {
        let cell = self.cell(name, iface, params);
        let dtype = self.iface_ref(iface, Some(cell), None);
        let var = self.var(name, dtype);
        (cell, var)
    }

    pub fn set_recursive(&mut self, cell: NodeId) {
        if let NodeKind::Cell(c) = &mut self.design.node_mut(cell).kind {
            c.recursive = true;
        }
    }

    /// A named generate block; declarations made inside `body` land in it.
    pub fn begin(&mut self, name: &str, body: impl FnOnce(&mut Self)) -> NodeId {
        self.scopes.push(Vec::new());
        body(self);
        let stmts = self.scopes.pop().unwrap_or_default();
        self.push(NodeKind::Begin {
            name: name.to_string(),
            stmts,
        })
    }

    fn pins(&self, target: ModuleId, bindings: &[(&str, NodeId)]) -> Vec<Pin> {
        bindings
            .iter()
            .map(|(name, expr)| {
                Pin::new(*name, self.resolve_formal(target, name), Some(*expr)).with_span(self.span)
            })
            .collect()
    }

    fn resolve_formal(&self, target: ModuleId, name: &str) -> Option<NodeId> {
        if target == self.id {
            self.scopes.first().and_then(|top| {
                top.iter()
                    .copied()
                    .find(|id| {
                        let node = self.design.node(*id);
                        node.is_gparam() && node.name() == Some(name)
                    })
            })
        } else {
            self.design.find_formal(target, name)
        }
    }

    /// Store the body and return the module.
    pub fn finish(mut self) -> ModuleId {
        let stmts = self.scopes.drain(..).next().unwrap_or_default();
        self.design.module_mut(self.id).stmts = stmts;
        self.id
    }
}
