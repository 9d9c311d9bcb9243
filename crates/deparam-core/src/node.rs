//! Nodes of the design graph.
//!
//! Every declaration, expression and type lives in the [`Design`](crate::Design)
//! node arena. Instantiation sites are the three kinds that carry parameter
//! pins: [`Cell`], [`ClassRef`] and [`IfaceRef`].

use bitflags::bitflags;

use crate::{Literal, ModuleId, NodeId, Span};

bitflags! {
    /// State bits on a value parameter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParamFlags: u8 {
        /// The value has been folded to a constant; never evaluate again.
        const CONST_PROPAGATED = 0x01;
        /// A specialization set this parameter to something other than its default.
        const OVERRIDDEN = 0x02;
    }
}

/// Forwarding constraint declared on a type parameter (`parameter type enum E`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FwdType {
    #[default]
    None,
    Enum,
    Struct,
    Union,
    Class,
    InterfaceClass,
}

impl FwdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FwdType::None => "",
            FwdType::Enum => "enum",
            FwdType::Struct => "struct",
            FwdType::Union => "union",
            FwdType::Class => "class",
            FwdType::InterfaceClass => "interface class",
        }
    }
}

/// A value parameter (`parameter` / `localparam`).
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    /// Overridable from an instantiation site (`parameter`, not `localparam`).
    pub is_gparam: bool,
    pub value: Option<NodeId>,
    /// Declared width; placeholder values after binding errors use it.
    pub width: u32,
    pub is_string: bool,
    /// Declared with an unpacked array type; accepts `InitArray` bindings.
    pub is_array: bool,
    pub flags: ParamFlags,
}

/// A type parameter (`parameter type T = logic`).
#[derive(Debug, Clone, PartialEq)]
pub struct ParamType {
    pub name: String,
    pub default: Option<NodeId>,
    pub fwd: FwdType,
    pub is_gparam: bool,
}

/// An interface port (`Bus.master bus`). `dtype` is an [`IfaceRef`] node, or an
/// unpacked array of one.
#[derive(Debug, Clone, PartialEq)]
pub struct IfacePort {
    pub name: String,
    pub dtype: NodeId,
}

/// A parameter or port connection on an instantiation site.
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    pub name: String,
    /// The formal this pin binds, in the *target* module.
    pub formal: Option<NodeId>,
    /// Bound expression; `None` is an explicit no-connect.
    pub expr: Option<NodeId>,
    pub span: Span,
}

impl Pin {
    pub fn new(name: impl Into<String>, formal: Option<NodeId>, expr: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            formal,
            expr,
            span: Span::default(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// A module or interface instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub name: String,
    pub target: ModuleId,
    pub params: Vec<Pin>,
    pub pins: Vec<Pin>,
    /// Instance of a recursive module; always specialized.
    pub recursive: bool,
}

/// A reference to a class type, possibly parameterized (`Node#(N-1)`).
#[derive(Debug, Clone, PartialEq)]
pub struct ClassRef {
    pub target: ModuleId,
    pub params: Vec<Pin>,
}

/// A reference to an interface type.
///
/// `cell` is set when the reference is bound through a specific interface
/// instance; the interface is then whatever that cell currently targets.
#[derive(Debug, Clone, PartialEq)]
pub struct IfaceRef {
    pub iface: Option<ModuleId>,
    pub cell: Option<NodeId>,
    pub modport: Option<String>,
    pub params: Vec<Pin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Not,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::LogicalAnd
                | BinaryOp::LogicalOr
        )
    }
}

/// What a node is.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // Formals
    Param(Param),
    ParamType(ParamType),
    IfacePort(IfacePort),

    // Declarations and statements
    Var { name: String, dtype: NodeId },
    Cell(Cell),
    /// Named generate block; only contributes to hierarchical names here.
    Begin { name: String, stmts: Vec<NodeId> },

    // Expressions
    Const(Literal),
    VarRef(NodeId),
    Unary { op: UnaryOp, arg: NodeId },
    Binary { op: BinaryOp, lhs: NodeId, rhs: NodeId },
    Cond { cond: NodeId, then: NodeId, els: NodeId },
    InitArray(Vec<NodeId>),

    // Types
    BasicType { name: String, signed: bool, range: Option<(i64, i64)> },
    PackedArray { left: i64, right: i64, sub: NodeId },
    UnpackArray { left: i64, right: i64, sub: NodeId },
    Struct { packed: bool, union: bool, members: Vec<(String, NodeId)> },
    Enum { name: String, base: NodeId },
    /// Reference to a type parameter; may chain through several.
    TypeRef(NodeId),
    ClassRef(ClassRef),
    IfaceRef(IfaceRef),
}

/// An arena node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Declared name of formals, declarations, cells and blocks.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Param(p) => Some(&p.name),
            NodeKind::ParamType(p) => Some(&p.name),
            NodeKind::IfacePort(p) => Some(&p.name),
            NodeKind::Var { name, .. } => Some(name),
            NodeKind::Cell(c) => Some(&c.name),
            NodeKind::Begin { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether this node is a formal that an instantiation site may bind.
    pub fn is_gparam(&self) -> bool {
        match &self.kind {
            NodeKind::Param(p) => p.is_gparam,
            NodeKind::ParamType(p) => p.is_gparam,
            NodeKind::IfacePort(_) => true,
            _ => false,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::BasicType { .. }
                | NodeKind::PackedArray { .. }
                | NodeKind::UnpackArray { .. }
                | NodeKind::Struct { .. }
                | NodeKind::Enum { .. }
                | NodeKind::TypeRef(_)
                | NodeKind::ClassRef(_)
                | NodeKind::IfaceRef(_)
        )
    }

    /// Parameter pins of an instantiation site.
    pub fn site_params(&self) -> Option<&[Pin]> {
        match &self.kind {
            NodeKind::Cell(c) => Some(&c.params),
            NodeKind::ClassRef(c) => Some(&c.params),
            NodeKind::IfaceRef(i) => Some(&i.params),
            _ => None,
        }
    }

    pub fn site_params_mut(&mut self) -> Option<&mut Vec<Pin>> {
        match &mut self.kind {
            NodeKind::Cell(c) => Some(&mut c.params),
            NodeKind::ClassRef(c) => Some(&mut c.params),
            NodeKind::IfaceRef(i) => Some(&mut i.params),
            _ => None,
        }
    }

    /// Every node handle held by this node, in a fixed order.
    ///
    /// Pin formals are excluded: they belong to the target module.
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let pins = |out: &mut Vec<NodeId>, pins: &[Pin]| {
            out.extend(pins.iter().filter_map(|p| p.expr));
        };
        match &self.kind {
            NodeKind::Param(p) => out.extend(p.value),
            NodeKind::ParamType(p) => out.extend(p.default),
            NodeKind::IfacePort(p) => out.push(p.dtype),
            NodeKind::Var { dtype, .. } => out.push(*dtype),
            NodeKind::Cell(c) => {
                pins(&mut out, &c.params);
                pins(&mut out, &c.pins);
            }
            NodeKind::Begin { stmts, .. } => out.extend(stmts.iter().copied()),
            NodeKind::Const(_) | NodeKind::VarRef(_) | NodeKind::TypeRef(_) => {}
            NodeKind::Unary { arg, .. } => out.push(*arg),
            NodeKind::Binary { lhs, rhs, .. } => out.extend([*lhs, *rhs]),
            NodeKind::Cond { cond, then, els } => out.extend([*cond, *then, *els]),
            NodeKind::InitArray(items) => out.extend(items.iter().copied()),
            NodeKind::BasicType { .. } => {}
            NodeKind::PackedArray { sub, .. } | NodeKind::UnpackArray { sub, .. } => {
                out.push(*sub)
            }
            NodeKind::Struct { members, .. } => out.extend(members.iter().map(|(_, m)| *m)),
            NodeKind::Enum { base, .. } => out.push(*base),
            NodeKind::ClassRef(c) => pins(&mut out, &c.params),
            NodeKind::IfaceRef(i) => pins(&mut out, &i.params),
        }
        out
    }

    /// Rewrite every owned child handle and every intra-module reference
    /// (`VarRef`, `TypeRef`, `IfaceRef::cell`) through `map`.
    ///
    /// Handles not present in `map` are left alone.
    pub fn remap(&mut self, map: &impl Fn(NodeId) -> Option<NodeId>) {
        let m = |id: &mut NodeId| {
            if let Some(new) = map(*id) {
                *id = new;
            }
        };
        let pins = |pins: &mut Vec<Pin>| {
            for pin in pins.iter_mut() {
                if let Some(expr) = pin.expr.as_mut() {
                    m(expr);
                }
            }
        };
        match &mut self.kind {
            NodeKind::Param(p) => p.value.iter_mut().for_each(&m),
            NodeKind::ParamType(p) => p.default.iter_mut().for_each(&m),
            NodeKind::IfacePort(p) => m(&mut p.dtype),
            NodeKind::Var { dtype, .. } => m(dtype),
            NodeKind::Cell(c) => {
                pins(&mut c.params);
                pins(&mut c.pins);
            }
            NodeKind::Begin { stmts, .. } => stmts.iter_mut().for_each(&m),
            NodeKind::Const(_) | NodeKind::BasicType { .. } => {}
            NodeKind::VarRef(target) | NodeKind::TypeRef(target) => m(target),
            NodeKind::Unary { arg, .. } => m(arg),
            NodeKind::Binary { lhs, rhs, .. } => {
                m(lhs);
                m(rhs);
            }
            NodeKind::Cond { cond, then, els } => {
                m(cond);
                m(then);
                m(els);
            }
            NodeKind::InitArray(items) => items.iter_mut().for_each(&m),
            NodeKind::PackedArray { sub, .. } | NodeKind::UnpackArray { sub, .. } => m(sub),
            NodeKind::Struct { members, .. } => members.iter_mut().for_each(|(_, id)| m(id)),
            NodeKind::Enum { base, .. } => m(base),
            NodeKind::ClassRef(c) => pins(&mut c.params),
            NodeKind::IfaceRef(i) => {
                i.cell.iter_mut().for_each(&m);
                pins(&mut i.params);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_skip_pin_formals() {
        let node = Node::new(
            NodeKind::Cell(Cell {
                name: "u0".into(),
                target: ModuleId::new(1),
                params: vec![Pin::new("W", Some(NodeId::new(99)), Some(NodeId::new(5)))],
                pins: vec![Pin::new("clk", Some(NodeId::new(98)), None)],
                recursive: false,
            }),
            Span::default(),
        );
        assert_eq!(node.children(), vec![NodeId::new(5)]);
    }

    #[test]
    fn remap_rewrites_refs_but_not_formals() {
        let mut node = Node::new(
            NodeKind::ClassRef(ClassRef {
                target: ModuleId::new(0),
                params: vec![Pin::new("N", Some(NodeId::new(1)), Some(NodeId::new(2)))],
            }),
            Span::default(),
        );
        node.remap(&|id| (id == NodeId::new(2) || id == NodeId::new(1)).then(|| NodeId::new(7)));
        let params = node.site_params().unwrap();
        assert_eq!(params[0].expr, Some(NodeId::new(7)));
        assert_eq!(params[0].formal, Some(NodeId::new(1)));
    }

    #[test]
    fn remap_follows_var_refs() {
        let mut node = Node::new(NodeKind::VarRef(NodeId::new(3)), Span::default());
        node.remap(&|id| Some(NodeId::new(id.index() as u32 + 10)));
        assert_eq!(node.kind, NodeKind::VarRef(NodeId::new(13)));
    }

    #[test]
    fn gparam_detection() {
        let local = Node::new(
            NodeKind::Param(Param {
                name: "L".into(),
                is_gparam: false,
                value: None,
                width: 32,
                is_string: false,
                is_array: false,
                flags: ParamFlags::empty(),
            }),
            Span::default(),
        );
        assert!(!local.is_gparam());
        assert_eq!(local.name(), Some("L"));
    }
}
