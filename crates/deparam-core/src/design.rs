//! The design graph: a module list over a shared node arena.
//!
//! ## Structure
//!
//! ```text
//! Design
//! ├── nodes:   Vec<Node>     arena, indexed by NodeId, never compacted
//! ├── modules: Vec<Module>   arena, indexed by ModuleId
//! └── order:   Vec<ModuleId> the netlist module list downstream passes see
//! ```
//!
//! A module that is in the arena but not in `order` is *detached*: either a
//! pristine copy kept for later cloning, or a deleted module.

use bitflags::bitflags;
use rustc_hash::FxHashSet;

use crate::value_hash::hash_constants;
use crate::{Literal, ModuleId, Node, NodeId, NodeKind, Span, ValueHash};

bitflags! {
    /// State bits on a module.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModuleFlags: u8 {
        /// Declares overridable parameters; a generic template.
        const HAS_GPARAM = 0x01;
        /// Unreachable; never traversed.
        const DEAD = 0x02;
        /// Built as a separately compiled hierarchical block.
        const HIER_BLOCK = 0x04;
        /// Placeholder made by the front end while unrolling recursion.
        const RECURSIVE_CLONE = 0x08;
        /// Removed from the design.
        const DELETED = 0x10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Module,
    Interface,
    Class,
    Package,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Module => "module",
            ModuleKind::Interface => "interface",
            ModuleKind::Class => "class",
            ModuleKind::Package => "package",
        }
    }
}

/// A module, interface, class or package.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    /// Name before specialization; clones keep their template's.
    pub orig_name: String,
    pub kind: ModuleKind,
    /// Depth in the instance hierarchy (0 for roots).
    pub level: u32,
    pub stmts: Vec<NodeId>,
    pub flags: ModuleFlags,
    /// Some hierarchical path that instantiates this module, for diagnostics.
    pub some_instance_name: String,
    pub span: Span,
}

impl Module {
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        let name = name.into();
        Self {
            orig_name: name.clone(),
            name,
            kind,
            level: 0,
            stmts: Vec::new(),
            flags: ModuleFlags::empty(),
            some_instance_name: String::new(),
            span: Span::default(),
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn has_gparam(&self) -> bool {
        self.flags.contains(ModuleFlags::HAS_GPARAM)
    }

    pub fn is_dead(&self) -> bool {
        self.flags.contains(ModuleFlags::DEAD)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(ModuleFlags::DELETED)
    }

    pub fn is_hier_block(&self) -> bool {
        self.flags.contains(ModuleFlags::HIER_BLOCK)
    }
}

/// Owner of all modules and nodes.
#[derive(Debug, Clone, Default)]
pub struct Design {
    nodes: Vec<Node>,
    modules: Vec<Module>,
    order: Vec<ModuleId>,
}

impl Design {
    pub fn new() -> Self {
        Self::default()
    }

    // ==========================================================================
    // Nodes
    // ==========================================================================

    pub fn add_node(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, span));
        id
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Access a node. Panics on a handle from another design.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Pre-order walk of `root` and everything it owns.
    pub fn walk(&self, root: NodeId, f: &mut impl FnMut(NodeId)) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            f(id);
            let children = self.node(id).children();
            stack.extend(children.into_iter().rev());
        }
    }

    // ==========================================================================
    // Modules
    // ==========================================================================

    /// Add a module to the arena and to the end of the module list.
    pub fn add_module(&mut self, module: Module) -> ModuleId {
        let id = self.add_detached_module(module);
        self.order.push(id);
        id
    }

    /// Add a module to the arena without listing it.
    pub fn add_detached_module(&mut self, module: Module) -> ModuleId {
        let id = ModuleId::new(self.modules.len() as u32);
        self.modules.push(module);
        id
    }

    pub fn try_module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id.index())
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.index()]
    }

    /// The module list, in netlist order.
    pub fn order(&self) -> &[ModuleId] {
        &self.order
    }

    /// Replace the module list; used by the topology repair pass.
    pub fn set_order(&mut self, order: Vec<ModuleId>) {
        self.order = order;
    }

    /// Listed modules, in netlist order.
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> + '_ {
        self.order.iter().map(move |id| (*id, self.module(*id)))
    }

    /// Insert `id` into the module list directly after `anchor`, then past any
    /// following modules whose level does not exceed `id`'s level.
    pub fn insert_module_after(&mut self, anchor: ModuleId, id: ModuleId) {
        let level = self.module(id).level;
        let mut pos = match self.order.iter().position(|m| *m == anchor) {
            Some(p) => p + 1,
            None => self.order.len(),
        };
        while pos < self.order.len() && self.module(self.order[pos]).level <= level {
            pos += 1;
        }
        self.order.insert(pos, id);
    }

    /// Remove a module from the list and mark it deleted.
    pub fn remove_module(&mut self, id: ModuleId) {
        self.order.retain(|m| *m != id);
        self.module_mut(id).flags.insert(ModuleFlags::DELETED);
    }

    /// Find a listed module by name.
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.modules()
            .find(|(_, m)| m.name == name)
            .map(|(id, _)| id)
    }

    pub fn module_exists(&self, name: &str) -> bool {
        self.find_module(name).is_some()
    }

    /// Names of every listed module.
    pub fn module_names(&self) -> FxHashSet<String> {
        self.modules().map(|(_, m)| m.name.clone()).collect()
    }

    // ==========================================================================
    // Formals
    // ==========================================================================

    /// Top-level formals of a module (overridable params, type params and
    /// interface ports), in declaration order.
    pub fn formals(&self, module: ModuleId) -> Vec<NodeId> {
        self.module(module)
            .stmts
            .iter()
            .copied()
            .filter(|id| self.node(*id).is_gparam())
            .collect()
    }

    pub fn find_formal(&self, module: ModuleId, name: &str) -> Option<NodeId> {
        self.formals(module)
            .into_iter()
            .find(|id| self.node(*id).name() == Some(name))
    }

    /// Follow `TypeRef` chains (through type parameter values) to the first
    /// non-reference type. `None` when the chain ends in an unbound parameter
    /// or loops.
    pub fn skip_type_refs(&self, mut id: NodeId) -> Option<NodeId> {
        let mut seen = FxHashSet::default();
        loop {
            if !seen.insert(id) {
                return None;
            }
            match &self.node(id).kind {
                NodeKind::TypeRef(target) => id = *target,
                NodeKind::ParamType(p) => id = p.default?,
                _ => return Some(id),
            }
        }
    }

    /// The interface an `IfaceRef` currently denotes: the target of its cell
    /// when bound through one, else its declared interface.
    pub fn iface_via_cell(&self, iref: NodeId) -> Option<ModuleId> {
        match &self.node(iref).kind {
            NodeKind::IfaceRef(r) => match r.cell {
                Some(cell) => match &self.node(cell).kind {
                    NodeKind::Cell(c) => Some(c.target),
                    _ => r.iface,
                },
                None => r.iface,
            },
            _ => None,
        }
    }

    // ==========================================================================
    // Value identity
    // ==========================================================================

    /// Structural hash of a value or type subtree.
    pub fn structural_hash(&self, id: NodeId) -> ValueHash {
        let id = self.skip_type_refs(id).unwrap_or(id);
        let node = self.node(id);
        let leaf = match &node.kind {
            NodeKind::Const(lit) => ValueHash::leaf(hash_constants::LITERAL, &lit.to_string()),
            NodeKind::BasicType {
                name,
                signed,
                range,
            } => {
                let label = format!("{name}/{signed}/{range:?}");
                ValueHash::leaf(hash_constants::BASIC_TYPE, &label)
            }
            NodeKind::PackedArray { left, right, .. } => {
                ValueHash::leaf(hash_constants::ARRAY, &format!("p[{left}:{right}]"))
            }
            NodeKind::UnpackArray { left, right, .. } => {
                ValueHash::leaf(hash_constants::ARRAY, &format!("u[{left}:{right}]"))
            }
            NodeKind::Struct {
                packed,
                union,
                members,
            } => {
                let names: Vec<&str> = members.iter().map(|(n, _)| n.as_str()).collect();
                let label = format!("{packed}/{union}/{}", names.join(","));
                ValueHash::leaf(hash_constants::AGGREGATE, &label)
            }
            NodeKind::Enum { name, .. } => {
                ValueHash::leaf(hash_constants::AGGREGATE, &format!("enum {name}"))
            }
            NodeKind::ClassRef(c) => {
                ValueHash::leaf(hash_constants::REFERENCE, &self.module(c.target).name)
            }
            NodeKind::IfaceRef(_) => {
                let name = self
                    .iface_via_cell(id)
                    .map(|m| self.module(m).name.as_str())
                    .unwrap_or("");
                ValueHash::leaf(hash_constants::REFERENCE, name)
            }
            NodeKind::VarRef(target) => ValueHash::leaf(
                hash_constants::EXPR,
                self.node(*target).name().unwrap_or("ref"),
            ),
            NodeKind::Unary { op, .. } => ValueHash::leaf(hash_constants::EXPR, &format!("{op:?}")),
            NodeKind::Binary { op, .. } => ValueHash::leaf(hash_constants::EXPR, op.as_str()),
            other => ValueHash::leaf(hash_constants::EXPR, node_kind_label(other)),
        };
        let children: Vec<ValueHash> = match &node.kind {
            // References are identified by their target, not their pins' arena slots
            NodeKind::IfaceRef(_) | NodeKind::VarRef(_) => Vec::new(),
            _ => node
                .children()
                .into_iter()
                .map(|c| self.structural_hash(c))
                .collect(),
        };
        leaf.with_children(&children)
    }

    /// Canonical printable form of a value or type, used for value identity
    /// and diagnostics. Never empty.
    pub fn value_string(&self, id: NodeId) -> String {
        let id = self.skip_type_refs(id).unwrap_or(id);
        let node = self.node(id);
        let key = match &node.kind {
            NodeKind::Const(lit) => lit.ascii(),
            NodeKind::IfaceRef(r) => match self.iface_via_cell(id) {
                Some(m) => self.module(m).name.clone(),
                None => r.modport.clone().unwrap_or_else(|| "<iface>".to_string()),
            },
            NodeKind::Struct {
                union, members, ..
            } => {
                let mut key = String::from(if *union { " union {" } else { " struct {" });
                for (name, member) in members {
                    key += name;
                    key += " ";
                    key += &self.value_string(*member);
                    key += ";";
                }
                key += "}";
                key
            }
            NodeKind::BasicType {
                name,
                signed,
                range,
            } => {
                let mut key = name.clone();
                if *signed {
                    key += " signed";
                }
                if let Some((l, r)) = range {
                    key += &format!("[{l}:{r}]");
                }
                key
            }
            NodeKind::PackedArray { left, right, sub } => {
                format!("[{left}:{right}] {}", self.value_string(*sub))
            }
            NodeKind::UnpackArray { left, right, sub } => {
                format!("{}$[{left}:{right}]", self.value_string(*sub))
            }
            NodeKind::InitArray(items) => {
                let mut key = String::from("{");
                for item in items {
                    key += &self.value_string(*item);
                    key += ",";
                }
                key += "}";
                key
            }
            NodeKind::Enum { name, .. } => format!("enum {name}"),
            NodeKind::ClassRef(c) => self.module(c.target).name.clone(),
            NodeKind::VarRef(target) => self.node(*target).name().unwrap_or("ref").to_string(),
            other => node_kind_label(other).to_string(),
        };
        if key.is_empty() {
            node_kind_label(&node.kind).to_string()
        } else {
            key
        }
    }

    /// The literal held by a `Const` node.
    pub fn literal(&self, id: NodeId) -> Option<&Literal> {
        match &self.node(id).kind {
            NodeKind::Const(lit) => Some(lit),
            _ => None,
        }
    }
}

fn node_kind_label(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Param(_) => "param",
        NodeKind::ParamType(_) => "param type",
        NodeKind::IfacePort(_) => "interface port",
        NodeKind::Var { .. } => "var",
        NodeKind::Cell(_) => "cell",
        NodeKind::Begin { .. } => "begin",
        NodeKind::Const(_) => "const",
        NodeKind::VarRef(_) => "ref",
        NodeKind::Unary { .. } => "unary",
        NodeKind::Binary { .. } => "binary",
        NodeKind::Cond { .. } => "cond",
        NodeKind::InitArray(_) => "init array",
        NodeKind::BasicType { .. } => "basic",
        NodeKind::PackedArray { .. } => "packed array",
        NodeKind::UnpackArray { .. } => "unpacked array",
        NodeKind::Struct { .. } => "struct",
        NodeKind::Enum { .. } => "enum",
        NodeKind::TypeRef(_) => "type ref",
        NodeKind::ClassRef(_) => "class ref",
        NodeKind::IfaceRef(_) => "interface ref",
    }
}
