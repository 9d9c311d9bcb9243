//! Specialization Pass - resolve every instantiation site in the design.
//!
//! The pass walks module bodies breadth-first by hierarchy level. Each body is
//! traversed once; the sites it contains are bound, keyed and resolved to a
//! default instance, a hierarchical wrapper, a cached specialization or a new
//! clone, and the resolved module is queued below its instantiator.
//!
//! ## Algorithm
//!
//! 1. Pick roots: level-0 modules, non-generic classes and packages
//! 2. Pop the shallowest queued module and traverse its body:
//!    - fold parameters in place, report parameters that never get a value
//!    - collect sites, remembering the generate path to each
//! 3. Resolve the collected sites, interface sites first
//! 4. Repeat until the worklist is empty
//! 5. Repair levels, reorder the module list and prune unused templates
//!
//! ## Example
//!
//! ```text
//! module Top; Adder #(16) a(); Adder b(); endmodule
//!
//! Top      level 0  root
//! Adder    level 1  default instance (site b)
//! Adder__W16 level 1  new clone (site a)
//! ```

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use deparam_core::{
    Design, EngineError, InternalError, ModuleFlags, ModuleId, ModuleKind, NodeId, NodeKind,
    ParamError, Span,
};

use crate::binder::{Binder, SiteBinding};
use crate::cache::{InstanceCache, Lookup};
use crate::clone::{CloneRequest, Cloner, relink_pins, relink_pins_by_name};
use crate::config::ParamConfig;
use crate::eval::ConstEvaluator;
use crate::hier::HierBlockRegistry;
use crate::key::KeyBuilder;
use crate::topology::{ParentMap, TopologyPass};

/// Output of the specialization pass.
#[derive(Debug, Default)]
pub struct ParamOutput {
    /// Specializations built.
    pub instances_created: usize,
    /// Sites resolved to an already built specialization.
    pub cache_hits: usize,
    /// Sites resolved to their template's default instance.
    pub default_instances: usize,
    /// Sites resolved to a hierarchical block wrapper.
    pub wrappers_matched: usize,
    /// Modules moved deeper by the topology repair.
    pub levels_raised: usize,
    /// Unused generic templates removed.
    pub modules_deleted: usize,
    /// Collected errors.
    pub errors: Vec<ParamError>,
}

impl ParamOutput {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum VisitState {
    #[default]
    Unvisited,
    Queued,
    Done,
}

/// A site found in a body, with the generate path leading to it.
#[derive(Debug)]
struct Site {
    node: NodeId,
    gen_path: String,
}

/// Specialization Pass - the worklist driver.
pub struct ParamPass<'a, E: ConstEvaluator + ?Sized> {
    design: &'a mut Design,
    evaluator: &'a mut E,
    keys: KeyBuilder,
    cache: InstanceCache,
    cloner: Cloner,
    hier: HierBlockRegistry,
    state: FxHashMap<ModuleId, VisitState>,
    /// (level, discovery sequence) -> module.
    worklist: BTreeMap<(u32, u64), ModuleId>,
    next_seq: u64,
    parents: ParentMap,
    /// Generic classes and interfaces that are deleted unless default-used.
    prune: Vec<ModuleId>,
    default_used: FxHashSet<ModuleId>,
    output: ParamOutput,
}

impl<'a, E: ConstEvaluator + ?Sized> ParamPass<'a, E> {
    /// Create a new specialization pass.
    pub fn new(
        design: &'a mut Design,
        evaluator: &'a mut E,
        config: &ParamConfig,
    ) -> Result<Self, InternalError> {
        Ok(Self {
            design,
            evaluator,
            keys: KeyBuilder::new(config.long_name_threshold, config.force_hash_collision),
            cache: InstanceCache::new(),
            cloner: Cloner::new(config.max_recursion_depth),
            hier: HierBlockRegistry::new(config)?,
            state: FxHashMap::default(),
            worklist: BTreeMap::new(),
            next_seq: 0,
            parents: ParentMap::default(),
            prune: Vec::new(),
            default_used: FxHashSet::default(),
            output: ParamOutput::default(),
        })
    }

    /// Run the pass to completion.
    ///
    /// User-facing problems are collected in the output; an internal
    /// inconsistency aborts the pass.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<ParamOutput, InternalError> {
        for (root, level) in self.select_roots() {
            self.enqueue(root, level);
        }

        while let Some((_, module)) = self.worklist.pop_first() {
            self.traverse(module)?;
        }

        let topology =
            TopologyPass::new(self.design).run(&self.parents, &self.prune, &self.default_used);
        self.output.levels_raised = topology.levels_raised;
        self.output.modules_deleted = topology.modules_deleted;
        Ok(self.output)
    }

    /// Roots with their queue level. Recursive placeholders become dead,
    /// generic classes and generic non-root interfaces become prune candidates.
    fn select_roots(&mut self) -> Vec<(ModuleId, u32)> {
        let mut roots = Vec::new();
        let order = self.design.order().to_vec();
        for id in order {
            let module = self.design.module_mut(id);
            if module.flags.contains(ModuleFlags::RECURSIVE_CLONE) {
                trace!(module = %module.name, "recursive placeholder marked dead");
                module.flags.insert(ModuleFlags::DEAD);
                continue;
            }
            if module.is_dead() {
                continue;
            }
            let root = match module.kind {
                ModuleKind::Class if module.has_gparam() => {
                    self.prune.push(id);
                    false
                }
                ModuleKind::Class | ModuleKind::Package => true,
                ModuleKind::Interface if module.has_gparam() && module.level > 0 => {
                    self.prune.push(id);
                    false
                }
                _ => module.level == 0,
            };
            if root {
                if module.some_instance_name.is_empty() {
                    module.some_instance_name = module.orig_name.clone();
                }
                roots.push((id, module.level));
            }
        }
        roots
    }

    fn enqueue(&mut self, module: ModuleId, level: u32) {
        let state = self.state.entry(module).or_default();
        if *state != VisitState::Unvisited {
            return;
        }
        *state = VisitState::Queued;
        self.worklist.insert((level, self.next_seq), module);
        self.next_seq += 1;
    }

    /// Traverse one body and resolve its sites.
    fn traverse(&mut self, module: ModuleId) -> Result<(), InternalError> {
        let state = self.state.entry(module).or_default();
        if *state == VisitState::Done {
            return Err(InternalError::Revisit {
                module: self.design.module(module).name.clone(),
            });
        }
        *state = VisitState::Done;
        if self.design.module(module).is_dead() || self.design.module(module).is_deleted() {
            return Ok(());
        }
        trace!(module = %self.design.module(module).name, "traversing body");

        if self.needs_pristine(module) {
            self.cloner.ensure_pristine(self.design, module);
        }

        let mut sites = Vec::new();
        let stmts = self.design.module(module).stmts.clone();
        for stmt in stmts {
            self.visit(module, stmt, "", &mut sites);
        }

        // Interfaces must be resolved before anything that connects to them
        let (ifaces, others): (Vec<Site>, Vec<Site>) =
            sites.into_iter().partition(|s| self.is_interface_site(s.node));
        for site in ifaces.into_iter().chain(others) {
            self.resolve_site(module, &site)?;
        }
        Ok(())
    }

    /// Post-order walk: fold parameters, check defaults, collect sites.
    fn visit(&mut self, module: ModuleId, id: NodeId, gen_path: &str, sites: &mut Vec<Site>) {
        let node = self.design.node(id);
        let children = node.children();
        let gen_path = match &node.kind {
            NodeKind::Begin { name, .. } => format!("{gen_path}.{name}"),
            _ => gen_path.to_string(),
        };
        for child in children {
            self.visit(module, child, &gen_path, sites);
        }

        let in_class = self.design.module(module).kind == ModuleKind::Class;
        let node = self.design.node(id);
        let span = node.span;
        match &node.kind {
            NodeKind::Param(p) => {
                if p.is_gparam && p.value.is_none() && !in_class {
                    self.output.errors.push(ParamError::ParamWithoutDefault {
                        span,
                        name: p.name.clone(),
                    });
                }
                let mut binder = Binder::new(&mut *self.evaluator, &mut self.keys);
                binder.constify_param(self.design, id, module, &mut self.output.errors);
            }
            NodeKind::ParamType(p) => {
                if p.is_gparam && p.default.is_none() && !in_class {
                    self.output.errors.push(ParamError::ParamTypeWithoutDefault {
                        span,
                        name: p.name.clone(),
                    });
                }
            }
            NodeKind::Cell(_) => sites.push(Site { node: id, gen_path }),
            NodeKind::ClassRef(c) => {
                if !c.params.is_empty() || self.design.module(c.target).has_gparam() {
                    sites.push(Site { node: id, gen_path });
                }
            }
            NodeKind::IfaceRef(r) => {
                if r.cell.is_none() && r.iface.is_some() && !r.params.is_empty() {
                    sites.push(Site { node: id, gen_path });
                }
            }
            _ => {}
        }
    }

    /// Templates with formals keep an unaltered copy before being elaborated
    /// in place. Specializations are never cloned again.
    fn needs_pristine(&self, module: ModuleId) -> bool {
        let m = self.design.module(module);
        m.has_gparam() || (m.name == m.orig_name && !self.design.formals(module).is_empty())
    }

    fn is_interface_site(&self, site: NodeId) -> bool {
        match &self.design.node(site).kind {
            NodeKind::Cell(c) => self.design.module(c.target).kind == ModuleKind::Interface,
            NodeKind::IfaceRef(_) => true,
            _ => false,
        }
    }

    fn site_target(&self, site: NodeId) -> Option<ModuleId> {
        match &self.design.node(site).kind {
            NodeKind::Cell(c) => Some(c.target),
            NodeKind::ClassRef(c) => Some(c.target),
            NodeKind::IfaceRef(r) => r.iface,
            _ => None,
        }
    }

    /// Resolve one site to the module it should instantiate.
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn resolve_site(&mut self, parent: ModuleId, site: &Site) -> Result<(), InternalError> {
        let Some(template) = self.site_target(site.node) else {
            return Ok(());
        };
        if self.design.module(template).is_deleted() {
            debug!(site = %site.node, "site targets a deleted module; skipped");
            return Ok(());
        }
        let span = self.design.node(site.node).span;
        let recursive =
            matches!(&self.design.node(site.node).kind, NodeKind::Cell(c) if c.recursive);

        let mut binding = {
            let mut binder = Binder::new(&mut *self.evaluator, &mut self.keys);
            binder.bind_site(self.design, site.node, template, &mut self.output.errors)
        };
        if recursive {
            binding.any_overrides = true;
        }

        let orig_name = self.design.module(template).orig_name.clone();
        let resolved = if self.hier.is_sub_run() && self.hier.is_hier_block(&orig_name) {
            match self
                .hier
                .find_by_params(self.design, template, &binding.values, span)
            {
                Ok(wrapper) => {
                    self.output.wrappers_matched += 1;
                    binding.any_overrides = true;
                    wrapper
                }
                Err(e) => {
                    self.output.errors.push(e);
                    return Ok(());
                }
            }
        } else if !binding.any_overrides {
            debug!(template = %self.design.module(template).name, "default instance");
            if self.needs_pristine(template) {
                self.cloner.ensure_pristine(self.design, template);
            }
            self.default_used.insert(template);
            self.output.default_instances += 1;
            template
        } else {
            match self.find_or_clone(parent, site.node, template, &binding, span)? {
                Some(module) => module,
                None => return Ok(()),
            }
        };

        if binding.any_overrides {
            self.retarget(site.node, resolved)?;
        }
        if let Some(params) = self.design.node_mut(site.node).site_params_mut() {
            params.clear();
        }
        if let NodeKind::Cell(c) = &mut self.design.node_mut(site.node).kind {
            c.recursive = false;
        }
        self.check_class_defaults(resolved, span);

        if self.state.get(&resolved).copied().unwrap_or_default() == VisitState::Unvisited {
            self.name_instance(parent, site, resolved);
            let level = self
                .design
                .module(resolved)
                .level
                .max(self.design.module(parent).level + 1);
            self.enqueue(resolved, level);
        }
        if resolved != parent {
            self.parents.entry(resolved).or_default().insert(parent);
        }
        Ok(())
    }

    /// Cache hit or new clone. `None` when the clone was refused; the error
    /// is already recorded.
    fn find_or_clone(
        &mut self,
        parent: ModuleId,
        site: NodeId,
        template: ModuleId,
        binding: &SiteBinding,
        span: Span,
    ) -> Result<Option<ModuleId>, InternalError> {
        let key = if self.design.module(template).is_hier_block() {
            binding.long_name.clone()
        } else {
            let name = self.design.module(template).name.clone();
            self.keys.module_name(self.design, &name, &binding.long_name)
        };

        match self.cache.lookup_or_reserve(&key)? {
            Lookup::Hit(module) => {
                debug!(key = %key, "cache hit");
                if let Some(info) = self.cache.get(&key).cloned() {
                    relink_pins(self.design, site, &info, &key)?;
                }
                self.output.cache_hits += 1;
                Ok(Some(module))
            }
            Lookup::Miss(reservation) => {
                let request = CloneRequest {
                    template,
                    name: key.clone(),
                    parent_level: self.design.module(parent).level,
                    site,
                    iface_relinks: &binding.iface_relinks,
                    span,
                };
                match self.cloner.clone_module(self.design, &request) {
                    Ok(info) => {
                        let module = info.module;
                        self.cache.insert(reservation, info)?;
                        self.output.instances_created += 1;
                        Ok(Some(module))
                    }
                    Err(EngineError::Param(e)) => {
                        self.cache.release(reservation);
                        self.output.errors.push(e);
                        Ok(None)
                    }
                    Err(EngineError::Internal(e)) => Err(e),
                }
            }
        }
    }

    /// Point the site at its resolved module.
    fn retarget(&mut self, site: NodeId, module: ModuleId) -> Result<(), InternalError> {
        let is_cell = match &mut self.design.node_mut(site).kind {
            NodeKind::Cell(c) => {
                c.target = module;
                true
            }
            NodeKind::ClassRef(c) => {
                c.target = module;
                false
            }
            NodeKind::IfaceRef(r) => {
                r.iface = Some(module);
                false
            }
            _ => false,
        };
        if is_cell {
            relink_pins_by_name(self.design, site, module)?;
        }
        Ok(())
    }

    fn check_class_defaults(&mut self, module: ModuleId, span: Span) {
        let m = self.design.module(module);
        if m.kind != ModuleKind::Class {
            return;
        }
        for formal in self.design.formals(module) {
            let error = match &self.design.node(formal).kind {
                NodeKind::Param(p) if p.value.is_none() => ParamError::ClassParamWithoutDefault {
                    span,
                    name: p.name.clone(),
                    class: m.name.clone(),
                },
                NodeKind::ParamType(p) if p.default.is_none() => {
                    ParamError::ClassParamTypeWithoutDefault {
                        span,
                        name: p.name.clone(),
                        class: m.name.clone(),
                    }
                }
                _ => continue,
            };
            self.output.errors.push(error);
        }
    }

    /// Record a hierarchical path for diagnostics on a newly reached module.
    fn name_instance(&mut self, parent: ModuleId, site: &Site, module: ModuleId) {
        let NodeKind::Cell(cell) = &self.design.node(site.node).kind else {
            return;
        };
        let parent = self.design.module(parent);
        let base = if parent.some_instance_name.is_empty() {
            &parent.orig_name
        } else {
            &parent.some_instance_name
        };
        let name = format!("{base}{}.{}", site.gen_path, cell.name);
        self.design.module_mut(module).some_instance_name = name;
    }
}
