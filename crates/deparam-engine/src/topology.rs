//! Topology Repair Pass - fix module levels after specialization.
//!
//! Recursive templates may reuse a specialization that was created at a
//! shallower level than a later instantiator, so levels recorded during the
//! worklist traversal are not trustworthy. This pass runs once the worklist
//! is drained.
//!
//! ## Algorithm
//!
//! 1. For every listed module with instantiators, raise its level to one more
//!    than the deepest instantiator, fixing instantiators first (memoized)
//! 2. Stable-sort the module list by the repaired levels
//! 3. Delete generic class/interface templates that were never used as their
//!    own default instance; the used ones become ordinary modules
//!
//! ## Example
//!
//! ```text
//! Top(0) -> Node__N2(1) -> Node__N1(2)
//! Top(0) -> Node__N1(1)                  reused, recorded at level 1
//!
//! After repair: Top 0, Node__N2 1, Node__N1 2
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use deparam_core::{Design, ModuleFlags, ModuleId};

/// Child module -> modules instantiating it.
pub type ParentMap = FxHashMap<ModuleId, FxHashSet<ModuleId>>;

/// Repaired level of every module in `levels`.
///
/// A module with instantiators ends strictly below all of them; modules with
/// none keep their level. Self edges are ignored.
pub fn repair_levels(
    levels: &FxHashMap<ModuleId, u32>,
    parents: &ParentMap,
) -> FxHashMap<ModuleId, u32> {
    let mut repaired = levels.clone();
    let mut fixed = FxHashSet::default();
    let mut modules: Vec<ModuleId> = levels.keys().copied().collect();
    modules.sort();
    for module in modules {
        fix_level(module, parents, &mut repaired, &mut fixed);
    }
    repaired
}

fn fix_level(
    module: ModuleId,
    parents: &ParentMap,
    levels: &mut FxHashMap<ModuleId, u32>,
    fixed: &mut FxHashSet<ModuleId>,
) {
    if !fixed.insert(module) {
        return;
    }
    let Some(instantiators) = parents.get(&module) else {
        return;
    };
    let mut instantiators: Vec<ModuleId> = instantiators
        .iter()
        .copied()
        .filter(|p| *p != module)
        .collect();
    if instantiators.is_empty() {
        return;
    }
    instantiators.sort();

    let mut max_parent = 0;
    for parent in instantiators {
        fix_level(parent, parents, levels, fixed);
        max_parent = max_parent.max(levels.get(&parent).copied().unwrap_or(0));
    }
    if let Some(level) = levels.get_mut(&module) {
        if *level <= max_parent {
            trace!(module = %module, from = *level, to = max_parent + 1, "raised level");
            *level = max_parent + 1;
        }
    }
}

/// `order` stably sorted by level.
pub fn sort_by_level(order: &[ModuleId], levels: &FxHashMap<ModuleId, u32>) -> Vec<ModuleId> {
    let mut sorted = order.to_vec();
    sorted.sort_by_key(|m| levels.get(m).copied().unwrap_or(0));
    sorted
}

/// Output of the topology repair pass.
#[derive(Debug, Default)]
pub struct TopologyOutput {
    /// Modules whose level was raised.
    pub levels_raised: usize,
    /// Unused generic templates removed.
    pub modules_deleted: usize,
}

/// Topology repair pass over a finished design.
pub struct TopologyPass<'d> {
    design: &'d mut Design,
}

impl<'d> TopologyPass<'d> {
    /// Create a new topology repair pass.
    pub fn new(design: &'d mut Design) -> Self {
        Self { design }
    }

    /// Run the pass.
    ///
    /// `prune` lists the generic templates that may be deleted; those in
    /// `default_used` are kept and lose their generic flag instead.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(
        self,
        parents: &ParentMap,
        prune: &[ModuleId],
        default_used: &FxHashSet<ModuleId>,
    ) -> TopologyOutput {
        let mut output = TopologyOutput::default();

        let order = self.design.order().to_vec();
        let levels: FxHashMap<ModuleId, u32> = order
            .iter()
            .map(|&m| (m, self.design.module(m).level))
            .collect();
        let repaired = repair_levels(&levels, parents);

        for &module in &order {
            let level = repaired.get(&module).copied().unwrap_or(0);
            let entry = self.design.module_mut(module);
            if entry.level != level {
                entry.level = level;
                output.levels_raised += 1;
            }
        }
        self.design.set_order(sort_by_level(&order, &repaired));

        for &template in prune {
            if default_used.contains(&template) {
                self.design
                    .module_mut(template)
                    .flags
                    .remove(ModuleFlags::HAS_GPARAM);
            } else if !self.design.module(template).is_deleted() {
                debug!(template = %self.design.module(template).name, "removed unused template");
                self.design.remove_module(template);
                output.modules_deleted += 1;
            }
        }

        output
    }
}
