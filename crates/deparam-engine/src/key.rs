//! Specialization key construction.
//!
//! A key is the name the specialized module will carry. It is built from the
//! template name plus one fragment per overriding binding:
//!
//! ```text
//! Adder_ + _W16          -> "Adder__W16"
//! Fifo_  + _Tz1 + _Dz2   -> "Fifo__Tz1_Dz2"
//! <anything over 30>     -> "<template>__pi<n>"
//! ```
//!
//! Fragment labels (`W`, `T`, `D`, `WA` …) are assigned once per template from
//! its formals' first letters. Values that are not plain 32-bit integers are
//! replaced by `z<id>` where the id is drawn from a table keyed by the value's
//! structural hash, so equal values always collapse to the same id.
//!
//! Hierarchical blocks are named differently: every parameter (overridden or
//! default) goes into a long name which is hashed with SHA-256, and hex
//! prefixes of increasing length are probed until an unused name is found.

use std::collections::BTreeMap;

use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use sha2::{Digest, Sha256};
use tracing::trace;

use deparam_core::{Design, ModuleId, NodeId, NodeKind, ValueHash};

/// Builds specialization names. One per pass; all tables are pass-scoped.
#[derive(Debug)]
pub struct KeyBuilder {
    /// Formal -> positional label, filled per template on first use.
    small_names: FxHashMap<NodeId, String>,
    labelled: FxHashSet<ModuleId>,
    /// Value hash -> value id.
    value_ids: FxHashMap<ValueHash, u32>,
    next_value: u32,
    /// Long name -> chosen module name.
    long_names: FxHashMap<String, String>,
    next_long: u32,
    /// Hierarchical long name -> hashed name.
    hier_names: FxHashMap<String, String>,
    hier_allocated: FxHashSet<String>,
    threshold: usize,
    force_collision: bool,
}

impl KeyBuilder {
    pub fn new(threshold: usize, force_collision: bool) -> Self {
        Self {
            small_names: FxHashMap::default(),
            labelled: FxHashSet::default(),
            value_ids: FxHashMap::default(),
            next_value: 1,
            long_names: FxHashMap::default(),
            next_long: 0,
            hier_names: FxHashMap::default(),
            hier_allocated: FxHashSet::default(),
            threshold,
            force_collision,
        }
    }

    fn label_formals(&mut self, design: &Design, module: ModuleId) {
        if !self.labelled.insert(module) {
            return;
        }
        let mut used: FxHashMap<u8, u32> = FxHashMap::default();
        for &stmt in &design.module(module).stmts {
            let letter = match &design.node(stmt).kind {
                NodeKind::Param(p) if p.is_gparam => first_letter(&p.name),
                NodeKind::IfacePort(p) => first_letter(&p.name),
                NodeKind::ParamType(_) => b'T',
                _ => continue,
            };
            let count = used.entry(letter).or_insert(0);
            self.small_names.insert(stmt, small_name(letter, *count));
            *count += 1;
        }
    }

    /// Positional label of `formal` within `module`.
    pub fn small_name(&mut self, design: &Design, module: ModuleId, formal: NodeId) -> String {
        self.label_formals(design, module);
        self.small_names
            .get(&formal)
            .cloned()
            .unwrap_or_else(|| "Z".to_string())
    }

    /// `z<id>` for a value or type; structurally equal values share an id.
    pub fn value_number(&mut self, design: &Design, value: NodeId) -> String {
        let value = design.skip_type_refs(value).unwrap_or(value);
        let printed = design.value_string(value);
        let hash = if self.force_collision {
            ValueHash::of_str(&printed)
        } else {
            design.structural_hash(value).with_str(&printed)
        };
        let next = &mut self.next_value;
        let id = *self.value_ids.entry(hash).or_insert_with(|| {
            let id = *next;
            *next += 1;
            id
        });
        format!("z{id}")
    }

    /// Encoding of a folded literal value: plain 32-bit integers print as
    /// themselves (`-` becomes `n`), everything else goes through the id table.
    pub fn literal_value(&mut self, design: &Design, value: NodeId) -> String {
        match design.literal(value) {
            Some(lit) if lit.is_name_safe() => lit.ascii().replace('-', "n"),
            _ => self.value_number(design, value),
        }
    }

    /// The final module name for a long name.
    ///
    /// Names already taken by a listed module are never handed out: a short
    /// enough long name that collides is shortened too, and `__pi<n>` skips
    /// every `n` in use. Once chosen, a long name keeps its name for the pass.
    pub fn module_name(&mut self, design: &Design, template: &str, long_name: &str) -> String {
        if let Some(name) = self.long_names.get(long_name) {
            return name.clone();
        }
        let name = if long_name.len() <= self.threshold && !design.module_exists(long_name) {
            long_name.to_string()
        } else {
            let short = loop {
                self.next_long += 1;
                let short = format!("{template}__pi{}", self.next_long);
                if !design.module_exists(&short) {
                    break short;
                }
            };
            trace!(long_name, short = %short, "shortened specialization name");
            short
        };
        self.long_names.insert(long_name.to_string(), name.clone());
        name
    }

    /// Name of a hierarchical block specialization.
    ///
    /// `overrides` maps parameter names to folded values bound at the site;
    /// parameters not listed use the module's default.
    pub fn hier_block_name(
        &mut self,
        design: &Design,
        module: ModuleId,
        overrides: &FxHashMap<String, NodeId>,
    ) -> String {
        let m = design.module(module);
        let mut params: BTreeMap<&str, Option<NodeId>> = BTreeMap::new();
        for &stmt in &m.stmts {
            match &design.node(stmt).kind {
                NodeKind::Param(p) if p.is_gparam => {
                    let value = p.value.filter(|v| design.literal(*v).is_some());
                    params.insert(&p.name, value);
                }
                NodeKind::ParamType(p) => {
                    params.insert(&p.name, p.default.and_then(|d| design.skip_type_refs(d)));
                }
                _ => {}
            }
        }
        if params.is_empty() {
            return m.orig_name.clone();
        }

        let mut long_name = m.orig_name.clone();
        for (name, default) in params {
            let value = overrides.get(name).copied().or(default);
            long_name += "_";
            long_name += name;
            long_name += "=";
            if let Some(v) = value {
                match design.literal(v) {
                    Some(lit) => long_name += &lit.ascii(),
                    None => long_name += &design.value_string(v),
                }
            }
        }

        if let Some(name) = self.hier_names.get(&long_name) {
            return name.clone();
        }

        let mut hasher = Sha256::new();
        hasher.update(long_name.as_bytes());
        let name = loop {
            let digest = format!("{:x}", hasher.clone().finalize());
            if let Some(name) = self.free_prefix(design, &m.orig_name, &digest) {
                break name;
            }
            let salt: u64 = rand::thread_rng().r#gen();
            hasher.update(salt.to_string().as_bytes());
        };
        trace!(long_name = %long_name, name = %name, "hierarchical block name");
        self.hier_allocated.insert(name.clone());
        self.hier_names.insert(long_name, name.clone());
        name
    }

    /// First `<orig>_<prefix>` that is neither a module nor already allocated.
    fn free_prefix(&self, design: &Design, orig: &str, digest: &str) -> Option<String> {
        let mut base = orig.to_string();
        if !base.ends_with('_') {
            base.push('_');
        }
        (1..=digest.len())
            .map(|len| format!("{base}{}", &digest[..len]))
            .find(|name| !design.module_exists(name) && !self.hier_allocated.contains(name))
    }
}

fn first_letter(name: &str) -> u8 {
    let ch = name.bytes().next().unwrap_or(b'Z').to_ascii_uppercase();
    if ch.is_ascii_uppercase() { ch } else { b'Z' }
}

fn small_name(letter: u8, mut index: u32) -> String {
    let mut name = String::from(letter as char);
    while index != 0 {
        name.push((b'A' + (index % 25) as u8) as char);
        index /= 26;
    }
    name
}
