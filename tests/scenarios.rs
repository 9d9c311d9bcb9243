//! End-to-end specialization tests using `deparameterize` as the entry point.
//!
//! Each test builds a small design with `ModuleBuilder`, runs the full pass
//! with the reference evaluator and inspects the resulting module list.

use deparam::{
    BasicEvaluator, BinaryOp, Design, FwdType, HierBlockOption, Literal, Module, ModuleFlags,
    ModuleId, ModuleKind, NodeId, NodeKind, ParamConfig, ParamError, ParamOutput, deparameterize,
};

fn run(design: &mut Design, config: &ParamConfig) -> ParamOutput {
    deparameterize(design, &mut BasicEvaluator::new(), config).expect("pass aborted")
}

fn target(design: &Design, site: NodeId) -> ModuleId {
    match &design.node(site).kind {
        NodeKind::Cell(c) => c.target,
        NodeKind::ClassRef(c) => c.target,
        NodeKind::IfaceRef(r) => r.iface.expect("unbound interface reference"),
        other => panic!("not a site: {other:?}"),
    }
}

fn name_of(design: &Design, site: NodeId) -> String {
    design.module(target(design, site)).name.clone()
}

/// `Adder #(parameter WIDTH = 8)` at level 1.
fn adder(design: &mut Design) -> ModuleId {
    let mut b = design.build_module("Adder", ModuleKind::Module);
    let eight = b.int(8);
    b.param("WIDTH", Some(eight));
    b.set_level(1);
    b.finish()
}

/// Every (instantiator, instantiated) pair among listed modules.
fn edges(design: &Design) -> Vec<(ModuleId, ModuleId)> {
    let listed: Vec<ModuleId> = design.order().to_vec();
    let mut out = Vec::new();
    for &module in &listed {
        for &stmt in &design.module(module).stmts {
            design.walk(stmt, &mut |n| {
                let child = match &design.node(n).kind {
                    NodeKind::Cell(c) => c.target,
                    NodeKind::ClassRef(c) => c.target,
                    _ => return,
                };
                if child != module && listed.contains(&child) {
                    out.push((module, child));
                }
            });
        }
    }
    out
}

fn assert_depth_monotonic(design: &Design) {
    for (parent, child) in edges(design) {
        assert!(
            design.module(parent).level < design.module(child).level,
            "{} (level {}) instantiates {} (level {})",
            design.module(parent).name,
            design.module(parent).level,
            design.module(child).name,
            design.module(child).level,
        );
    }
}

fn is_identifier(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_defaults_reuse_template() {
    let mut design = Design::new();
    let adder = adder(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let a = top.cell("a", adder, &[]);
    let b = top.cell("b", adder, &[]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    assert_eq!(output.instances_created, 0);
    assert_eq!(target(&design, a), adder);
    assert_eq!(target(&design, b), adder);
}

#[test]
fn test_equal_overrides_share_clone() {
    let mut design = Design::new();
    let adder = adder(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let w1 = top.int(16);
    let a = top.cell("a", adder, &[("WIDTH", w1)]);
    let w2 = top.int(16);
    let b = top.cell("b", adder, &[("WIDTH", w2)]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    assert_eq!(output.instances_created, 1);
    assert_eq!(output.cache_hits, 1);
    assert_eq!(target(&design, a), target(&design, b));
    assert_eq!(name_of(&design, a), "Adder__W16");
}

#[test]
fn test_folding_precedes_keying() {
    let mut design = Design::new();
    let adder = adder(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let sixteen = top.int(16);
    let a = top.cell("a", adder, &[("WIDTH", sixteen)]);
    let eight = top.int(8);
    let also_eight = top.int(8);
    let sum = top.binary(BinaryOp::Add, eight, also_eight);
    let b = top.cell("b", adder, &[("WIDTH", sum)]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    assert_eq!(output.instances_created, 1);
    assert_eq!(target(&design, a), target(&design, b));
}

/// A module with 38 integer parameters, a string parameter and a type
/// parameter.
fn wide(design: &mut Design) -> ModuleId {
    let mut b = design.build_module("Wide", ModuleKind::Module);
    for i in 0..38 {
        let zero = b.int(0);
        b.param(&format!("P{i}"), Some(zero));
    }
    let mode = b.string("slow");
    b.string_param("SPEED", Some(mode));
    let logic = b.basic_type("logic", false, None);
    b.param_type("T", Some(logic), FwdType::None);
    b.set_level(1);
    b.finish()
}

fn wide_site(
    top: &mut deparam::ModuleBuilder<'_>,
    wide: ModuleId,
    name: &str,
    first: i128,
) -> NodeId {
    let mut values = Vec::new();
    for i in 0..38 {
        let value = if i == 0 { first } else { i + 1 };
        values.push((format!("P{i}"), top.int(value)));
    }
    let speed = top.string("fast");
    values.push(("SPEED".to_string(), speed));
    let ty = top.basic_type("logic", false, Some((7, 0)));
    values.push(("T".to_string(), ty));
    let bindings: Vec<(&str, NodeId)> = values.iter().map(|(n, v)| (n.as_str(), *v)).collect();
    top.cell(name, wide, &bindings)
}

#[test]
fn test_long_names_are_shortened_and_stable() {
    let mut design = Design::new();
    let wide = wide(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let a = wide_site(&mut top, wide, "a", 1);
    let b = wide_site(&mut top, wide, "b", 1);
    let c = wide_site(&mut top, wide, "c", 99);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    assert_eq!(output.instances_created, 2);

    let (na, nb, nc) = (name_of(&design, a), name_of(&design, b), name_of(&design, c));
    assert_eq!(na, nb);
    assert_ne!(na, nc);
    for name in [&na, &nc] {
        assert!(name.starts_with("Wide__pi"), "{name}");
        assert!(is_identifier(name), "{name}");
        assert!(name.len() <= 30);
    }
    let names: Vec<&str> = design.modules().map(|(_, m)| m.name.as_str()).collect();
    assert_eq!(names.iter().filter(|n| **n == na).count(), 1);
}

#[test]
fn test_shortened_names_avoid_existing_modules() {
    let mut design = Design::new();
    let wide = wide(&mut design);
    design.add_module(Module::new("Wide__pi1", ModuleKind::Module));
    let mut top = design.build_module("Top", ModuleKind::Module);
    let a = wide_site(&mut top, wide, "a", 1);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    let name = name_of(&design, a);
    assert_ne!(name, "Wide__pi1");
    assert!(name.starts_with("Wide__pi"), "{name}");
    for taken in ["Wide__pi1", name.as_str()] {
        let count = design.modules().filter(|(_, m)| m.name == taken).count();
        assert_eq!(count, 1, "{taken}");
    }
}

/// `class Node #(int N); Node #(N - 1) next; endclass`
fn node_class(design: &mut Design) -> ModuleId {
    let mut b = design.build_module("Node", ModuleKind::Class);
    let n = b.param("N", None);
    let own = b.id();
    let n_ref = b.var_ref(n);
    let one = b.int(1);
    let dec = b.binary(BinaryOp::Sub, n_ref, one);
    let next = b.class_ref(own, &[("N", dec)]);
    b.var("next", next);
    b.finish()
}

#[test]
fn test_recursion_is_bounded() {
    let mut design = Design::new();
    let node = node_class(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let fifty = top.int(50);
    let head = top.class_ref(node, &[("N", fifty)]);
    top.var("head", head);
    top.finish();

    let config = ParamConfig::new().with_max_recursion_depth(20);
    let output = run(&mut design, &config);
    assert!(
        output
            .errors
            .iter()
            .any(|e| matches!(e, ParamError::RecursionDepthExceeded { max: 20, .. }))
    );
    assert!(output.instances_created <= 21);
    assert!(output.instances_created >= 20);
    assert_eq!(name_of(&design, head), "Node__N50");
    assert!(design.module_exists("Node__N31"));
    assert!(!design.module_exists("Node__N29"));
    assert_depth_monotonic(&design);
}

fn core_design(design: &mut Design) -> ModuleId {
    let mut b = design.build_module("Core", ModuleKind::Module);
    let fifty = b.int(50);
    b.param("FREQ", Some(fifty));
    b.set_flags(ModuleFlags::HIER_BLOCK);
    b.set_level(1);
    b.finish()
}

#[test]
fn test_sub_run_matches_wrappers() {
    let mut design = Design::new();
    let core = core_design(&mut design);
    let mut wrapper = Module::new("Core_w100", ModuleKind::Module).with_level(1);
    wrapper.orig_name = "Core".to_string();
    wrapper.flags = ModuleFlags::DEAD;
    let wrapper = design.add_module(wrapper);

    let mut top = design.build_module("Top", ModuleKind::Module);
    let f100 = top.int(100);
    let c0 = top.cell("c0", core, &[("FREQ", f100)]);
    let f200 = top.int(200);
    let c1 = top.cell("c1", core, &[("FREQ", f200)]);
    top.finish();

    let config = ParamConfig::new().with_hier_blocks(vec![
        HierBlockOption::new("Core", "Core_w100").with_param("FREQ", Literal::integer(100)),
    ]);
    let output = run(&mut design, &config);
    assert_eq!(output.instances_created, 0);
    assert_eq!(output.wrappers_matched, 1);
    assert_eq!(target(&design, c0), wrapper);
    assert!(!design.module(wrapper).is_dead());
    assert_eq!(target(&design, c1), core);
    assert!(matches!(
        output.errors.as_slice(),
        [ParamError::WrapperNotFound { module, .. }] if module == "Core"
    ));
}

#[test]
fn test_hier_blocks_get_hashed_names() {
    let mut design = Design::new();
    let core = core_design(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let f100 = top.int(100);
    let a = top.cell("a", core, &[("FREQ", f100)]);
    let f100_again = top.int(100);
    let b = top.cell("b", core, &[("FREQ", f100_again)]);
    let c = top.cell("c", core, &[]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    let name = name_of(&design, a);
    assert!(name.starts_with("Core_") && name.len() > "Core_".len(), "{name}");
    assert!(is_identifier(&name));
    assert_eq!(target(&design, a), target(&design, b));
    assert_ne!(target(&design, c), target(&design, a));
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_explicit_default_equals_omitted() {
    let mut design = Design::new();
    let adder = adder(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let eight = top.int(8);
    let explicit = top.cell("explicit", adder, &[("WIDTH", eight)]);
    let omitted = top.cell("omitted", adder, &[]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert_eq!(output.instances_created, 0);
    assert_eq!(target(&design, explicit), target(&design, omitted));
}

#[test]
fn test_sized_default_value_equals_omitted() {
    let mut design = Design::new();
    let adder = adder(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let eight = top.lit(Literal::int(8, 8, false));
    let explicit = top.cell("explicit", adder, &[("WIDTH", eight)]);
    let omitted = top.cell("omitted", adder, &[]);
    let sixteen = top.lit(Literal::int(16, 8, false));
    let sized = top.cell("sized", adder, &[("WIDTH", sixteen)]);
    let plain = top.int(16);
    let r#unsized = top.cell("unsized", adder, &[("WIDTH", plain)]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    assert_eq!(output.instances_created, 1);
    assert_eq!(target(&design, explicit), adder);
    assert_eq!(target(&design, omitted), adder);
    assert_eq!(target(&design, sized), target(&design, r#unsized));
    assert_eq!(name_of(&design, sized), "Adder__W16");
}

#[test]
fn test_distinct_values_distinct_instances() {
    let mut design = Design::new();
    let adder = adder(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let sites: Vec<NodeId> = (9..14)
        .map(|w| {
            let value = top.int(w);
            top.cell(&format!("u{w}"), adder, &[("WIDTH", value)])
        })
        .collect();
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert_eq!(output.instances_created, sites.len());
    let mut names: Vec<String> = sites.iter().map(|s| name_of(&design, *s)).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), sites.len());
}

#[test]
fn test_levels_repaired_for_reused_instances() {
    let mut design = Design::new();
    let mut leaf = design.build_module("Leaf", ModuleKind::Module);
    let one = leaf.int(1);
    leaf.param("W", Some(one));
    leaf.set_level(1);
    let leaf = leaf.finish();

    let mut mid = design.build_module("Mid", ModuleKind::Module);
    let four = mid.int(4);
    mid.cell("leaf", leaf, &[("W", four)]);
    mid.set_level(1);
    let mid = mid.finish();

    let mut top = design.build_module("Top", ModuleKind::Module);
    top.cell("mid", mid, &[]);
    let four = top.int(4);
    let direct = top.cell("direct", leaf, &[("W", four)]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    assert_eq!(output.cache_hits, 1);
    assert!(output.levels_raised >= 1);
    let shared = target(&design, direct);
    assert_eq!(design.module(shared).level, 2);
    assert_depth_monotonic(&design);

    let levels: Vec<u32> = design.modules().map(|(_, m)| m.level).collect();
    assert!(levels.windows(2).all(|w| w[0] <= w[1]), "{levels:?}");
}

/// `interface Bus #(W = 8)`, and `module Dev(Bus b)`.
fn bus_and_dev(design: &mut Design) -> (ModuleId, ModuleId) {
    let mut bus = design.build_module("Bus", ModuleKind::Interface);
    let eight = bus.int(8);
    bus.param("W", Some(eight));
    bus.set_level(1);
    let bus = bus.finish();
    let mut dev = design.build_module("Dev", ModuleKind::Module);
    dev.iface_port("b", bus, None);
    dev.set_level(1);
    (bus, dev.finish())
}

#[test]
fn test_interface_specialization_reaches_ports() {
    let mut design = Design::new();
    let (bus, dev) = bus_and_dev(&mut design);

    let mut top = design.build_module("Top", ModuleKind::Module);
    let sixteen = top.int(16);
    let (bus_cell, var) = top.interface_instance("bus0", bus, &[("W", sixteen)]);
    let conn = top.var_ref(var);
    let d0 = top.cell_with_pins("d0", dev, &[], &[("b", conn)]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    let bus16 = target(&design, bus_cell);
    assert_eq!(design.module(bus16).name, "Bus__W16");

    let dev_clone = target(&design, d0);
    assert_ne!(dev_clone, dev);
    let port = design
        .find_formal(dev_clone, "b")
        .expect("clone keeps its port");
    let NodeKind::IfacePort(p) = &design.node(port).kind else {
        panic!("expected interface port");
    };
    let NodeKind::IfaceRef(r) = &design.node(p.dtype).kind else {
        panic!("expected interface reference");
    };
    assert_eq!(r.iface, Some(bus16));

    // The generic interface was only used specialized
    assert!(design.module(bus).is_deleted());
}

#[test]
fn test_interfaces_resolve_before_their_users() {
    let mut design = Design::new();
    let (bus, dev) = bus_and_dev(&mut design);

    let mut top = design.build_module("Top", ModuleKind::Module);
    let sixteen = top.int(16);
    let (bus_cell, var) = top.interface_instance("bus0", bus, &[("W", sixteen)]);
    let conn = top.var_ref(var);
    let d0 = top.cell_with_pins("d0", dev, &[], &[("b", conn)]);
    let top = top.finish();

    // The user comes first in the body
    let stmts = &mut design.module_mut(top).stmts;
    let pos = stmts.iter().position(|s| *s == d0).expect("d0 is a statement");
    let user = stmts.remove(pos);
    stmts.insert(0, user);

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.is_success(), "{:?}", output.errors);
    let bus16 = target(&design, bus_cell);
    assert_eq!(design.module(bus16).name, "Bus__W16");

    let dev_clone = target(&design, d0);
    assert_ne!(dev_clone, dev);
    let port = design
        .find_formal(dev_clone, "b")
        .expect("clone keeps its port");
    let NodeKind::IfacePort(p) = &design.node(port).kind else {
        panic!("expected interface port");
    };
    let NodeKind::IfaceRef(r) = &design.node(p.dtype).kind else {
        panic!("expected interface reference");
    };
    assert_eq!(r.iface, Some(bus16));
}

#[test]
fn test_interface_mismatch_is_reported() {
    let mut design = Design::new();
    let (_, dev) = bus_and_dev(&mut design);
    let other = design
        .build_module("Other", ModuleKind::Interface)
        .finish();
    design.module_mut(other).level = 1;

    let mut top = design.build_module("Top", ModuleKind::Module);
    let (_, var) = top.interface_instance("o", other, &[]);
    let conn = top.var_ref(var);
    let d0 = top.cell_with_pins("d0", dev, &[], &[("b", conn)]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(output.errors.iter().any(|e| matches!(
        e,
        ParamError::InterfaceMismatch { port, expected, actual, .. }
            if port == "b" && expected == "Bus" && actual == "Other"
    )));
    assert_eq!(target(&design, d0), dev);
}

#[test]
fn test_non_constant_binding_keeps_going() {
    let mut design = Design::new();
    let adder = adder(&mut design);
    let mut top = design.build_module("Top", ModuleKind::Module);
    let logic = top.basic_type("logic", false, None);
    let sig = top.var("sig", logic);
    let bad = top.var_ref(sig);
    top.cell("bad", adder, &[("WIDTH", bad)]);
    let sixteen = top.int(16);
    let good = top.cell("good", adder, &[("WIDTH", sixteen)]);
    top.finish();

    let output = run(&mut design, &ParamConfig::new());
    assert!(matches!(
        output.errors.as_slice(),
        [ParamError::ConstantRequired { name, .. }] if name == "WIDTH"
    ));
    assert_eq!(name_of(&design, good), "Adder__W16");
}
