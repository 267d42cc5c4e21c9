// Hierarchical merge behaviour: insertion-order independence, equivalence
// with the flattened design, and the JSON fixture library.
use std::sync::Arc;

use hier_drc::drc::{
    AbortFlag, CheckScope, CollectingSink, GeometryBucket, Orchestrator, RuleRepository,
    ValidityCache, Violation, ViolationKind,
};
use hier_drc::layout::shapes::polygon_from_points;
use hier_drc::layout::{
    ArcInst, Cell, CellId, Foundry, Instance, Layer, LayerFunction, LayerId, LayerShape, LineEnd,
    Library, ObjectId, Placement, Point, PrimitiveNode, Shape, Technology,
};

fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> geo::Polygon<f64> {
    polygon_from_points(&[
        Point::new(x1, y1),
        Point::new(x2, y1),
        Point::new(x2, y2),
        Point::new(x1, y2),
    ])
    .expect("degenerate rectangle")
}

/// (polygon count, tree size, sorted node areas) of a merged bucket
fn merged_shape(order: &[usize], shapes: &[geo::Polygon<f64>]) -> (usize, usize, Vec<i64>) {
    let mut bucket = GeometryBucket::new(LayerId::from("metal-1"));
    for &i in order {
        bucket.add(shapes[i].clone());
    }
    let done = bucket.merge_and_tree();
    let mut areas: Vec<i64> = done
        .tree
        .nodes()
        .iter()
        .map(|n| (n.area * 1000.0).round() as i64)
        .collect();
    areas.sort();
    (done.polygons.len(), done.tree.len(), areas)
}

#[test]
fn test_merge_is_insertion_order_independent() {
    let shapes = vec![
        rect(0.0, 0.0, 10.0, 2.0),
        rect(0.0, 8.0, 10.0, 10.0),
        rect(0.0, 0.0, 2.0, 10.0),
        rect(8.0, 0.0, 10.0, 10.0),
        rect(4.0, 4.0, 6.0, 6.0),
        rect(20.0, 0.0, 21.0, 5.0),
        rect(20.5, 4.0, 25.0, 5.0),
        rect(30.0, 30.0, 31.0, 31.0),
    ];
    let forward: Vec<usize> = (0..shapes.len()).collect();
    let reverse: Vec<usize> = forward.iter().rev().copied().collect();
    let interleaved = vec![4, 0, 7, 3, 5, 1, 6, 2];

    let expected = merged_shape(&forward, &shapes);
    println!("Merged: {:?}", expected);
    assert_eq!(expected.0, 4);
    assert_eq!(merged_shape(&reverse, &shapes), expected);
    assert_eq!(merged_shape(&interleaved, &shapes), expected);
}

fn technology() -> Technology {
    Technology {
        name: "mocmos".to_string(),
        layers: vec![Layer {
            id: LayerId::from("metal-1"),
            function: LayerFunction::Metal,
            pseudo: false,
            gate: false,
        }],
        foundries: vec![Foundry {
            name: "MOSIS".to_string(),
            rules: "minarea metal-1 2.5 name=M1.A\nminenclosedarea metal-1 20 name=M1.E".to_string(),
        }],
        selected_foundry: "MOSIS".to_string(),
        overrides: String::new(),
    }
}

fn leaf(name: &str, w: f64, h: f64) -> Cell {
    let mut cell = Cell::new(name, "mocmos");
    cell.nodes.push(PrimitiveNode {
        id: ObjectId(1),
        proto: "metal-1-node".to_string(),
        placement: Placement::default(),
        width: w,
        height: h,
        shapes: vec![LayerShape {
            layer: LayerId::from("metal-1"),
            shape: Shape::rect(0.0, 0.0, w, h),
        }],
    });
    cell
}

fn instance(id: u64, cell: &str, placement: Placement) -> Instance {
    Instance {
        id: ObjectId(id),
        cell: CellId::from(cell),
        placement,
    }
}

fn placed(dx: f64, dy: f64, rotation: f64, mirror_x: bool) -> Placement {
    Placement { dx, dy, rotation, mirror_x }
}

/// Rotated, mirrored and abutting instances, a ring of bars around a hole,
/// and a wire in the top cell.
fn hierarchical_library() -> Library {
    let mut lib = Library::new("composition");
    lib.add_technology(technology());
    lib.add_cell(leaf("stub", 2.0, 1.0));
    lib.add_cell(leaf("bar", 6.0, 1.0));

    let mut ring = Cell::new("ring", "mocmos");
    ring.instances.push(instance(1, "bar", placed(0.0, 0.0, 0.0, false)));
    ring.instances.push(instance(2, "bar", placed(0.0, 5.0, 0.0, false)));
    ring.instances.push(instance(3, "bar", placed(1.0, 0.0, 90.0, false)));
    ring.instances.push(instance(4, "bar", placed(6.0, 0.0, 90.0, false)));
    lib.add_cell(ring);

    let mut top = Cell::new("top", "mocmos");
    top.instances.push(instance(10, "stub", placed(0.0, 0.0, 0.0, false)));
    top.instances.push(instance(11, "stub", placed(2.0, 0.0, 90.0, false)));
    top.instances.push(instance(12, "stub", placed(10.0, 10.0, 0.0, true)));
    top.instances.push(instance(13, "ring", placed(30.0, 0.0, 0.0, false)));
    top.arcs.push(ArcInst {
        id: ObjectId(20),
        proto: "metal-1-wire".to_string(),
        layer: LayerId::from("metal-1"),
        head: Point::new(20.0, 0.0),
        tail: Point::new(22.0, 0.0),
        width: 1.0,
        end: LineEnd::Butt,
    });
    lib.add_cell(top);
    lib
}

fn violation_keys(violations: &[Violation]) -> Vec<(ViolationKind, i64, [i64; 4])> {
    let mut keys: Vec<_> = violations
        .iter()
        .map(|v| {
            let b = v.bounds.to_array().map(|c| (c * 1000.0).round() as i64);
            (v.kind, (v.measured * 1000.0).round() as i64, b)
        })
        .collect();
    keys.sort_by_key(|(k, m, b)| (*k as u8, *m, *b));
    keys
}

fn run(lib: &Library, cell: &str) -> Vec<Violation> {
    let orch = Orchestrator::new(Arc::new(RuleRepository::new()), Arc::new(ValidityCache::new()));
    let sink = CollectingSink::new();
    orch.check_hierarchically(lib, &CellId::from(cell), CheckScope::Whole, &sink, &AbortFlag::new())
        .expect("check failed");
    sink.take()
}

#[test]
fn test_hierarchy_matches_flattened() {
    let lib = hierarchical_library();
    let hierarchical = run(&lib, "top");

    let mut flat_lib = lib.clone();
    let flat = lib.flatten(&CellId::from("top")).expect("flatten failed");
    assert!(flat.instances.is_empty());
    flat_lib.cells.insert(CellId::from("top"), flat);
    let flattened = run(&flat_lib, "top");

    let keys = violation_keys(&hierarchical);
    println!("Hierarchical violations: {:?}", keys);
    assert_eq!(keys, violation_keys(&flattened));

    // mirrored stub and wire are too small; the 4x4 hole inside the ring too
    assert_eq!(hierarchical.iter().filter(|v| v.kind == ViolationKind::MinArea).count(), 2);
    let hole = hierarchical
        .iter()
        .find(|v| v.kind == ViolationKind::EnclosedArea)
        .expect("missing enclosed area violation");
    assert!((hole.measured - 16.0).abs() < 1e-9);
    assert!(hierarchical.iter().all(|v| v.cell == CellId::from("top")));
}

#[test]
fn test_shared_child_checked_in_isolation() {
    let lib = hierarchical_library();
    // A lone stub is 2 square units, below 2.5
    let stub = run(&lib, "stub");
    assert_eq!(stub.len(), 1);
    assert_eq!(stub[0].cell, CellId::from("stub"));
}

#[test]
fn test_fixture_library() {
    let lib = Library::from_file("tests/fixtures/inverter_pair.json").expect("Failed to load fixture");
    assert_eq!(lib.cells.len(), 2);

    // Alone, the inverter's poly (plain plus gate poly) is too small
    let inv = run(&lib, "inv");
    assert_eq!(inv.len(), 1, "inv violations: {:?}", inv);
    assert_eq!(inv[0].layer, Some(LayerId::from("polysilicon-1")));
    assert!((inv[0].measured - 2.0).abs() < 1e-9);

    // Two abutting inverters merge into large enough shapes
    assert!(run(&lib, "top").is_empty());

    // Switching foundry changes the rule set
    let mut tsmc = lib.clone();
    tsmc.technology_mut("mocmos").unwrap().selected_foundry = "TSMC".to_string();
    let top = run(&tsmc, "top");
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].rule_name, "T.M1.A");
}
