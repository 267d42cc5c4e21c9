// End-to-end checks of single-cell area, enclosed-area and notch behaviour,
// and of cooperative abort across layer tasks.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use hier_drc::drc::{
    AbortFlag, CheckScope, CollectingSink, ErrorSink, Orchestrator, RuleRepository, ValidityCache,
    Violation, ViolationKind,
};
use hier_drc::layout::{
    Cell, CellId, Foundry, Layer, LayerFunction, LayerId, LayerShape, Library, ObjectId, Placement,
    PrimitiveNode, Shape, Technology,
};

const LAYERS: [&str; 4] = ["metal-1", "metal-2", "metal-3", "metal-4"];
const WIDE_LAYERS: [&str; 8] = [
    "metal-1", "metal-2", "metal-3", "metal-4", "metal-5", "metal-6", "metal-7", "metal-8",
];

fn library(rules: &str) -> Library {
    library_with_layers(&LAYERS, rules)
}

fn library_with_layers(layers: &[&str], rules: &str) -> Library {
    let mut lib = Library::new("scenarios");
    lib.add_technology(Technology {
        name: "mocmos".to_string(),
        layers: layers
            .iter()
            .map(|id| Layer {
                id: LayerId::from(*id),
                function: LayerFunction::Metal,
                pseudo: false,
                gate: false,
            })
            .collect(),
        foundries: vec![Foundry {
            name: "MOSIS".to_string(),
            rules: rules.to_string(),
        }],
        selected_foundry: "MOSIS".to_string(),
        overrides: String::new(),
    });
    lib
}

fn rect_node(id: u64, layer: &str, x1: f64, y1: f64, x2: f64, y2: f64) -> PrimitiveNode {
    PrimitiveNode {
        id: ObjectId(id),
        proto: "pure-layer".to_string(),
        placement: Placement::default(),
        width: x2 - x1,
        height: y2 - y1,
        shapes: vec![LayerShape {
            layer: LayerId::from(layer),
            shape: Shape::rect(x1, y1, x2, y2),
        }],
    }
}

fn orchestrator(threads: usize) -> Orchestrator {
    let orch = Orchestrator::new(Arc::new(RuleRepository::new()), Arc::new(ValidityCache::new()));
    orch.set_number_of_threads(threads);
    orch
}

fn check(lib: &Library, cell: &str) -> (hier_drc::drc::CheckSummary, Vec<Violation>) {
    let sink = CollectingSink::new();
    let summary = orchestrator(2)
        .check_hierarchically(lib, &CellId::from(cell), CheckScope::Whole, &sink, &AbortFlag::new())
        .expect("check failed");
    (summary, sink.take())
}

#[test]
fn test_min_area_single_rectangle() {
    let mut lib = library("minarea metal-1 4 name=M1.A");
    let mut cell = Cell::new("a", "mocmos");
    cell.nodes.push(rect_node(1, "metal-1", 0.0, 0.0, 1.0, 3.0));
    lib.add_cell(cell);

    let (summary, violations) = check(&lib, "a");
    assert_eq!(summary.errors, 1);
    assert_eq!(violations.len(), 1);
    let v = &violations[0];
    assert_eq!(v.kind, ViolationKind::MinArea);
    assert_eq!(v.cell, CellId::from("a"));
    assert!((v.measured - 3.0).abs() < 1e-9);
    assert!((v.required - 4.0).abs() < 1e-9);
    assert_eq!(v.rule_name, "M1.A");
}

#[test]
fn test_enclosed_area_hole() {
    // 10x10 region with a 1x1 hole in the middle, built from four rectangles
    let mut lib = library("minarea metal-1 4 name=M1.A\nminenclosedarea metal-1 2 name=M1.E");
    let mut cell = Cell::new("ring", "mocmos");
    cell.nodes.push(rect_node(1, "metal-1", 0.0, 0.0, 10.0, 4.5));
    cell.nodes.push(rect_node(2, "metal-1", 0.0, 5.5, 10.0, 10.0));
    cell.nodes.push(rect_node(3, "metal-1", 0.0, 4.5, 4.5, 5.5));
    cell.nodes.push(rect_node(4, "metal-1", 5.5, 4.5, 10.0, 5.5));
    lib.add_cell(cell);

    let (summary, violations) = check(&lib, "ring");
    assert_eq!(summary.errors, 1);
    let v = &violations[0];
    assert_eq!(v.kind, ViolationKind::EnclosedArea);
    assert!((v.measured - 1.0).abs() < 1e-9);
    assert!((v.required - 2.0).abs() < 1e-9);
    assert!(violations.iter().all(|v| v.kind != ViolationKind::MinArea));
}

#[test]
fn test_inter_region_gap_is_not_a_notch() {
    let mut lib = library("spacing metal-1 metal-1 1.0 name=M1.S\nminarea metal-1 1 name=M1.A");
    let mut cell = Cell::new("gap", "mocmos");
    cell.nodes.push(rect_node(1, "metal-1", 0.0, 0.0, 2.0, 2.0));
    cell.nodes.push(rect_node(2, "metal-1", 2.5, 0.0, 4.5, 2.0));
    lib.add_cell(cell);

    let (summary, violations) = check(&lib, "gap");
    assert!(violations.is_empty(), "unexpected violations: {:?}", violations);
    assert_eq!(summary.layers_checked, 1);
    assert!(summary.passed());
}

#[test]
fn test_notch_inside_hole() {
    let mut lib = library("spacing metal-1 metal-1 1.0 name=M1.S");
    let mut cell = Cell::new("slot", "mocmos");
    // 0.5 wide, 4 tall slot through a 6x6 block
    cell.nodes.push(rect_node(1, "metal-1", 0.0, 0.0, 6.0, 1.0));
    cell.nodes.push(rect_node(2, "metal-1", 0.0, 5.0, 6.0, 6.0));
    cell.nodes.push(rect_node(3, "metal-1", 0.0, 1.0, 2.75, 5.0));
    cell.nodes.push(rect_node(4, "metal-1", 3.25, 1.0, 6.0, 5.0));
    lib.add_cell(cell);

    let (summary, violations) = check(&lib, "slot");
    assert_eq!(summary.errors, 1);
    assert_eq!(violations[0].kind, ViolationKind::Notch);
    assert_eq!(violations[0].detail.as_deref(), Some("width"));
    assert!((violations[0].measured - 0.5).abs() < 1e-9);
}

#[test]
fn test_depth_parity() {
    // Region, hole, island: everything is below threshold
    let mut lib = library("minarea metal-1 1000 name=M1.A\nminenclosedarea metal-1 1000 name=M1.E");
    let mut cell = Cell::new("nest", "mocmos");
    cell.nodes.push(rect_node(1, "metal-1", 0.0, 0.0, 10.0, 2.0));
    cell.nodes.push(rect_node(2, "metal-1", 0.0, 8.0, 10.0, 10.0));
    cell.nodes.push(rect_node(3, "metal-1", 0.0, 2.0, 2.0, 8.0));
    cell.nodes.push(rect_node(4, "metal-1", 8.0, 2.0, 10.0, 8.0));
    cell.nodes.push(rect_node(5, "metal-1", 4.0, 4.0, 6.0, 6.0));
    lib.add_cell(cell);

    let (_, violations) = check(&lib, "nest");
    let mut areas: Vec<(ViolationKind, i64)> = violations
        .iter()
        .map(|v| (v.kind, v.measured.round() as i64))
        .collect();
    areas.sort_by_key(|(k, a)| (*k as u8, *a));
    assert_eq!(
        areas,
        vec![
            (ViolationKind::MinArea, 4),
            (ViolationKind::MinArea, 64),
            (ViolationKind::EnclosedArea, 32),
        ]
    );
}

#[test]
fn test_layer_without_rules_is_skipped() {
    let mut lib = library("minarea metal-1 4 name=M1.A");
    let mut cell = Cell::new("a", "mocmos");
    cell.nodes.push(rect_node(1, "metal-2", 0.0, 0.0, 1.0, 1.0));
    lib.add_cell(cell);

    let (summary, violations) = check(&lib, "a");
    assert!(violations.is_empty());
    assert_eq!(summary.layers_total, 1);
    assert_eq!(summary.tasks_total, 0);
    assert_eq!(summary.empty_layers, vec![LayerId::from("metal-1")]);
}

/// Sink that raises the abort flag once violations from `after` distinct
/// layers have been seen.
struct AbortingSink {
    seen: Mutex<HashSet<LayerId>>,
    after: usize,
    abort: AbortFlag,
    inner: CollectingSink,
}

impl ErrorSink for AbortingSink {
    fn report(&self, violation: Violation) {
        let mut seen = self.seen.lock().unwrap();
        if let Some(layer) = &violation.layer {
            seen.insert(layer.clone());
        }
        if seen.len() >= self.after {
            self.abort.request();
        }
        self.inner.report(violation);
    }
}

#[test]
fn test_abort_after_second_layer() {
    let rules: Vec<String> = LAYERS
        .iter()
        .map(|l| format!("minarea {} 4 name={}.A", l, l))
        .collect();
    let mut lib = library(&rules.join("\n"));
    let mut cell = Cell::new("top", "mocmos");
    for (i, layer) in LAYERS.iter().enumerate() {
        cell.nodes.push(rect_node(i as u64 + 1, layer, 0.0, 0.0, 1.0, 1.0));
    }
    lib.add_cell(cell);

    let abort = AbortFlag::new();
    let sink = AbortingSink {
        seen: Mutex::new(HashSet::new()),
        after: 2,
        abort: abort.clone(),
        inner: CollectingSink::new(),
    };
    let orch = orchestrator(1);
    let top = CellId::from("top");
    let summary = orch
        .check_hierarchically(&lib, &top, CheckScope::Whole, &sink, &abort)
        .expect("check failed");

    assert!(summary.aborted);
    assert_eq!(summary.tasks_total, LAYERS.len());
    assert_eq!(summary.tasks_completed, 2);
    assert_eq!(summary.layers_checked, 2);
    assert_eq!(summary.errors, 2);
    assert_eq!(sink.inner.len(), 2);
    assert!(orch.validity().record(&top).is_none());
}

/// One `side` x `side` square per layer under a 4 unit minimum area
fn one_square_per_layer(side: f64) -> Library {
    let rules: Vec<String> = WIDE_LAYERS
        .iter()
        .map(|l| format!("minarea {} 4 name={}.A", l, l))
        .collect();
    let mut lib = library_with_layers(&WIDE_LAYERS, &rules.join("\n"));
    let mut cell = Cell::new("top", "mocmos");
    for (i, layer) in WIDE_LAYERS.iter().enumerate() {
        cell.nodes.push(rect_node(i as u64 + 1, layer, 0.0, 0.0, side, side));
    }
    lib.add_cell(cell);
    lib
}

#[test]
fn test_abort_before_parallel_run() {
    let lib = one_square_per_layer(3.0);
    let abort = AbortFlag::new();
    abort.request();
    let sink = CollectingSink::new();
    let orch = orchestrator(4);
    let top = CellId::from("top");
    let summary = orch
        .check_hierarchically(&lib, &top, CheckScope::Whole, &sink, &abort)
        .expect("check failed");

    assert!(summary.aborted);
    assert_eq!(summary.tasks_total, WIDE_LAYERS.len());
    assert_eq!(summary.tasks_completed, 0);
    assert!(sink.is_empty());
    // Clean design, but nothing ran, so nothing is recorded
    assert!(orch.validity().record(&top).is_none());

    abort.reset();
    let summary = orch
        .check_hierarchically(&lib, &top, CheckScope::Whole, &sink, &abort)
        .expect("check failed");
    assert!(summary.passed());
    assert_eq!(summary.tasks_completed, WIDE_LAYERS.len());
    assert!(orch.validity().record(&top).is_some());
}

#[test]
fn test_abort_mid_parallel_run() {
    let lib = one_square_per_layer(1.0);
    let abort = AbortFlag::new();
    let sink = AbortingSink {
        seen: Mutex::new(HashSet::new()),
        after: 2,
        abort: abort.clone(),
        inner: CollectingSink::new(),
    };
    let orch = orchestrator(2);
    let top = CellId::from("top");
    let summary = orch
        .check_hierarchically(&lib, &top, CheckScope::Whole, &sink, &abort)
        .expect("check failed");

    // Each worker may finish the task it had already started
    assert!(summary.aborted);
    assert_eq!(summary.tasks_total, WIDE_LAYERS.len());
    assert!(
        (2..=3).contains(&summary.tasks_completed),
        "completed {}",
        summary.tasks_completed
    );
    assert_eq!(summary.errors, summary.tasks_completed);
    assert_eq!(sink.inner.len(), summary.tasks_completed);
    assert!(orch.validity().record(&top).is_none());
}
