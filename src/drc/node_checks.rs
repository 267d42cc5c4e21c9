//! Minimum node size and forbidden node pass
//!
//! Runs per primitive node, independent of merged layer geometry. Used by the
//! orchestrator in place of the per-layer area tasks when area checking is
//! disabled.

use std::collections::HashSet;

use super::orchestrator::AbortFlag;
use super::rules::RuleSet;
use super::sink::ErrorSink;
use super::types::{Severity, TaskOutcome, Violation, ViolationKind};
use crate::layout::{Cell, ObjectId, PrimitiveNode, Rect};

/// Result of one node pass
#[derive(Debug, Clone, Default)]
pub struct NodePass {
    pub outcome: TaskOutcome,
    pub nodes_checked: usize,
    /// False when the abort flag stopped the pass early
    pub completed: bool,
}

/// Outline of a node's nominal size box in its cell's coordinates
fn node_outline(node: &PrimitiveNode) -> Rect {
    let (hw, hh) = (node.width * 0.5, node.height * 0.5);
    node.placement
        .to_transform()
        .apply_rect(&Rect::new(-hw, -hh, hw, hh))
}

#[allow(clippy::too_many_arguments)]
fn node_violation(
    cell: &Cell,
    node: &PrimitiveNode,
    kind: ViolationKind,
    severity: Severity,
    measured: f64,
    required: f64,
    rule_name: &str,
    detail: Option<&str>,
) -> Violation {
    let bounds = node_outline(node);
    Violation {
        kind,
        severity,
        cell: cell.name.clone(),
        layer: None,
        object: Some(node.id),
        geometry: bounds.corners().to_vec(),
        bounds,
        measured,
        required,
        rule_name: rule_name.to_string(),
        detail: detail.map(str::to_string),
    }
}

/// Check the nodes of `cells`, optionally only those in `only`. The abort
/// flag is polled before each node.
pub fn check_nodes<'a>(
    cells: impl IntoIterator<Item = &'a Cell>,
    only: Option<&HashSet<ObjectId>>,
    rules: &RuleSet,
    sink: &dyn ErrorSink,
    abort: &AbortFlag,
) -> NodePass {
    let mut pass = NodePass::default();

    for cell in cells {
        for node in &cell.nodes {
            if only.is_some_and(|ids| !ids.contains(&node.id)) {
                continue;
            }
            if abort.is_requested() {
                return pass;
            }
            pass.nodes_checked += 1;

            if let Some(rule) = rules.is_forbidden_node(&node.proto) {
                pass.outcome.count(rule.severity);
                sink.report(node_violation(
                    cell,
                    node,
                    ViolationKind::Forbidden,
                    rule.severity,
                    0.0,
                    0.0,
                    &rule.name,
                    Some(node.proto.as_str()),
                ));
            }

            if let Some(rule) = rules.node_size(&node.proto) {
                let dims = [("width", node.width, rule.width), ("height", node.height, rule.height)];
                for (axis, actual, required) in dims {
                    if actual < required {
                        pass.outcome.count(rule.severity);
                        sink.report(node_violation(
                            cell,
                            node,
                            ViolationKind::MinSize,
                            rule.severity,
                            actual,
                            required,
                            &rule.name,
                            Some(axis),
                        ));
                    }
                }
            }
        }
    }

    pass.completed = true;
    pass
}
