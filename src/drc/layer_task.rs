//! Per-layer area check task
//!
//! Builds the merged geometry of one layer bottom-up through the hierarchy:
//! each cell's bucket absorbs its children's finished buckets under the
//! instance transform, then adds its own shapes. The top cell's polygon tree
//! is then walked children-first:
//! - filled regions (even depth) are checked against the minimum area
//! - holes (odd depth) against the minimum enclosed area, and their bounding
//!   box against the same-layer spacing as a notch approximation

use log::{debug, info};
use std::collections::HashMap;

use super::bucket::{FinishedBucket, GeometryBucket};
use super::polytree::{TreeNode, AREA_EPSILON};
use super::rules::LayerAreaRules;
use super::sink::ErrorSink;
use super::types::{Severity, TaskOutcome, Violation, ViolationKind};
use crate::layout::hierarchy::{self, HierarchyError};
use crate::layout::shapes::{arc_polygon, node_polygons};
use crate::layout::{Cell, CellId, LayerId, Library, Rect, Technology};

pub struct LayerCheckTask<'a> {
    lib: &'a Library,
    tech: &'a Technology,
    top: &'a CellId,
    layer: LayerId,
    rules: LayerAreaRules,
    /// Report only tree nodes whose bounds touch one of these rectangles
    scope: Option<Vec<Rect>>,
}

impl<'a> LayerCheckTask<'a> {
    pub fn new(
        lib: &'a Library,
        tech: &'a Technology,
        top: &'a CellId,
        layer: LayerId,
        rules: LayerAreaRules,
    ) -> Self {
        Self {
            lib,
            tech,
            top,
            layer,
            rules,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<Vec<Rect>>) -> Self {
        self.scope = scope;
        self
    }

    pub fn layer(&self) -> &LayerId {
        &self.layer
    }

    /// Merge the layer across the hierarchy and report every area violation
    pub fn run(self, sink: &dyn ErrorSink) -> Result<TaskOutcome, HierarchyError> {
        let start = std::time::Instant::now();
        let finished = self.merge_hierarchy()?;

        let mut outcome = TaskOutcome {
            layer: Some(self.layer.clone()),
            shapes: finished.shapes,
            tree_nodes: finished.tree.len(),
            ..Default::default()
        };

        if finished.is_empty() {
            info!("[DRC Layer] Nothing for layer {} found in {}", self.layer, self.top);
            return Ok(outcome);
        }

        for index in finished.tree.post_order() {
            let node = finished.tree.node(index);
            if node.area <= AREA_EPSILON || !self.in_scope(&node.bounds) {
                continue;
            }
            if node.is_hole() {
                self.check_hole(node, sink, &mut outcome);
            } else {
                self.check_region(node, sink, &mut outcome);
            }
        }

        debug!(
            "[DRC Layer] {} in {}: {} shapes, {} tree nodes, {} errors, {} warnings in {:?}",
            self.layer,
            self.top,
            outcome.shapes,
            outcome.tree_nodes,
            outcome.errors,
            outcome.warnings,
            start.elapsed()
        );
        Ok(outcome)
    }

    /// Finished bucket of the top cell. Each distinct cell is merged once;
    /// instances reuse the child's result.
    fn merge_hierarchy(&self) -> Result<FinishedBucket, HierarchyError> {
        let mut done = hierarchy::fold_post_order(
            self.lib,
            self.top,
            HashMap::new(),
            |mut done: HashMap<CellId, FinishedBucket>, cell| {
                let finished = self.merge_cell(cell, &done);
                done.insert(cell.name.clone(), finished);
                Ok::<_, HierarchyError>(done)
            },
        )?;

        done.remove(self.top).ok_or_else(|| HierarchyError::UnknownCell {
            cell: self.top.clone(),
        })
    }

    fn merge_cell(&self, cell: &Cell, done: &HashMap<CellId, FinishedBucket>) -> FinishedBucket {
        let mut bucket = GeometryBucket::new(self.layer.clone());

        for inst in &cell.instances {
            if let Some(child) = done.get(&inst.cell).filter(|c| !c.is_empty()) {
                bucket.absorb(child, &inst.placement.to_transform());
            }
        }
        for node in &cell.nodes {
            for (layer, polygon) in node_polygons(node) {
                if self.accepts(layer) {
                    bucket.add(polygon);
                }
            }
        }
        for arc in cell.arcs.iter().filter(|a| self.accepts(&a.layer)) {
            if let Some(polygon) = arc_polygon(arc) {
                bucket.add(polygon);
            }
        }

        bucket.merge_and_tree()
    }

    fn accepts(&self, layer: &LayerId) -> bool {
        self.tech.check_layer(layer).as_ref() == Some(&self.layer)
    }

    fn in_scope(&self, bounds: &Rect) -> bool {
        match &self.scope {
            Some(rects) => rects.iter().any(|r| r.intersects(bounds)),
            None => true,
        }
    }

    fn check_region(&self, node: &TreeNode, sink: &dyn ErrorSink, outcome: &mut TaskOutcome) {
        if let Some(rule) = &self.rules.min_area {
            if node.area < rule.value {
                self.report(
                    sink,
                    outcome,
                    node,
                    ViolationKind::MinArea,
                    rule.severity,
                    node.area,
                    rule.value,
                    &rule.name,
                    None,
                );
            }
        }
    }

    fn check_hole(&self, node: &TreeNode, sink: &dyn ErrorSink, outcome: &mut TaskOutcome) {
        if let Some(rule) = &self.rules.min_enclosed_area {
            if node.area < rule.value {
                self.report(
                    sink,
                    outcome,
                    node,
                    ViolationKind::EnclosedArea,
                    rule.severity,
                    node.area,
                    rule.value,
                    &rule.name,
                    None,
                );
            }
        }
        if let Some(rule) = &self.rules.notch {
            let dims = [("width", node.bounds.width()), ("height", node.bounds.height())];
            for (axis, size) in dims {
                if size < rule.value {
                    self.report(
                        sink,
                        outcome,
                        node,
                        ViolationKind::Notch,
                        rule.severity,
                        size,
                        rule.value,
                        &rule.name,
                        Some(axis),
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        sink: &dyn ErrorSink,
        outcome: &mut TaskOutcome,
        node: &TreeNode,
        kind: ViolationKind,
        severity: Severity,
        measured: f64,
        required: f64,
        rule_name: &str,
        detail: Option<&str>,
    ) {
        outcome.count(severity);
        sink.report(Violation {
            kind,
            severity,
            cell: self.top.clone(),
            layer: Some(self.layer.clone()),
            object: None,
            geometry: node.points(),
            bounds: node.bounds,
            measured,
            required,
            rule_name: rule_name.to_string(),
            detail: detail.map(str::to_string),
        });
    }
}
