//! Hierarchy traversal
//!
//! Cells form a DAG. Everything here walks it explicitly: a cycle-checked
//! post-order over distinct cells (children before parents), a per-instance
//! walk carrying the cumulative transform, and the layer collector that
//! decides which layers a check run has to look at.

use indexmap::IndexSet;
use std::collections::HashSet;
use thiserror::Error;

use super::library::Library;
use super::technology::{LayerId, Technology};
use super::transform::Transform;
use super::types::{Cell, CellId};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HierarchyError {
    #[error("unknown cell `{cell}`")]
    UnknownCell { cell: CellId },
    #[error("cell `{cell}` instantiates unknown cell `{child}`")]
    UnknownChild { cell: CellId, child: CellId },
    #[error("instantiation cycle: {}", format_path(.path))]
    Cycle { path: Vec<CellId> },
}

fn format_path(path: &[CellId]) -> String {
    path.iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Depth-first orderer. `pending` holds the open recursion frames, so meeting
/// one of them again means a cycle.
struct PostOrder<'a> {
    lib: &'a Library,
    order: Vec<CellId>,
    seen: HashSet<CellId>,
    pending: Vec<CellId>,
}

impl<'a> PostOrder<'a> {
    fn push(&mut self, id: &CellId) -> Result<(), HierarchyError> {
        if self.seen.contains(id) {
            return Ok(());
        }
        if let Some(pos) = self.pending.iter().position(|p| p == id) {
            let mut path = self.pending[pos..].to_vec();
            path.push(id.clone());
            return Err(HierarchyError::Cycle { path });
        }
        let lib = self.lib;
        let cell = lib
            .cell(id)
            .ok_or_else(|| HierarchyError::UnknownCell { cell: id.clone() })?;
        self.pending.push(id.clone());
        for inst in &cell.instances {
            if lib.cell(&inst.cell).is_none() {
                return Err(HierarchyError::UnknownChild {
                    cell: id.clone(),
                    child: inst.cell.clone(),
                });
            }
            self.push(&inst.cell)?;
        }
        self.pending.pop();
        self.seen.insert(id.clone());
        self.order.push(id.clone());
        Ok(())
    }
}

/// Distinct cells reachable from `top`, each after every cell it instantiates.
/// `top` is always last.
pub fn post_order(lib: &Library, top: &CellId) -> Result<Vec<CellId>, HierarchyError> {
    let mut orderer = PostOrder {
        lib,
        order: Vec::new(),
        seen: HashSet::new(),
        pending: Vec::new(),
    };
    orderer.push(top)?;
    Ok(orderer.order)
}

/// Fold over the distinct cells under `top` in post-order, threading `acc`
/// through each call.
pub fn fold_post_order<A, E, F>(lib: &Library, top: &CellId, acc: A, mut f: F) -> Result<A, E>
where
    E: From<HierarchyError>,
    F: FnMut(A, &Cell) -> Result<A, E>,
{
    let order = post_order(lib, top)?;
    let mut acc = acc;
    for id in &order {
        // post_order only yields cells it resolved
        if let Some(cell) = lib.cell(id) {
            acc = f(acc, cell)?;
        }
    }
    Ok(acc)
}

/// Call `visit` once for `top` (identity transform) and once per instance
/// anywhere below it, with the cumulative transform from `top`.
pub fn for_each_instance<F>(lib: &Library, top: &CellId, mut visit: F) -> Result<(), HierarchyError>
where
    F: FnMut(&Cell, &Transform),
{
    // Rejects cycles before the unbounded expansion below
    post_order(lib, top)?;
    let cell = lib
        .cell(top)
        .ok_or_else(|| HierarchyError::UnknownCell { cell: top.clone() })?;
    expand(lib, cell, &Transform::identity(), &mut visit);
    Ok(())
}

fn expand<F>(lib: &Library, cell: &Cell, transform: &Transform, visit: &mut F)
where
    F: FnMut(&Cell, &Transform),
{
    visit(cell, transform);
    for inst in &cell.instances {
        if let Some(child) = lib.cell(&inst.cell) {
            let cumulative = transform.compose(&inst.placement.to_transform());
            expand(lib, child, &cumulative, visit);
        }
    }
}

/// Hierarchical layer collector: the technology layers actually present under
/// `top`, in technology order. Descent stops once every layer has been seen.
pub fn collect_layers(
    lib: &Library,
    top: &CellId,
    tech: &Technology,
) -> Result<IndexSet<LayerId>, HierarchyError> {
    let mut found: HashSet<LayerId> = HashSet::new();
    let mut visited: HashSet<CellId> = HashSet::new();
    let mut stack = vec![top.clone()];
    let all = tech.layers.len();

    while let Some(id) = stack.pop() {
        if found.len() >= all {
            break;
        }
        if !visited.insert(id.clone()) {
            continue;
        }
        let cell = lib
            .cell(&id)
            .ok_or_else(|| HierarchyError::UnknownCell { cell: id.clone() })?;
        for layer in cell.local_layers() {
            if tech.layer(layer).is_some() {
                found.insert(layer.clone());
            }
        }
        for inst in cell.instances.iter().rev() {
            stack.push(inst.cell.clone());
        }
    }

    Ok(tech
        .layers
        .iter()
        .filter(|l| found.contains(&l.id))
        .map(|l| l.id.clone())
        .collect())
}
