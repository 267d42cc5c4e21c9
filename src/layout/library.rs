//! Design library: cells, technologies and persisted metadata

use anyhow::Context;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::hierarchy::{self, HierarchyError};
use super::shapes;
use super::technology::Technology;
use super::transform::Placement;
use super::types::{ArcInst, Cell, CellId, LayerShape, PrimitiveNode, Shape};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    #[serde(default)]
    pub technologies: IndexMap<String, Technology>,
    #[serde(default)]
    pub cells: IndexMap<CellId, Cell>,
    /// Free-form string metadata saved with the design
    #[serde(default)]
    pub metadata: IndexMap<String, String>,
}

impl Library {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read library {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("Failed to parse library {}", path.display()))
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn add_technology(&mut self, tech: Technology) {
        self.technologies.insert(tech.name.clone(), tech);
    }

    pub fn add_cell(&mut self, cell: Cell) {
        self.cells.insert(cell.name.clone(), cell);
    }

    pub fn cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn cell_mut(&mut self, id: &CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id)
    }

    pub fn technology(&self, name: &str) -> Option<&Technology> {
        self.technologies.get(name)
    }

    pub fn technology_mut(&mut self, name: &str) -> Option<&mut Technology> {
        self.technologies.get_mut(name)
    }

    /// Cells that directly instantiate `id`
    pub fn parents_of(&self, id: &CellId) -> Vec<CellId> {
        self.cells
            .values()
            .filter(|c| c.instances.iter().any(|i| &i.cell == id))
            .map(|c| c.name.clone())
            .collect()
    }

    /// `id` plus every cell that transitively instantiates it
    pub fn self_and_ancestors(&self, id: &CellId) -> IndexSet<CellId> {
        let mut out = IndexSet::new();
        let mut queue = vec![id.clone()];
        while let Some(c) = queue.pop() {
            if out.insert(c.clone()) {
                queue.extend(self.parents_of(&c));
            }
        }
        out
    }

    /// Single-level equivalent of `top`: every primitive below it, expressed
    /// in `top` coordinates. Node geometry becomes polygons under an identity
    /// placement; arcs keep their width and end style.
    pub fn flatten(&self, top: &CellId) -> Result<Cell, HierarchyError> {
        let root = self
            .cell(top)
            .ok_or_else(|| HierarchyError::UnknownCell { cell: top.clone() })?;
        let mut flat = Cell::new(top.as_str(), &root.technology);

        hierarchy::for_each_instance(self, top, |cell, transform| {
            for node in &cell.nodes {
                let to_top = transform.compose(&node.placement.to_transform());
                let shapes = node
                    .shapes
                    .iter()
                    .map(|s| LayerShape {
                        layer: s.layer.clone(),
                        shape: Shape::Polygon {
                            points: shapes::shape_points(&s.shape)
                                .into_iter()
                                .map(|p| to_top.apply(p))
                                .collect(),
                        },
                    })
                    .collect();
                flat.nodes.push(PrimitiveNode {
                    id: node.id,
                    proto: node.proto.clone(),
                    placement: Placement::default(),
                    width: node.width,
                    height: node.height,
                    shapes,
                });
            }
            for arc in &cell.arcs {
                flat.arcs.push(ArcInst {
                    head: transform.apply(arc.head),
                    tail: transform.apply(arc.tail),
                    ..arc.clone()
                });
            }
        })?;

        Ok(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::types::{Instance, ObjectId};

    #[test]
    fn test_ancestors_and_json_roundtrip() {
        let mut lib = Library::new("lib");
        let leaf = Cell::new("leaf", "t");
        let mut top = Cell::new("top", "t");
        top.instances.push(Instance {
            id: ObjectId(1),
            cell: CellId::from("leaf"),
            placement: Placement::translate(5.0, 0.0),
        });
        lib.add_cell(leaf);
        lib.add_cell(top);
        lib.metadata.insert("k".to_string(), "v".to_string());

        let anc = lib.self_and_ancestors(&CellId::from("leaf"));
        assert!(anc.contains(&CellId::from("top")));
        assert_eq!(anc.len(), 2);

        let text = lib.to_json_string().unwrap();
        let back = Library::from_json_str(&text).unwrap();
        assert_eq!(back.cells.len(), 2);
        assert_eq!(back.metadata.get("k").map(String::as_str), Some("v"));
    }
}
