//! Polygon-tree (containment forest) of a merged layer
//!
//! Every ring of the merged geometry becomes one node. A node's children are
//! the rings it directly contains: a filled region's holes, and the islands
//! sitting inside a hole. Even depth is filled region, odd depth is hole.

use geo::{Area, Contains, InteriorPoint, LineString, Polygon};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;

use crate::layout::shapes::polygon_bounds;
use crate::layout::{Point, Rect};

/// Rings at or below this area are treated as degenerate
pub const AREA_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub ring: LineString<f64>,
    pub depth: usize,
    /// Area enclosed by the ring itself
    pub ring_area: f64,
    /// Ring area minus the ring areas of its direct children: the filled
    /// area for a region, the empty area for a hole
    pub area: f64,
    pub bounds: Rect,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl TreeNode {
    pub fn is_hole(&self) -> bool {
        self.depth % 2 == 1
    }

    /// Ring outline without the closing point
    pub fn points(&self) -> Vec<Point> {
        let mut pts: Vec<Point> = self.ring.coords().map(|c| Point::new(c.x, c.y)).collect();
        if pts.len() > 1 && pts.first() == pts.last() {
            pts.pop();
        }
        pts
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolygonTree {
    nodes: Vec<TreeNode>,
    roots: Vec<usize>,
}

type HoleEntry = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn ring_node(ring: &LineString<f64>, parent: Option<usize>) -> Option<TreeNode> {
    let ring_area = Polygon::new(ring.clone(), vec![]).unsigned_area();
    if ring_area <= AREA_EPSILON {
        return None;
    }
    let bounds = polygon_bounds(&Polygon::new(ring.clone(), vec![]))?;
    Some(TreeNode {
        ring: ring.clone(),
        depth: 0,
        ring_area,
        area: ring_area,
        bounds,
        parent,
        children: Vec::new(),
    })
}

impl PolygonTree {
    /// Build the forest from non-overlapping merged polygons
    pub fn build(polygons: &[Polygon<f64>]) -> Self {
        let mut nodes: Vec<TreeNode> = Vec::new();
        let mut exteriors: Vec<(usize, usize)> = Vec::new(); // (node, polygon)
        let mut holes: Vec<(usize, usize)> = Vec::new();

        for (pi, polygon) in polygons.iter().enumerate() {
            let Some(ext) = ring_node(polygon.exterior(), None) else {
                continue;
            };
            let ext_idx = nodes.len();
            nodes.push(ext);
            exteriors.push((ext_idx, pi));
            for interior in polygon.interiors() {
                if let Some(hole) = ring_node(interior, Some(ext_idx)) {
                    let hole_idx = nodes.len();
                    nodes.push(hole);
                    nodes[ext_idx].children.push(hole_idx);
                    holes.push((hole_idx, pi));
                }
            }
        }

        // Islands: an exterior ring lying inside some other polygon's hole
        // hangs under the smallest such hole.
        let index: RTree<HoleEntry> = RTree::bulk_load(
            holes
                .iter()
                .map(|&(h, _)| {
                    let b = nodes[h].bounds;
                    GeomWithData::new(Rectangle::from_corners([b.min.x, b.min.y], [b.max.x, b.max.y]), h)
                })
                .collect(),
        );
        let hole_owner: std::collections::HashMap<usize, usize> = holes.iter().copied().collect();
        for &(e, pi) in &exteriors {
            let Some(inside) = Polygon::new(nodes[e].ring.clone(), vec![]).interior_point() else {
                continue;
            };
            let best = index
                .locate_all_at_point(&[inside.x(), inside.y()])
                .map(|entry| entry.data)
                .filter(|h| hole_owner.get(h) != Some(&pi))
                .filter(|&h| Polygon::new(nodes[h].ring.clone(), vec![]).contains(&inside))
                .min_by(|&a, &b| nodes[a].ring_area.total_cmp(&nodes[b].ring_area));
            if let Some(h) = best {
                nodes[e].parent = Some(h);
                nodes[h].children.push(e);
            }
        }

        let roots: Vec<usize> = exteriors
            .iter()
            .map(|&(e, _)| e)
            .filter(|&e| nodes[e].parent.is_none())
            .collect();

        // Depths from the roots down; net areas from direct children
        let mut stack: Vec<(usize, usize)> = roots.iter().map(|&r| (r, 0)).collect();
        while let Some((n, depth)) = stack.pop() {
            nodes[n].depth = depth;
            for &c in &nodes[n].children {
                stack.push((c, depth + 1));
            }
        }
        for n in 0..nodes.len() {
            let inner: f64 = nodes[n].children.iter().map(|&c| nodes[c].ring_area).sum();
            nodes[n].area = (nodes[n].ring_area - inner).max(0.0);
        }

        Self { nodes, roots }
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &TreeNode {
        &self.nodes[index]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn max_depth(&self) -> Option<usize> {
        self.nodes.iter().map(|n| n.depth).max()
    }

    /// Node indices depth-first, children before their parent
    pub fn post_order(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, bool)> = self.roots.iter().rev().map(|&r| (r, false)).collect();
        while let Some((n, expanded)) = stack.pop() {
            if expanded {
                out.push(n);
            } else {
                stack.push((n, true));
                for &c in self.nodes[n].children.iter().rev() {
                    stack.push((c, false));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, LineString};

    fn square(x: f64, y: f64, size: f64) -> LineString<f64> {
        LineString::from(vec![
            coord! { x: x, y: y },
            coord! { x: x + size, y: y },
            coord! { x: x + size, y: y + size },
            coord! { x: x, y: y + size },
            coord! { x: x, y: y },
        ])
    }

    #[test]
    fn test_region_hole_island_depths() {
        let ring = Polygon::new(square(0.0, 0.0, 10.0), vec![square(2.0, 2.0, 6.0)]);
        let island = Polygon::new(square(4.0, 4.0, 2.0), vec![]);
        let tree = PolygonTree::build(&[island, ring]);

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.roots().len(), 1);
        assert_eq!(tree.max_depth(), Some(2));

        let root = tree.node(tree.roots()[0]);
        assert_eq!(root.depth, 0);
        assert!((root.area - 64.0).abs() < 1e-9);

        let hole = tree.nodes().iter().find(|n| n.depth == 1).unwrap();
        assert!(hole.is_hole());
        assert!((hole.area - 32.0).abs() < 1e-9);

        // children come before parents
        let order = tree.post_order();
        let pos = |d: usize| order.iter().position(|&i| tree.node(i).depth == d).unwrap();
        assert!(pos(2) < pos(1) && pos(1) < pos(0));
    }

    #[test]
    fn test_degenerate_rings_dropped() {
        let flat = Polygon::new(
            LineString::from(vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 5.0, y: 0.0 }, coord! { x: 0.0, y: 0.0 }]),
            vec![],
        );
        assert!(PolygonTree::build(&[flat]).is_empty());
    }
}
