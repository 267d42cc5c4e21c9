//! Shape expansion into `geo` polygons
//!
//! Rectangles and polygons map directly. Arcs are stroked into a single ring
//! following their end style (butt, square or round caps), in the same way
//! wire strokes are built for rendering.

use geo::{AffineOps, BoundingRect, Coord, LineString, Polygon};
use std::collections::HashSet;
use std::f64::consts::PI;

use super::library::Library;
use super::technology::LayerId;
use super::transform::Transform;
use super::types::{ArcInst, CellId, GeometryRef, LineEnd, Point, PrimitiveNode, Rect, Shape};

/// Number of segments used for each semicircular round cap
const ROUND_CAP_SEGMENTS: u32 = 16;

/// Points of a shape's outline (unclosed)
pub fn shape_points(shape: &Shape) -> Vec<Point> {
    match shape {
        Shape::Rect { min, max } => Rect::new(min.x, min.y, max.x, max.y).corners().to_vec(),
        Shape::Polygon { points } => {
            let mut pts = points.clone();
            if pts.len() > 1 && pts.first() == pts.last() {
                pts.pop();
            }
            pts
        }
    }
}

/// Build a polygon from an outline, `None` for fewer than three distinct points
pub fn polygon_from_points(points: &[Point]) -> Option<Polygon<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(points.len() + 1);
    for p in points {
        let c = Coord { x: p.x, y: p.y };
        if coords.last() != Some(&c) {
            coords.push(c);
        }
    }
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return None;
    }
    Some(Polygon::new(LineString::from(coords), vec![]))
}

pub fn shape_polygon(shape: &Shape) -> Option<Polygon<f64>> {
    polygon_from_points(&shape_points(shape))
}

/// The node's layer shapes as polygons in its cell's coordinates
pub fn node_polygons(node: &PrimitiveNode) -> impl Iterator<Item = (&LayerId, Polygon<f64>)> + '_ {
    let placement = node.placement.to_transform().to_geo();
    node.shapes.iter().filter_map(move |s| {
        shape_polygon(&s.shape).map(|p| (&s.layer, p.affine_transform(&placement)))
    })
}

/// Stroke an arc into a polygon, `None` when it has no area
pub fn arc_polygon(arc: &ArcInst) -> Option<Polygon<f64>> {
    if arc.width <= 0.0 {
        return None;
    }
    let half = arc.width * 0.5;
    let dx = arc.tail.x - arc.head.x;
    let dy = arc.tail.y - arc.head.y;
    let len = (dx * dx + dy * dy).sqrt();
    let (ux, uy) = if len < 1e-12 { (1.0, 0.0) } else { (dx / len, dy / len) };
    // Left-hand normal
    let (nx, ny) = (-uy, ux);

    match arc.end {
        LineEnd::Butt | LineEnd::Square => {
            let ext = if arc.end == LineEnd::Square { half } else { 0.0 };
            if len < 1e-12 && ext == 0.0 {
                return None;
            }
            let h = Point::new(arc.head.x - ux * ext, arc.head.y - uy * ext);
            let t = Point::new(arc.tail.x + ux * ext, arc.tail.y + uy * ext);
            polygon_from_points(&[
                Point::new(h.x + nx * half, h.y + ny * half),
                Point::new(h.x - nx * half, h.y - ny * half),
                Point::new(t.x - nx * half, t.y - ny * half),
                Point::new(t.x + nx * half, t.y + ny * half),
            ])
        }
        LineEnd::Round => {
            let base = uy.atan2(ux);
            let mut ring = Vec::with_capacity(2 * (ROUND_CAP_SEGMENTS as usize + 1));
            // Tail cap sweeps from the left side, through the forward direction, to the right side
            for i in 0..=ROUND_CAP_SEGMENTS {
                let ang = base + PI / 2.0 - PI * (i as f64) / (ROUND_CAP_SEGMENTS as f64);
                ring.push(Point::new(arc.tail.x + half * ang.cos(), arc.tail.y + half * ang.sin()));
            }
            // Head cap continues around the back
            for i in 0..=ROUND_CAP_SEGMENTS {
                let ang = base - PI / 2.0 - PI * (i as f64) / (ROUND_CAP_SEGMENTS as f64);
                ring.push(Point::new(arc.head.x + half * ang.cos(), arc.head.y + half * ang.sin()));
            }
            polygon_from_points(&ring)
        }
    }
}

pub fn polygon_bounds(polygon: &Polygon<f64>) -> Option<Rect> {
    polygon
        .bounding_rect()
        .map(|r| Rect::new(r.min().x, r.min().y, r.max().x, r.max().y))
}

fn merge_bounds(acc: Option<Rect>, next: Option<Rect>) -> Option<Rect> {
    match (acc, next) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (a, b) => a.or(b),
    }
}

/// Bounding box of everything drawn by a cell and its descendants, in its own coordinates
pub fn cell_bounds(lib: &Library, id: &CellId) -> Option<Rect> {
    cell_bounds_inner(lib, id, &mut HashSet::new())
}

fn cell_bounds_inner(lib: &Library, id: &CellId, open: &mut HashSet<CellId>) -> Option<Rect> {
    let cell = lib.cell(id)?;
    if !open.insert(id.clone()) {
        return None;
    }
    let mut bounds = None;
    for node in &cell.nodes {
        for (_, p) in node_polygons(node) {
            bounds = merge_bounds(bounds, polygon_bounds(&p));
        }
    }
    for arc in &cell.arcs {
        bounds = merge_bounds(bounds, arc_polygon(arc).as_ref().and_then(polygon_bounds));
    }
    for inst in &cell.instances {
        let child = cell_bounds_inner(lib, &inst.cell, open)
            .map(|r| inst.placement.to_transform().apply_rect(&r));
        bounds = merge_bounds(bounds, child);
    }
    open.remove(id);
    bounds
}

/// Footprint of one object in its cell: its bounding box and the layers it draws on
pub fn object_footprint(lib: &Library, obj: GeometryRef<'_>) -> (Option<Rect>, Vec<LayerId>) {
    match obj {
        GeometryRef::Node(node) => {
            let mut bounds = None;
            let mut layers: Vec<LayerId> = Vec::new();
            for (layer, p) in node_polygons(node) {
                bounds = merge_bounds(bounds, polygon_bounds(&p));
                if !layers.contains(layer) {
                    layers.push(layer.clone());
                }
            }
            (bounds, layers)
        }
        GeometryRef::Arc(arc) => (
            arc_polygon(arc).as_ref().and_then(polygon_bounds),
            vec![arc.layer.clone()],
        ),
        GeometryRef::Instance(inst) => {
            let bounds = cell_bounds(lib, &inst.cell)
                .map(|r| inst.placement.to_transform().apply_rect(&r));
            let mut layers: Vec<LayerId> = Vec::new();
            let _ = super::hierarchy::for_each_instance(lib, &inst.cell, |cell, _| {
                for l in cell.local_layers() {
                    if !layers.contains(l) {
                        layers.push(l.clone());
                    }
                }
            });
            (bounds, layers)
        }
    }
}

/// Apply a hierarchy transform to a polygon
pub fn transform_polygon(polygon: &Polygon<f64>, transform: &Transform) -> Polygon<f64> {
    if transform.is_identity() {
        polygon.clone()
    } else {
        polygon.affine_transform(&transform.to_geo())
    }
}
