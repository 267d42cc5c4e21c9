//! Core layout types: points, shapes, primitive nodes, arcs and cells
//!
//! Coordinates are in technology units (lambda). A `Cell` owns its primitive
//! geometry and the instances of other cells placed inside it.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::technology::LayerId;
use super::transform::Placement;

/// A 2D point
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle, always normalized so that `min <= max`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min: Point::new(x1.min(x2), y1.min(y2)),
            max: Point::new(x1.max(x2), y1.max(y2)),
        }
    }

    /// Bounding box of a point set, `None` when empty
    pub fn bounding(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut r = Rect { min: *first, max: *first };
        for p in &points[1..] {
            r.min.x = r.min.x.min(p.x);
            r.min.y = r.min.y.min(p.y);
            r.max.x = r.max.x.max(p.x);
            r.max.y = r.max.y.max(p.y);
        }
        Some(r)
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// Closed-interval intersection test (touching rectangles intersect)
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.min.x, self.min.y),
            Point::new(self.max.x, self.min.y),
            Point::new(self.max.x, self.max.y),
            Point::new(self.min.x, self.max.y),
        ]
    }

    /// `[min_x, min_y, max_x, max_y]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.min.x, self.min.y, self.max.x, self.max.y]
    }
}

/// Arc end style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineEnd {
    Round,
    /// Extended by half the width past each end point
    #[default]
    Square,
    Butt,
}

/// Simple shape on a single layer, in the owner's local coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Rect { min: Point, max: Point },
    Polygon { points: Vec<Point> },
}

impl Shape {
    pub fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let r = Rect::new(x1, y1, x2, y2);
        Shape::Rect { min: r.min, max: r.max }
    }

    pub fn bounds(&self) -> Option<Rect> {
        match self {
            Shape::Rect { min, max } => Some(Rect::new(min.x, min.y, max.x, max.y)),
            Shape::Polygon { points } => Rect::bounding(points),
        }
    }
}

/// A shape tagged with its layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerShape {
    pub layer: LayerId,
    pub shape: Shape,
}

/// Identifier of a geometric object (node, arc or instance), unique within a library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cell name, unique within a library
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub String);

impl CellId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CellId {
    fn from(s: &str) -> Self {
        CellId(s.to_string())
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primitive node instance (transistor, contact, pure-layer node, ...)
///
/// `shapes` are in node-local coordinates; `placement` positions the node in
/// its cell. `width`/`height` are the nominal node size used by the minimum
/// node size check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveNode {
    pub id: ObjectId,
    pub proto: String,
    #[serde(default)]
    pub placement: Placement,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub shapes: Vec<LayerShape>,
}

/// Arc (wire) running from `head` to `tail` on one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcInst {
    pub id: ObjectId,
    pub proto: String,
    pub layer: LayerId,
    pub head: Point,
    pub tail: Point,
    pub width: f64,
    #[serde(default)]
    pub end: LineEnd,
}

/// Placement of another cell inside this one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: ObjectId,
    pub cell: CellId,
    #[serde(default)]
    pub placement: Placement,
}

/// A named design unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub name: CellId,
    pub technology: String,
    #[serde(default)]
    pub nodes: Vec<PrimitiveNode>,
    #[serde(default)]
    pub arcs: Vec<ArcInst>,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl Cell {
    pub fn new(name: &str, technology: &str) -> Self {
        Self {
            name: CellId::from(name),
            technology: technology.to_string(),
            nodes: Vec::new(),
            arcs: Vec::new(),
            instances: Vec::new(),
        }
    }

    /// Find any object of this cell by id
    pub fn find_object(&self, id: ObjectId) -> Option<GeometryRef<'_>> {
        if let Some(n) = self.nodes.iter().find(|n| n.id == id) {
            return Some(GeometryRef::Node(n));
        }
        if let Some(a) = self.arcs.iter().find(|a| a.id == id) {
            return Some(GeometryRef::Arc(a));
        }
        self.instances
            .iter()
            .find(|i| i.id == id)
            .map(GeometryRef::Instance)
    }

    /// Layers referenced directly by this cell's primitive geometry
    pub fn local_layers(&self) -> impl Iterator<Item = &LayerId> {
        self.nodes
            .iter()
            .flat_map(|n| n.shapes.iter().map(|s| &s.layer))
            .chain(self.arcs.iter().map(|a| &a.layer))
    }
}

/// Borrowed reference to one geometric object of a cell
#[derive(Debug, Clone, Copy)]
pub enum GeometryRef<'a> {
    Node(&'a PrimitiveNode),
    Arc(&'a ArcInst),
    Instance(&'a Instance),
}

impl GeometryRef<'_> {
    pub fn id(&self) -> ObjectId {
        match self {
            GeometryRef::Node(n) => n.id,
            GeometryRef::Arc(a) => a.id,
            GeometryRef::Instance(i) => i.id,
        }
    }
}
