//! Placement transforms for cell instances and primitive nodes
//!
//! `Placement` is the serialized form (translation, rotation, mirror) stored
//! on instances. `Transform` is the composable 2x3 affine matrix used while
//! walking the hierarchy.

use geo::AffineTransform;
use serde::{Deserialize, Serialize};

use super::types::{Point, Rect};

/// Serialized placement of an instance or node inside its parent cell.
///
/// Applied as: mirror about the Y axis (if `mirror_x`), then rotate
/// counter-clockwise by `rotation` degrees, then translate by (`dx`, `dy`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub dx: f64,
    #[serde(default)]
    pub dy: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub mirror_x: bool,
}

impl Placement {
    pub fn translate(dx: f64, dy: f64) -> Self {
        Self { dx, dy, ..Self::default() }
    }

    pub fn to_transform(&self) -> Transform {
        let (sin, cos) = exact_sin_cos(self.rotation);
        let mx = if self.mirror_x { -1.0 } else { 1.0 };
        Transform {
            m: [cos * mx, -sin, self.dx, sin * mx, cos, self.dy],
        }
    }
}

/// Sine and cosine with exact results for multiples of 90 degrees, so that
/// Manhattan geometry stays on the integer grid after rotation.
fn exact_sin_cos(degrees: f64) -> (f64, f64) {
    let normalized = degrees.rem_euclid(360.0);
    if normalized == 0.0 {
        (0.0, 1.0)
    } else if normalized == 90.0 {
        (1.0, 0.0)
    } else if normalized == 180.0 {
        (0.0, -1.0)
    } else if normalized == 270.0 {
        (-1.0, 0.0)
    } else {
        normalized.to_radians().sin_cos()
    }
}

/// Affine transform `[a, b, xoff, d, e, yoff]`:
/// `x' = a*x + b*y + xoff`, `y' = d*x + e*y + yoff`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    m: [f64; 6],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self { m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0] }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Compose: the result applies `inner` first, then `self`.
    pub fn compose(&self, inner: &Transform) -> Transform {
        let [a1, b1, x1, d1, e1, y1] = self.m;
        let [a2, b2, x2, d2, e2, y2] = inner.m;
        Transform {
            m: [
                a1 * a2 + b1 * d2,
                a1 * b2 + b1 * e2,
                a1 * x2 + b1 * y2 + x1,
                d1 * a2 + e1 * d2,
                d1 * b2 + e1 * e2,
                d1 * x2 + e1 * y2 + y1,
            ],
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        let [a, b, xoff, d, e, yoff] = self.m;
        Point {
            x: a * p.x + b * p.y + xoff,
            y: d * p.x + e * p.y + yoff,
        }
    }

    /// Bounding box of the transformed rectangle
    pub fn apply_rect(&self, r: &Rect) -> Rect {
        let corners = [
            self.apply(Point::new(r.min.x, r.min.y)),
            self.apply(Point::new(r.max.x, r.min.y)),
            self.apply(Point::new(r.max.x, r.max.y)),
            self.apply(Point::new(r.min.x, r.max.y)),
        ];
        Rect::bounding(&corners).unwrap_or(*r)
    }

    pub fn to_geo(&self) -> AffineTransform<f64> {
        let [a, b, xoff, d, e, yoff] = self.m;
        AffineTransform::new(a, b, xoff, d, e, yoff)
    }
}
