//! Geometry bucket: per-(cell, layer) merge accumulator
//!
//! Shapes are kept as clusters of already-unioned geometry. An R-tree over
//! cluster bounding boxes finds the clusters a new shape may touch, so each
//! insertion only unions locally. Clusters never overlap or touch each other,
//! which makes the final merge a plain concatenation.

use geo::{Area, BooleanOps, BoundingRect, MultiPolygon, Polygon};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{Envelope, RTree, RTreeObject, AABB};

use super::polytree::{PolygonTree, AREA_EPSILON};
use crate::layout::shapes::transform_polygon;
use crate::layout::{LayerId, Transform};

type ClusterEntry = GeomWithData<Rectangle<[f64; 2]>, usize>;

pub struct GeometryBucket {
    layer: LayerId,
    clusters: Vec<Option<MultiPolygon<f64>>>,
    index: RTree<ClusterEntry>,
    shapes: usize,
    merged: bool,
}

/// Read-only result of a merged bucket
#[derive(Debug, Clone)]
pub struct FinishedBucket {
    pub layer: LayerId,
    /// Merged, mutually disjoint polygons (with holes)
    pub polygons: Vec<Polygon<f64>>,
    pub tree: PolygonTree,
    /// Number of input polygons that went into the merge
    pub shapes: usize,
}

impl FinishedBucket {
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn area(&self) -> f64 {
        self.polygons.iter().map(|p| p.unsigned_area()).sum()
    }
}

impl GeometryBucket {
    pub fn new(layer: LayerId) -> Self {
        Self {
            layer,
            clusters: Vec::new(),
            index: RTree::new(),
            shapes: 0,
            merged: false,
        }
    }

    pub fn layer(&self) -> &LayerId {
        &self.layer
    }

    pub fn is_merged(&self) -> bool {
        self.merged
    }

    pub fn shape_count(&self) -> usize {
        self.shapes
    }

    /// Insert one polygon, unioning it with every cluster it may touch.
    /// Zero-area input is dropped.
    pub fn add(&mut self, polygon: Polygon<f64>) {
        assert!(
            !self.merged,
            "shape added to already merged bucket for layer {}",
            self.layer
        );
        if polygon.unsigned_area() <= AREA_EPSILON {
            return;
        }
        let Some(rect) = polygon.bounding_rect() else {
            return;
        };
        let mut envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

        let hits: Vec<ClusterEntry> = self
            .index
            .locate_in_envelope_intersecting(&envelope)
            .cloned()
            .collect();

        let mut merged = MultiPolygon::new(vec![polygon]);
        for hit in hits {
            self.index.remove(&hit);
            envelope = envelope.merged(&hit.geom().envelope());
            if let Some(cluster) = self.clusters[hit.data].take() {
                merged = merged.union(&cluster);
            }
        }

        let id = self.clusters.len();
        self.clusters.push(Some(merged));
        self.index.insert(GeomWithData::new(Rectangle::from_aabb(envelope), id));
        self.shapes += 1;
    }

    /// Add every polygon of a finished child bucket under `transform`
    pub fn absorb(&mut self, child: &FinishedBucket, transform: &Transform) {
        assert!(
            !self.merged,
            "child bucket absorbed into already merged bucket for layer {}",
            self.layer
        );
        for polygon in &child.polygons {
            self.add(transform_polygon(polygon, transform));
        }
    }

    /// Final union and containment forest. Panics if called twice.
    pub fn merge_and_tree(&mut self) -> FinishedBucket {
        assert!(!self.merged, "geometry bucket for layer {} merged twice", self.layer);
        self.merged = true;
        self.index = RTree::new();

        let polygons: Vec<Polygon<f64>> = self
            .clusters
            .drain(..)
            .flatten()
            .flat_map(|mp| mp.0)
            .filter(|p| p.unsigned_area() > AREA_EPSILON)
            .collect();
        let tree = PolygonTree::build(&polygons);

        FinishedBucket {
            layer: self.layer.clone(),
            polygons,
            tree,
            shapes: self.shapes,
        }
    }
}
