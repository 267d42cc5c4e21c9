//! Layout data model consumed by the checker
//!
//! # Submodules
//! - `types` - Points, shapes, primitive nodes, arcs, instances and cells
//! - `transform` - Instance placements and composable affine transforms
//! - `technology` - Layers, foundries and rule-table text
//! - `library` - The design library (cells, technologies, metadata)
//! - `hierarchy` - Post-order traversal and the hierarchical layer collector
//! - `shapes` - Expansion of shapes and arcs into polygons

mod types;
mod transform;
mod technology;
mod library;
pub mod hierarchy;
pub mod shapes;

pub use types::{
    Point,
    Rect,
    LineEnd,
    Shape,
    LayerShape,
    ObjectId,
    CellId,
    PrimitiveNode,
    ArcInst,
    Instance,
    Cell,
    GeometryRef,
};

pub use transform::{Placement, Transform};

pub use technology::{Foundry, Layer, LayerFunction, LayerId, Technology};

pub use library::Library;

pub use hierarchy::HierarchyError;
