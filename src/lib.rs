//! Hierarchical, incremental, multi-threaded DRC for IC layout
//!
//! - `layout` - cells, instances, technologies and hierarchy traversal
//! - `drc` - rule resolution, per-layer merge and area checks, orchestration,
//!   validity records and the incremental scheduler
//! - `session` - the surface an editor or CLI drives

pub mod layout;
pub mod drc;
pub mod session;
