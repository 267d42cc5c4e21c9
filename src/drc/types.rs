//! DRC data types and structures
//!
//! Contains violation records, rule-context bits, and per-task / per-run
//! result counts.

use serde::{Deserialize, Serialize};

use crate::layout::{CellId, LayerId, ObjectId, Point, Rect};

/// Kind of geometric violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MinArea,
    EnclosedArea,
    Notch,
    MinSize,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

/// One violation, as delivered to the error sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    /// Cell whose coordinate system `geometry` is expressed in
    pub cell: CellId,
    pub layer: Option<LayerId>,
    /// Offending object, for node-level checks
    pub object: Option<ObjectId>,
    /// Offending outline
    pub geometry: Vec<Point>,
    pub bounds: Rect,
    pub measured: f64,
    pub required: f64,
    pub rule_name: String,
    /// Extra qualifier such as the offending dimension ("width", "height")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Rule-context toggles a check ran under.
///
/// Bit 0 is "area checking enabled"; bit `1 + i` marks foundry index `i` as
/// the selected foundry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextBits(pub u32);

impl ContextBits {
    const AREA_CHECKING: u32 = 1;
    const FOUNDRY_SHIFT: u32 = 1;
    const MAX_FOUNDRIES: usize = 31;

    pub fn new(area_checking: bool, foundry_index: Option<usize>) -> Self {
        let mut bits = if area_checking { Self::AREA_CHECKING } else { 0 };
        if let Some(i) = foundry_index.filter(|&i| i < Self::MAX_FOUNDRIES) {
            bits |= 1 << (Self::FOUNDRY_SHIFT + i as u32);
        }
        ContextBits(bits)
    }

    pub fn area_checking(&self) -> bool {
        self.0 & Self::AREA_CHECKING != 0
    }

    pub fn has_foundry(&self, index: usize) -> bool {
        index < Self::MAX_FOUNDRIES && self.0 & (1 << (Self::FOUNDRY_SHIFT + index as u32)) != 0
    }
}

/// Counts produced by one per-layer task
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TaskOutcome {
    pub layer: Option<LayerId>,
    pub errors: usize,
    pub warnings: usize,
    /// Input polygons fed to the top-level bucket, including absorbed ones
    pub shapes: usize,
    pub tree_nodes: usize,
}

impl TaskOutcome {
    pub fn count(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
    }
}

/// Aggregate result of one check run
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CheckSummary {
    pub cell: Option<CellId>,
    pub errors: usize,
    pub warnings: usize,
    /// Layers present in the hierarchy
    pub layers_total: usize,
    /// Layers that had rules and were actually checked to completion
    pub layers_checked: usize,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    /// Layers with rules but no geometry (counted as passing)
    pub empty_layers: Vec<LayerId>,
    pub aborted: bool,
    /// The run was skipped because a valid record already covered it
    pub skipped_valid: bool,
    pub elapsed_ms: f64,
}

impl CheckSummary {
    pub fn absorb(&mut self, outcome: &TaskOutcome) {
        self.errors += outcome.errors;
        self.warnings += outcome.warnings;
        self.tasks_completed += 1;
        if outcome.layer.is_some() {
            self.layers_checked += 1;
        }
    }

    /// Finished without abort and without errors
    pub fn passed(&self) -> bool {
        !self.aborted && self.errors == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_bits() {
        let bits = ContextBits::new(true, Some(2));
        assert!(bits.area_checking());
        assert!(bits.has_foundry(2));
        assert!(!bits.has_foundry(0));
        assert_eq!(bits, ContextBits(0b1001));
        assert!(!ContextBits::new(false, None).area_checking());
    }

    #[test]
    fn test_summary_absorb() {
        let mut summary = CheckSummary::default();
        summary.absorb(&TaskOutcome {
            layer: Some(LayerId::from("metal-1")),
            errors: 2,
            warnings: 1,
            ..TaskOutcome::default()
        });
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.tasks_completed, 1);
        assert_eq!(summary.layers_checked, 1);
        assert!(!summary.passed());
    }
}
