//! Hierarchical Design Rule Check (DRC)
//!
//! Merges each layer bottom-up through the cell hierarchy with an R-tree
//! backed union, walks the resulting containment forest applying area,
//! enclosed-area and notch rules, and runs layers in parallel with Rayon.
//!
//! # Submodules
//! - `types` - Violations, rule-context bits, run summaries
//! - `rules` - Rule sum type and rule-set lookups
//! - `rule_text` - Rule table / override text grammar
//! - `repository` - Per-technology rule cache
//! - `bucket` - Per-(cell, layer) merge accumulator
//! - `polytree` - Containment forest of merged geometry
//! - `layer_task` - Per-layer area check
//! - `node_checks` - Minimum node size and forbidden nodes
//! - `sink` - Violation sink
//! - `orchestrator` - Full and incremental check entry points
//! - `validity` - Per-cell validity records
//! - `scheduler` - Dirty-set scheduler for incremental checking

mod types;
mod rules;
mod rule_text;
mod repository;
mod bucket;
mod polytree;
mod layer_task;
mod node_checks;
mod sink;
mod orchestrator;
mod validity;
mod scheduler;

pub use types::{
    CheckSummary, ContextBits, Severity, TaskOutcome, Violation, ViolationKind,
};

pub use rules::{
    Connectivity, EdgeRule, ExtensionRule, ForbiddenNode, LayerAreaRules, LayerLimit,
    NodeSizeRule, Rule, RuleKind, RuleSet, SpacingRule,
};

pub use rule_text::{parse_rule_line, parse_rule_table, RuleError, RuleLine, RuleOverrideSet};

pub use repository::RuleRepository;

pub use bucket::{FinishedBucket, GeometryBucket};

pub use polytree::{PolygonTree, TreeNode, AREA_EPSILON};

pub use layer_task::LayerCheckTask;

pub use node_checks::{check_nodes, NodePass};

pub use sink::{CollectingSink, ErrorSink};

pub use orchestrator::{
    AbortFlag, CheckScope, DrcError, IncrementalOutcome, Orchestrator, DEFAULT_THREADS,
};

pub use validity::{
    Timestamp, ValidityCache, ValidityLoadError, ValidityRecord, VALIDITY_METADATA_KEY,
};

pub use scheduler::{DirtyRegion, IncrementalJob, IncrementalScheduler, SchedulerState};
