//! DRC orchestrator
//!
//! Entry points for running checks:
//! - Full hierarchical check of a cell, optionally restricted to a bounding box
//! - Object-scoped incremental check of the dirty objects of one cell
//!
//! Work is partitioned by layer; each layer task owns its own buckets, so tasks
//! run independently, sequentially or on a bounded rayon pool.

use log::{info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;

use indexmap::IndexMap;

use super::layer_task::LayerCheckTask;
use super::node_checks::check_nodes;
use super::repository::RuleRepository;
use super::rule_text::RuleError;
use super::rules::{LayerAreaRules, RuleSet};
use super::scheduler::IncrementalJob;
use super::sink::ErrorSink;
use super::types::{CheckSummary, ContextBits, TaskOutcome};
use super::validity::{Timestamp, ValidityCache};
use crate::layout::hierarchy::{self, HierarchyError};
use crate::layout::{CellId, LayerId, Library, ObjectId, Rect, Technology};

pub const DEFAULT_THREADS: usize = 2;

#[derive(Debug, Error)]
pub enum DrcError {
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error("unknown cell `{0}`")]
    UnknownCell(CellId),
    #[error("unknown technology `{0}`")]
    UnknownTechnology(String),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to start incremental worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Cooperative cancellation flag shared between a run and whoever may stop it
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What part of a cell a full check reports on
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CheckScope {
    #[default]
    Whole,
    /// Only geometry whose bounds intersect this box; never recorded as valid
    Bounds(Rect),
}

impl From<Option<Rect>> for CheckScope {
    fn from(bounds: Option<Rect>) -> Self {
        bounds.map_or(CheckScope::Whole, CheckScope::Bounds)
    }
}

/// Result of an object-scoped incremental run
#[derive(Debug, Clone, Default)]
pub struct IncrementalOutcome {
    pub summary: CheckSummary,
    pub objects_total: usize,
    pub objects_checked: usize,
}

/// One unit of layer work
struct LayerJob {
    layer: LayerId,
    rules: LayerAreaRules,
    scope: Option<Vec<Rect>>,
}

pub struct Orchestrator {
    repository: Arc<RuleRepository>,
    validity: Arc<ValidityCache>,
    num_threads: AtomicUsize,
    area_checking: AtomicBool,
    pool: Mutex<Option<(usize, Arc<ThreadPool>)>>,
}

impl Orchestrator {
    pub fn new(repository: Arc<RuleRepository>, validity: Arc<ValidityCache>) -> Self {
        Self {
            repository,
            validity,
            num_threads: AtomicUsize::new(DEFAULT_THREADS),
            area_checking: AtomicBool::new(true),
            pool: Mutex::new(None),
        }
    }

    pub fn repository(&self) -> &Arc<RuleRepository> {
        &self.repository
    }

    pub fn validity(&self) -> &Arc<ValidityCache> {
        &self.validity
    }

    pub fn number_of_threads(&self) -> usize {
        self.num_threads.load(Ordering::Relaxed)
    }

    /// 0 or 1 runs layer tasks on the calling thread
    pub fn set_number_of_threads(&self, n: usize) {
        self.num_threads.store(n, Ordering::Relaxed);
    }

    pub fn area_checking(&self) -> bool {
        self.area_checking.load(Ordering::Relaxed)
    }

    pub fn set_area_checking(&self, enabled: bool) {
        self.area_checking.store(enabled, Ordering::Relaxed);
    }

    /// Rule-context bits a check of `tech` would run under right now
    pub fn context_bits(&self, tech: &Technology) -> ContextBits {
        ContextBits::new(self.area_checking(), tech.selected_foundry_index())
    }

    /// Full hierarchical check of `cell`
    pub fn check_hierarchically(
        &self,
        lib: &Library,
        cell: &CellId,
        scope: CheckScope,
        sink: &dyn ErrorSink,
        abort: &AbortFlag,
    ) -> Result<CheckSummary, DrcError> {
        let start = Instant::now();
        let (tech, rules) = self.resolve(lib, cell)?;
        let order = hierarchy::post_order(lib, cell)?;
        let bits = self.context_bits(tech);

        let mut summary = CheckSummary {
            cell: Some(cell.clone()),
            ..Default::default()
        };

        if scope == CheckScope::Whole {
            if let Some(ts) = self.validity.is_valid(cell, bits) {
                info!("[DRC] {} unchanged since last clean check ({}), skipping", cell, ts.0);
                summary.skipped_valid = true;
                return Ok(summary);
            }
        }

        let present = hierarchy::collect_layers(lib, cell, tech)?;
        summary.layers_total = present.len();
        let threads = self.number_of_threads();

        if self.area_checking() {
            let region = match scope {
                CheckScope::Whole => None,
                CheckScope::Bounds(r) => Some(vec![r]),
            };
            let jobs: Vec<LayerJob> = checkable_layers(present.iter(), tech, &rules)
                .into_iter()
                .map(|(layer, rules)| LayerJob {
                    layer,
                    rules,
                    scope: region.clone(),
                })
                .collect();
            // Layers with rules but no geometry anywhere under the cell pass
            for (layer, _) in checkable_layers(tech.layers.iter().map(|l| &l.id), tech, &rules) {
                if !jobs.iter().any(|j| j.layer == layer) {
                    info!("[DRC] Nothing for layer {} found in {}", layer, cell);
                    summary.empty_layers.push(layer);
                }
            }
            info!(
                "[DRC] Checking {} ({} of {} layers have area rules, {} threads)",
                cell,
                jobs.len(),
                present.len(),
                threads.max(1)
            );
            self.run_layer_jobs(lib, tech, cell, jobs, sink, abort, &mut summary)?;
        } else {
            info!("[DRC] Checking node sizes in {} ({} cells)", cell, order.len());
            summary.tasks_total = 1;
            let cells = order.iter().filter_map(|id| lib.cell(id));
            let pass = check_nodes(cells, None, &rules, sink, abort);
            if pass.completed {
                summary.absorb(&pass.outcome);
            } else {
                summary.errors += pass.outcome.errors;
                summary.warnings += pass.outcome.warnings;
            }
        }

        summary.aborted = abort.is_requested() && summary.tasks_completed < summary.tasks_total;
        summary.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        if summary.aborted {
            warn!(
                "[DRC] Check of {} aborted after {} of {} tasks",
                cell, summary.tasks_completed, summary.tasks_total
            );
        } else if scope == CheckScope::Whole && summary.errors == 0 {
            self.validity
                .record_success(cell, &tech.name, Timestamp::now(), bits);
        }

        info!(
            "[DRC] {} done: {} errors, {} warnings, {} layers checked in {:.2}ms",
            cell, summary.errors, summary.warnings, summary.layers_checked, summary.elapsed_ms
        );
        Ok(summary)
    }

    /// Re-check only the dirty objects of one cell. Never records validity.
    pub fn check_objects(
        &self,
        lib: &Library,
        job: &IncrementalJob,
        sink: &dyn ErrorSink,
        abort: &AbortFlag,
    ) -> Result<IncrementalOutcome, DrcError> {
        let start = Instant::now();
        let cell = &job.cell;
        let (tech, rules) = self.resolve(lib, cell)?;
        hierarchy::post_order(lib, cell)?;

        let mut outcome = IncrementalOutcome {
            summary: CheckSummary {
                cell: Some(cell.clone()),
                ..Default::default()
            },
            objects_total: job.objects.len(),
            objects_checked: 0,
        };
        info!("[DRC Incremental] Checking {} dirty objects in {}", job.objects.len(), cell);

        // Gather the region each dirty object touches, per checked layer
        let mut regions: IndexMap<LayerId, Vec<Rect>> = IndexMap::new();
        let mut ids: HashSet<ObjectId> = HashSet::new();
        for (id, region) in &job.objects {
            if abort.is_requested() {
                break;
            }
            outcome.objects_checked += 1;
            ids.insert(*id);
            let Some(bounds) = region.bounds else {
                continue;
            };
            for layer in region.layers.iter().filter_map(|l| tech.check_layer(l)) {
                regions.entry(layer).or_default().push(bounds);
            }
        }
        outcome.summary.layers_total = regions.len();

        if self.area_checking() {
            let jobs: Vec<LayerJob> = regions
                .into_iter()
                .filter_map(|(layer, rects)| {
                    rules.area_rules(&layer).map(|rules| LayerJob {
                        layer,
                        rules,
                        scope: Some(rects),
                    })
                })
                .collect();
            self.run_layer_jobs(lib, tech, cell, jobs, sink, abort, &mut outcome.summary)?;
        } else if let Some(c) = lib.cell(cell) {
            outcome.summary.tasks_total = 1;
            let pass = check_nodes([c], Some(&ids), &rules, sink, abort);
            if pass.completed {
                outcome.summary.absorb(&pass.outcome);
            } else {
                outcome.summary.errors += pass.outcome.errors;
                outcome.summary.warnings += pass.outcome.warnings;
            }
        }

        outcome.summary.aborted = outcome.objects_checked < outcome.objects_total
            || outcome.summary.tasks_completed < outcome.summary.tasks_total;
        outcome.summary.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if outcome.summary.aborted {
            warn!(
                "[DRC Incremental] {} aborted: {} of {} objects, {} of {} tasks",
                cell,
                outcome.objects_checked,
                outcome.objects_total,
                outcome.summary.tasks_completed,
                outcome.summary.tasks_total
            );
        } else {
            info!(
                "[DRC Incremental] {} done: {} errors, {} warnings in {:.2}ms",
                cell, outcome.summary.errors, outcome.summary.warnings, outcome.summary.elapsed_ms
            );
        }
        Ok(outcome)
    }

    fn resolve<'l>(&self, lib: &'l Library, cell: &CellId) -> Result<(&'l Technology, Arc<RuleSet>), DrcError> {
        let c = lib.cell(cell).ok_or_else(|| DrcError::UnknownCell(cell.clone()))?;
        let tech = lib
            .technology(&c.technology)
            .ok_or_else(|| DrcError::UnknownTechnology(c.technology.clone()))?;
        let rules = self.repository.rules(tech)?;
        Ok((tech, rules))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_layer_jobs(
        &self,
        lib: &Library,
        tech: &Technology,
        cell: &CellId,
        jobs: Vec<LayerJob>,
        sink: &dyn ErrorSink,
        abort: &AbortFlag,
        summary: &mut CheckSummary,
    ) -> Result<(), DrcError> {
        summary.tasks_total += jobs.len();
        let run_one = |job: LayerJob| -> Result<Option<TaskOutcome>, HierarchyError> {
            if abort.is_requested() {
                return Ok(None);
            }
            LayerCheckTask::new(lib, tech, cell, job.layer, job.rules)
                .with_scope(job.scope)
                .run(sink)
                .map(Some)
        };

        let threads = self.number_of_threads();
        let results: Vec<Result<Option<TaskOutcome>, HierarchyError>> = if threads <= 1 || jobs.len() <= 1 {
            jobs.into_iter().map(run_one).collect()
        } else {
            let pool = self.pool(threads)?;
            pool.install(|| jobs.into_par_iter().map(run_one).collect())
        };

        for result in results {
            let Some(outcome) = result? else {
                continue;
            };
            summary.absorb(&outcome);
            if outcome.shapes == 0 {
                if let Some(layer) = outcome.layer {
                    summary.empty_layers.push(layer);
                }
            }
        }
        Ok(())
    }

    /// Worker pool for `threads`, rebuilt only when the size changes
    fn pool(&self, threads: usize) -> Result<Arc<ThreadPool>, DrcError> {
        let mut cached = self.pool.lock().expect("pool lock poisoned");
        if let Some((n, pool)) = cached.as_ref() {
            if *n == threads {
                return Ok(Arc::clone(pool));
            }
        }
        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("drc-layer-{}", i))
                .build()?,
        );
        *cached = Some((threads, Arc::clone(&pool)));
        Ok(pool)
    }
}

/// Layers to run area tasks for: mapped through the technology's merge rules,
/// deduplicated, and only those with at least one area rule.
fn checkable_layers<'a>(
    present: impl Iterator<Item = &'a LayerId>,
    tech: &Technology,
    rules: &RuleSet,
) -> Vec<(LayerId, LayerAreaRules)> {
    let mut seen: HashSet<LayerId> = HashSet::new();
    present
        .filter_map(|l| tech.check_layer(l))
        .filter(|l| seen.insert(l.clone()))
        .filter_map(|l| rules.area_rules(&l).map(|r| (l, r)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drc::sink::CollectingSink;
    use crate::drc::types::ViolationKind;
    use crate::layout::{Cell, Foundry, Layer, LayerFunction, LayerShape, Placement, PrimitiveNode, Shape};

    fn library(rules: &str) -> Library {
        let mut lib = Library::new("lib");
        lib.add_technology(Technology {
            name: "mocmos".to_string(),
            layers: ["metal-1", "metal-2", "polysilicon-1"]
                .iter()
                .map(|id| Layer {
                    id: LayerId::from(*id),
                    function: LayerFunction::Metal,
                    pseudo: false,
                    gate: false,
                })
                .collect(),
            foundries: vec![Foundry {
                name: "MOSIS".to_string(),
                rules: rules.to_string(),
            }],
            selected_foundry: "MOSIS".to_string(),
            overrides: String::new(),
        });
        let mut top = Cell::new("top", "mocmos");
        for (i, layer) in ["metal-1", "metal-2"].iter().enumerate() {
            top.nodes.push(PrimitiveNode {
                id: ObjectId(i as u64 + 1),
                proto: format!("{}-node", layer),
                placement: Placement::default(),
                width: 1.0,
                height: 3.0,
                shapes: vec![LayerShape {
                    layer: LayerId::from(*layer),
                    shape: Shape::rect(0.0, 0.0, 1.0, 3.0),
                }],
            });
        }
        lib.add_cell(top);
        lib
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(RuleRepository::new()), Arc::new(ValidityCache::new()))
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let lib = library("minarea metal-1 4 name=M1.A\nminarea metal-2 4 name=M2.A");
        let top = CellId::from("top");
        for threads in [1, 2, 4] {
            let orch = orchestrator();
            orch.set_number_of_threads(threads);
            let sink = CollectingSink::new();
            let summary = orch
                .check_hierarchically(&lib, &top, CheckScope::Whole, &sink, &AbortFlag::new())
                .unwrap();
            assert_eq!(summary.errors, 2);
            assert_eq!(summary.layers_checked, 2);
            assert_eq!(sink.count_errors_of_kind(ViolationKind::MinArea), 2);
            assert!(orch.validity().record(&top).is_none());
        }
    }

    #[test]
    fn test_empty_layer_passes_and_is_listed() {
        let lib = library("minarea polysilicon-1 4 name=P.A");
        let orch = orchestrator();
        let top = CellId::from("top");
        let summary = orch
            .check_hierarchically(&lib, &top, CheckScope::Whole, &CollectingSink::new(), &AbortFlag::new())
            .unwrap();
        // polysilicon is a technology layer but not present in the design
        assert_eq!(summary.layers_checked, 0);
        assert_eq!(summary.empty_layers, vec![LayerId::from("polysilicon-1")]);
        assert!(summary.passed());
        assert!(orch.validity().record(&top).is_some());
    }

    #[test]
    fn test_valid_record_skips_and_bounds_never_record() {
        let lib = library("minarea metal-1 2 name=M1.A");
        let orch = orchestrator();
        let top = CellId::from("top");
        let sink = CollectingSink::new();

        let bounded = orch
            .check_hierarchically(&lib, &top, CheckScope::Bounds(Rect::new(0.0, 0.0, 1.0, 1.0)), &sink, &AbortFlag::new())
            .unwrap();
        assert!(bounded.passed());
        assert!(orch.validity().record(&top).is_none());

        let first = orch
            .check_hierarchically(&lib, &top, CheckScope::Whole, &sink, &AbortFlag::new())
            .unwrap();
        assert!(!first.skipped_valid);
        let second = orch
            .check_hierarchically(&lib, &top, CheckScope::Whole, &sink, &AbortFlag::new())
            .unwrap();
        assert!(second.skipped_valid);

        // Different context bits do not match the stored record
        orch.set_area_checking(false);
        let third = orch
            .check_hierarchically(&lib, &top, CheckScope::Whole, &sink, &AbortFlag::new())
            .unwrap();
        assert!(!third.skipped_valid);
    }

    #[test]
    fn test_unknown_cell() {
        let lib = library("");
        let err = orchestrator()
            .check_hierarchically(&lib, &CellId::from("nope"), CheckScope::Whole, &CollectingSink::new(), &AbortFlag::new())
            .unwrap_err();
        assert!(matches!(err, DrcError::UnknownCell(_)));
    }
}
