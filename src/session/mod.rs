//! Editor / CLI facing DRC session
//!
//! A session owns the rule repository, the validity cache and the incremental
//! scheduler for one design library, and exposes the operations an editor
//! drives: full checks, change notifications, edit-batch boundaries, thread
//! and mode settings, and rule override management.
//!
//! # Submodules
//! - `config` - Session configuration
//! - `worker` - Background thread for incremental jobs

mod config;
mod worker;

pub use config::{DrcConfig, JobMode};

use log::{info, warn};
use std::sync::{Arc, Mutex, RwLock};

use crate::drc::{
    AbortFlag, CheckScope, CheckSummary, DirtyRegion, DrcError, ErrorSink, IncrementalOutcome,
    IncrementalScheduler, Orchestrator, RuleError, RuleRepository, ValidityCache,
};
use crate::layout::shapes::object_footprint;
use crate::layout::{CellId, GeometryRef, Library, Rect};
use worker::Worker;

/// State shared between the session handle and its worker thread
pub(crate) struct SessionState {
    library: Arc<RwLock<Library>>,
    orchestrator: Orchestrator,
    scheduler: Mutex<IncrementalScheduler>,
    sink: Arc<dyn ErrorSink>,
    full_abort: AbortFlag,
    incremental_abort: AbortFlag,
    active: Mutex<Option<CellId>>,
    last_incremental: Mutex<Option<IncrementalOutcome>>,
}

impl SessionState {
    /// Drain the dirty set one cell at a time. Stops early on an incremental
    /// abort, putting the interrupted job's objects back.
    pub(crate) fn run_pending(&self) {
        loop {
            let job = {
                let mut scheduler = self.scheduler.lock().expect("scheduler lock poisoned");
                let active = self.active.lock().expect("active cell lock poisoned").clone();
                if scheduler.schedule(active.as_ref()).is_none() {
                    return;
                }
                scheduler.start()
            };
            let Some(job) = job else {
                return;
            };

            let result = {
                let lib = self.library.read().expect("library lock poisoned");
                self.orchestrator
                    .check_objects(&lib, &job, self.sink.as_ref(), &self.incremental_abort)
            };

            let aborted = match result {
                Ok(outcome) => {
                    let aborted = outcome.summary.aborted;
                    *self.last_incremental.lock().expect("outcome lock poisoned") = Some(outcome);
                    aborted
                }
                Err(e) => {
                    warn!("[DRC Incremental] Check of {} failed: {}", job.cell, e);
                    false
                }
            };

            let more = {
                let mut scheduler = self.scheduler.lock().expect("scheduler lock poisoned");
                if aborted {
                    scheduler.requeue(job);
                }
                scheduler.finish()
            };
            if aborted {
                self.incremental_abort.reset();
                return;
            }
            if !more {
                return;
            }
        }
    }
}

pub struct DrcSession {
    state: Arc<SessionState>,
    config: DrcConfig,
    worker: Option<Worker>,
}

impl DrcSession {
    /// Start a session over `library`. Validity records stored in its metadata
    /// are loaded; unreadable records are dropped with a warning.
    pub fn new(library: Library, config: DrcConfig, sink: Arc<dyn ErrorSink>) -> Result<Self, DrcError> {
        let validity = ValidityCache::load_from(&library).unwrap_or_else(|e| {
            warn!("[DRC] Ignoring stored validity records: {}", e);
            ValidityCache::new()
        });
        let orchestrator = Orchestrator::new(Arc::new(RuleRepository::new()), Arc::new(validity));
        orchestrator.set_number_of_threads(config.num_threads);
        orchestrator.set_area_checking(config.area_checking);

        let state = Arc::new(SessionState {
            library: Arc::new(RwLock::new(library)),
            orchestrator,
            scheduler: Mutex::new(IncrementalScheduler::new(config.incremental)),
            sink,
            full_abort: AbortFlag::new(),
            incremental_abort: AbortFlag::new(),
            active: Mutex::new(None),
            last_incremental: Mutex::new(None),
        });
        let worker = match config.job_mode {
            JobMode::Background => Some(Worker::spawn(Arc::clone(&state))?),
            JobMode::Inline => None,
        };
        info!(
            "[DRC] Session started ({} threads, incremental {}, {:?} jobs)",
            config.num_threads, config.incremental, config.job_mode
        );
        Ok(Self { state, config, worker })
    }

    pub fn config(&self) -> &DrcConfig {
        &self.config
    }

    /// Shared handle to the design library. Hold the write lock while editing
    /// and pass the guard to the change hooks.
    pub fn library(&self) -> Arc<RwLock<Library>> {
        Arc::clone(&self.state.library)
    }

    pub fn validity(&self) -> &Arc<ValidityCache> {
        self.state.orchestrator.validity()
    }

    /// Full hierarchical check of `cell`, optionally limited to `bounds`.
    /// Polls the full-check abort flag only; incremental jobs keep their own.
    pub fn check_hierarchically(&self, cell: &CellId, bounds: Option<Rect>) -> Result<CheckSummary, DrcError> {
        self.state.full_abort.reset();
        let lib = self.state.library.read().expect("library lock poisoned");
        let summary = self.state.orchestrator.check_hierarchically(
            &lib,
            cell,
            CheckScope::from(bounds),
            self.state.sink.as_ref(),
            &self.state.full_abort,
        );
        self.state.full_abort.reset();
        summary
    }

    pub fn is_incremental_enabled(&self) -> bool {
        self.state
            .scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .is_enabled()
    }

    pub fn set_incremental_enabled(&mut self, enabled: bool) {
        self.config.incremental = enabled;
        self.state
            .scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .set_enabled(enabled);
    }

    pub fn number_of_threads(&self) -> usize {
        self.state.orchestrator.number_of_threads()
    }

    pub fn set_number_of_threads(&mut self, n: usize) {
        self.config.num_threads = n;
        self.state.orchestrator.set_number_of_threads(n);
    }

    pub fn is_area_checking(&self) -> bool {
        self.state.orchestrator.area_checking()
    }

    pub fn set_area_checking(&mut self, enabled: bool) {
        self.config.area_checking = enabled;
        self.state.orchestrator.set_area_checking(enabled);
    }

    /// Cell the user is working in; preferred when several cells are dirty
    pub fn set_active_cell(&self, cell: Option<CellId>) {
        *self.state.active.lock().expect("active cell lock poisoned") = cell;
    }

    /// Call with the object's pre-edit geometry, before mutating it. Its old
    /// footprint joins the region `on_geometry_modified` records afterwards,
    /// so neighbours left behind by a move are rechecked too.
    pub fn before_geometry_modified(&self, lib: &Library, cell: &CellId, object: GeometryRef<'_>) {
        self.note_change(lib, cell, object);
    }

    /// Call after mutating the object
    pub fn on_geometry_modified(&self, lib: &Library, cell: &CellId, object: GeometryRef<'_>) {
        self.note_change(lib, cell, object);
    }

    pub fn on_geometry_created(&self, lib: &Library, cell: &CellId, object: GeometryRef<'_>) {
        self.note_change(lib, cell, object);
    }

    /// Call before the object is removed, while its geometry is still readable
    pub fn on_geometry_deleted(&self, lib: &Library, cell: &CellId, object: GeometryRef<'_>) {
        self.note_change(lib, cell, object);
    }

    fn note_change(&self, lib: &Library, cell: &CellId, object: GeometryRef<'_>) {
        let (bounds, layers) = object_footprint(lib, object);
        self.state
            .scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .mark_dirty(cell, object.id(), DirtyRegion::new(bounds, layers));
        self.validity().invalidate_with_ancestors(lib, cell);
    }

    /// Edit batch finished: start draining the dirty set
    pub fn on_edit_batch_end(&self) {
        match &self.worker {
            Some(worker) => worker.trigger(),
            None => self.state.run_pending(),
        }
    }

    /// Wait until the background worker has finished everything queued so far
    pub fn wait_idle(&self) {
        if let Some(worker) = &self.worker {
            worker.flush();
        }
    }

    /// Ask the running full check to stop at its next poll point
    pub fn abort_full_check(&self) {
        self.state.full_abort.request();
    }

    /// Ask the running (or next) incremental job to stop; its objects are
    /// requeued
    pub fn abort_incremental(&self) {
        self.state.incremental_abort.request();
    }

    pub fn full_check_abort_flag(&self) -> AbortFlag {
        self.state.full_abort.clone()
    }

    pub fn incremental_abort_flag(&self) -> AbortFlag {
        self.state.incremental_abort.clone()
    }

    pub fn last_incremental(&self) -> Option<IncrementalOutcome> {
        self.state
            .last_incremental
            .lock()
            .expect("outcome lock poisoned")
            .clone()
    }

    pub fn has_pending_work(&self) -> bool {
        self.state
            .scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .has_dirty()
    }

    /// Install new override text for `technology`. Invalid text is rejected
    /// and the previous rules stay in effect.
    ///
    /// Overrides sit on top of every foundry's table, so all validity records
    /// of the technology are dropped, not only those of the selected foundry.
    pub fn apply_rule_overrides(&self, technology: &str, text: &str) -> Result<(), DrcError> {
        let mut lib = self.state.library.write().expect("library lock poisoned");
        let tech = lib
            .technology_mut(technology)
            .ok_or_else(|| DrcError::UnknownTechnology(technology.to_string()))?;

        if let Err(e) = RuleRepository::validate_overrides(tech, text) {
            warn!("[DRC Rules] Rejected overrides for {}: {}", technology, e);
            return Err(e.into());
        }
        tech.overrides = text.to_string();
        self.state.orchestrator.repository().rules(tech)?;

        let dropped = self.validity().invalidate_technology(technology);
        info!(
            "[DRC Rules] Overrides changed for {}; {} validity records dropped",
            technology, dropped
        );
        Ok(())
    }

    /// Switch the active foundry of `technology`. The selection only changes
    /// once the new foundry's rules have resolved.
    pub fn select_foundry(&self, technology: &str, foundry: &str) -> Result<(), DrcError> {
        let mut lib = self.state.library.write().expect("library lock poisoned");
        let tech = lib
            .technology_mut(technology)
            .ok_or_else(|| DrcError::UnknownTechnology(technology.to_string()))?;
        let index = tech.foundry_index(foundry).ok_or_else(|| RuleError::UnknownFoundry {
            technology: technology.to_string(),
            foundry: foundry.to_string(),
        })?;

        let mut candidate = tech.clone();
        candidate.selected_foundry = candidate.foundries[index].name.clone();
        if let Err(e) = self.state.orchestrator.repository().rules(&candidate) {
            warn!(
                "[DRC Rules] Keeping foundry {} for {}: {}",
                tech.selected_foundry, technology, e
            );
            return Err(e.into());
        }
        tech.selected_foundry = candidate.selected_foundry;
        Ok(())
    }

    /// Persist validity records into the library metadata
    pub fn store_validity(&self) -> Result<(), rmp_serde::encode::Error> {
        let mut lib = self.state.library.write().expect("library lock poisoned");
        self.validity().store_into(&mut lib)
    }
}
