//! Dirty-set scheduler for incremental checking
//!
//! One scheduler per design session. State machine:
//! `Idle -> Pending(cell) -> Running(cell) -> Idle`. At most one run is
//! active; a trigger arriving while running is coalesced into a single
//! "recheck afterwards" request.

use indexmap::IndexMap;
use log::debug;

use crate::layout::{CellId, LayerId, ObjectId, Rect};

/// Area and layers touched by one modified object, in its cell's coordinates
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirtyRegion {
    pub bounds: Option<Rect>,
    pub layers: Vec<LayerId>,
}

impl DirtyRegion {
    pub fn new(bounds: Option<Rect>, layers: Vec<LayerId>) -> Self {
        Self { bounds, layers }
    }

    /// Grow to cover another change of the same object
    pub fn merge(&mut self, other: DirtyRegion) {
        self.bounds = match (self.bounds, other.bounds) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        };
        for layer in other.layers {
            if !self.layers.contains(&layer) {
                self.layers.push(layer);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Pending(CellId),
    Running(CellId),
}

/// Work handed out by [`IncrementalScheduler::start`]
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalJob {
    pub cell: CellId,
    pub objects: IndexMap<ObjectId, DirtyRegion>,
}

#[derive(Debug)]
pub struct IncrementalScheduler {
    enabled: bool,
    dirty: IndexMap<CellId, IndexMap<ObjectId, DirtyRegion>>,
    state: SchedulerState,
    recheck_requested: bool,
}

impl Default for IncrementalScheduler {
    fn default() -> Self {
        Self::new(true)
    }
}

impl IncrementalScheduler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            dirty: IndexMap::new(),
            state: SchedulerState::Idle,
            recheck_requested: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling drops everything already marked dirty
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.dirty.clear();
            self.recheck_requested = false;
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SchedulerState::Running(_))
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_cells(&self) -> impl Iterator<Item = &CellId> {
        self.dirty.keys()
    }

    pub fn dirty_objects(&self, cell: &CellId) -> Option<&IndexMap<ObjectId, DirtyRegion>> {
        self.dirty.get(cell)
    }

    /// Record a changed object of `cell`. No-op while disabled.
    pub fn mark_dirty(&mut self, cell: &CellId, object: ObjectId, region: DirtyRegion) {
        if !self.enabled {
            return;
        }
        let objects = self.dirty.entry(cell.clone()).or_default();
        match objects.get_mut(&object) {
            Some(existing) => existing.merge(region),
            None => {
                objects.insert(object, region);
            }
        }
    }

    /// Edit batch ended: pick the next cell to check. Prefers `active` when it
    /// is dirty. While a run is in progress the request is remembered and
    /// `None` is returned.
    pub fn schedule(&mut self, active: Option<&CellId>) -> Option<CellId> {
        match &self.state {
            SchedulerState::Running(_) => {
                if self.has_dirty() {
                    self.recheck_requested = true;
                }
                None
            }
            SchedulerState::Pending(cell) => Some(cell.clone()),
            SchedulerState::Idle => {
                if !self.enabled {
                    return None;
                }
                let next = active
                    .filter(|c| self.dirty.contains_key(*c))
                    .or_else(|| self.dirty.keys().next())?
                    .clone();
                debug!("[DRC Incremental] {} pending", next);
                self.state = SchedulerState::Pending(next.clone());
                Some(next)
            }
        }
    }

    /// Pending -> Running. Takes the cell's dirty set as the job.
    pub fn start(&mut self) -> Option<IncrementalJob> {
        let SchedulerState::Pending(cell) = &self.state else {
            return None;
        };
        let cell = cell.clone();
        let objects = self.dirty.shift_remove(&cell).unwrap_or_default();
        self.state = SchedulerState::Running(cell.clone());
        Some(IncrementalJob { cell, objects })
    }

    /// Running -> Idle. Returns whether more dirty work is waiting, so the
    /// caller re-polls immediately.
    pub fn finish(&mut self) -> bool {
        if let SchedulerState::Running(cell) = &self.state {
            debug!("[DRC Incremental] {} finished", cell);
        }
        self.state = SchedulerState::Idle;
        self.recheck_requested = false;
        self.enabled && self.has_dirty()
    }

    /// Put an unfinished job's objects back so they are checked again
    pub fn requeue(&mut self, job: IncrementalJob) {
        for (object, region) in job.objects {
            self.mark_dirty(&job.cell, object, region);
        }
    }

    pub fn recheck_requested(&self) -> bool {
        self.recheck_requested
    }
}
