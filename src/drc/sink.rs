//! Error sink: where violations go
//!
//! Layer tasks run concurrently and all append to the same sink, so
//! implementations must accept concurrent `report` calls.

use std::sync::Mutex;

use super::types::{Severity, Violation, ViolationKind};

pub trait ErrorSink: Send + Sync {
    fn report(&self, violation: Violation);
}

/// Sink that keeps every violation in memory
#[derive(Default)]
pub struct CollectingSink {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().expect("sink lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.violations.lock().expect("sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `kind` violations with error severity. Warnings of that kind
    /// are not counted.
    pub fn count_errors_of_kind(&self, kind: ViolationKind) -> usize {
        self.violations
            .lock()
            .expect("sink lock poisoned")
            .iter()
            .filter(|v| v.kind == kind && v.severity == Severity::Error)
            .count()
    }

    pub fn take(&self) -> Vec<Violation> {
        std::mem::take(&mut *self.violations.lock().expect("sink lock poisoned"))
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, violation: Violation) {
        self.violations
            .lock()
            .expect("sink lock poisoned")
            .push(violation);
    }
}
