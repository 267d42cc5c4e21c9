//! Background incremental worker
//!
//! A single thread that drains the dirty set whenever an edit batch ends, so
//! at most one incremental run is ever active. Extra `Run` messages that pile
//! up during a run are harmless: the drain loop already picked up their work.

use log::debug;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::SessionState;

pub(crate) enum WorkerMessage {
    Run,
    /// Reply once every message queued before this one has been handled
    Flush(Sender<()>),
    Shutdown,
}

pub(crate) struct Worker {
    tx: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(state: Arc<SessionState>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<WorkerMessage>();
        let handle = thread::Builder::new()
            .name("drc-incremental".to_string())
            .spawn(move || {
                for msg in rx {
                    match msg {
                        WorkerMessage::Run => state.run_pending(),
                        WorkerMessage::Flush(done) => {
                            let _ = done.send(());
                        }
                        WorkerMessage::Shutdown => break,
                    }
                }
                debug!("[DRC Incremental] Worker stopped");
            })?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub(crate) fn trigger(&self) {
        let _ = self.tx.send(WorkerMessage::Run);
    }

    /// Block until the worker has handled everything sent so far
    pub(crate) fn flush(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        if self.tx.send(WorkerMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
