//! Interface to the external hashing service, plus the queue that feeds it.
//!
//! TTH computation itself lives outside the index; the catalog only consumes
//! completions. The queue runs one background worker and reports each result
//! through the completion callback, which installs the TTH under a brief
//! exclusive lock on the catalog. `wait_idle` exists for blocking refreshes
//! and tests that need the pending set drained.

use crate::types::Tth;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use tracing::warn;

/// The hashing service contract.
pub trait Hasher: Send + Sync {
    /// Tiger Tree root of a file's contents.
    fn digest_file(&self, path: &Path) -> io::Result<Tth>;
    /// Tiger Tree root of an in-memory buffer; used for listing artifacts.
    fn digest_bytes(&self, bytes: &[u8]) -> Tth;
}

/// Completion callback: `(real path, computed root)`.
pub type HashCallback = Box<dyn Fn(PathBuf, Tth) + Send + Sync>;

struct QueueState {
    pending: Mutex<usize>,
    drained: Condvar,
}

/// Single-worker queue of files awaiting hashing.
pub struct HashQueue {
    tx: Mutex<Option<mpsc::Sender<PathBuf>>>,
    state: Arc<QueueState>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HashQueue {
    pub fn new(hasher: Arc<dyn Hasher>, on_done: HashCallback) -> Self {
        let (tx, rx) = mpsc::channel::<PathBuf>();
        let state = Arc::new(QueueState { pending: Mutex::new(0), drained: Condvar::new() });

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name("share-hasher".into())
            .spawn(move || {
                while let Ok(path) = rx.recv() {
                    match hasher.digest_file(&path) {
                        Ok(tth) => on_done(path, tth),
                        Err(e) => warn!(path = %path.display(), error = %e, "hashing failed"),
                    }
                    let mut pending = worker_state.pending.lock().unwrap();
                    *pending -= 1;
                    if *pending == 0 {
                        worker_state.drained.notify_all();
                    }
                }
            })
            .expect("failed to spawn hasher worker");

        Self { tx: Mutex::new(Some(tx)), state, worker: Mutex::new(Some(worker)) }
    }

    /// Queue a file. Completions arrive on the worker thread.
    pub fn enqueue(&self, path: PathBuf) {
        let tx = self.tx.lock().unwrap();
        if let Some(tx) = tx.as_ref() {
            *self.state.pending.lock().unwrap() += 1;
            if tx.send(path).is_err() {
                *self.state.pending.lock().unwrap() -= 1;
            }
        }
    }

    /// Number of files still awaiting a digest.
    pub fn pending(&self) -> usize {
        *self.state.pending.lock().unwrap()
    }

    /// Block until every queued file has been processed.
    pub fn wait_idle(&self) {
        let mut pending = self.state.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.state.drained.wait(pending).unwrap();
        }
    }

    /// Stop accepting work and join the worker. Queued files are still
    /// processed; callers wanting a fast exit call this after `wait_idle`.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap().take();
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl Drop for HashQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
