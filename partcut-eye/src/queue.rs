//! Deduplicating FIFO queue drained by a single worker

use crate::config::QueueConfig;
use crate::processing::pipeline::FileProcessor;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Unit of pending work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Canonical path of the capture
    pub path: PathBuf,
    /// Root of the region-keyed output tree
    pub output_root: PathBuf,
    pub enqueued_at: DateTime<Utc>,
}

/// What `enqueue` did with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    AlreadyProcessed,
    /// Waiting in the list or currently being processed
    AlreadyQueued,
    QueueFull,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueueEntry>,
    queued: HashSet<PathBuf>,
    in_flight: Option<PathBuf>,
    processed: HashSet<PathBuf>,
    worker_active: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    processor: Arc<dyn FileProcessor>,
    max_pending: usize,
    idle: Notify,
}

/// Ordered, deduplicating processing queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct ProcessingQueue {
    inner: Arc<QueueInner>,
}

/// Key under which a path is deduplicated
fn queue_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl ProcessingQueue {
    pub fn new(processor: Arc<dyn FileProcessor>, config: &QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                processor,
                max_pending: config.max_pending.max(1),
                idle: Notify::new(),
            }),
        }
    }

    /// Append `path` unless it was processed, is already queued, or the list
    /// is full. Starts the worker if none is running.
    pub fn enqueue(&self, path: &Path, output_root: &Path) -> EnqueueOutcome {
        let key = queue_key(path);

        let start_worker = {
            let mut state = self.inner.state.lock();

            if state.processed.contains(&key) {
                debug!("Skipping {:?}: already processed", key);
                return EnqueueOutcome::AlreadyProcessed;
            }
            if state.queued.contains(&key) || state.in_flight.as_ref() == Some(&key) {
                debug!("Skipping {:?}: already queued", key);
                return EnqueueOutcome::AlreadyQueued;
            }
            if state.pending.len() >= self.inner.max_pending {
                warn!(
                    "Queue full ({} pending), dropping {:?}",
                    state.pending.len(),
                    key
                );
                return EnqueueOutcome::QueueFull;
            }

            state.queued.insert(key.clone());
            state.pending.push_back(QueueEntry {
                path: key.clone(),
                output_root: output_root.to_path_buf(),
                enqueued_at: Utc::now(),
            });
            info!("Queued {:?} ({} pending)", key, state.pending.len());

            let start = !state.worker_active;
            state.worker_active = true;
            start
        };

        if start_worker {
            self.spawn_worker();
        }
        EnqueueOutcome::Queued
    }

    fn spawn_worker(&self) {
        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drain(inner));
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("partcut-worker".to_string())
                    .spawn(move || drain(inner));
                if let Err(e) = spawned {
                    error!("Failed to start queue worker: {}", e);
                    self.inner.state.lock().worker_active = false;
                }
            }
        }
    }

    /// Entries waiting behind the in-flight one
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_processed(&self, path: &Path) -> bool {
        self.inner.state.lock().processed.contains(&queue_key(path))
    }

    pub fn processed_count(&self) -> usize {
        self.inner.state.lock().processed.len()
    }

    /// No worker running and nothing pending
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        !state.worker_active && state.pending.is_empty()
    }

    /// Wait until the worker has drained the queue
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Worker loop: pop strictly FIFO, process each entry to completion
fn drain(inner: Arc<QueueInner>) {
    debug!("Queue worker started");
    loop {
        let entry = {
            let mut state = inner.state.lock();
            match state.pending.pop_front() {
                Some(entry) => {
                    state.queued.remove(&entry.path);
                    state.in_flight = Some(entry.path.clone());
                    entry
                }
                None => {
                    state.in_flight = None;
                    state.worker_active = false;
                    break;
                }
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| inner.processor.process(&entry)));

        let mut state = inner.state.lock();
        state.in_flight = None;
        match result {
            Ok(Ok(report)) if report.is_complete() => {
                info!(
                    "Processed {:?}: {} regions written in {} ms",
                    entry.path,
                    report.artifacts.len(),
                    report.elapsed_ms
                );
                state.processed.insert(entry.path);
            }
            Ok(Ok(report)) => {
                let failed: Vec<&str> = report
                    .failed_regions
                    .iter()
                    .map(|f| f.region.name())
                    .collect();
                warn!(
                    "Incomplete {:?}: regions {:?} failed, left unprocessed",
                    entry.path, failed
                );
            }
            Ok(Err(e)) if e.is_recoverable() => {
                warn!("Skipped {:?}: {}", entry.path, e);
            }
            Ok(Err(e)) => {
                error!("Failed to process {:?}: {}", entry.path, e);
            }
            Err(_) => {
                error!("Processing {:?} panicked", entry.path);
            }
        }
    }

    debug!("Queue worker idle");
    inner.idle.notify_waiters();
}
