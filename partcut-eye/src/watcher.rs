//! Polling directory watcher with a stability window
//!
//! The input folder is rescanned every poll interval. A file is reported once
//! its size and modification time have stayed unchanged for the stability
//! window, so captures still being written are never picked up half-done.

use crate::config::WatchConfig;
use crate::error::PipelineError;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Extensions accepted as captures (compared case-insensitively)
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tiff", "webp"];

/// Whether `path` has an accepted image extension
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Whether the file name starts with a dot
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn is_candidate(path: &Path) -> bool {
    !is_hidden(path) && is_supported_image(path)
}

/// Size and modification time observed for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileSignature {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    signature: FileSignature,
    last_change: Instant,
}

/// Decides when an observed file has been quiet long enough
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    window: Duration,
    candidates: HashMap<PathBuf, Candidate>,
    reported: HashSet<PathBuf>,
}

impl StabilityTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            candidates: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    /// Treat `path` as already reported
    pub fn mark_known(&mut self, path: PathBuf) {
        self.candidates.remove(&path);
        self.reported.insert(path);
    }

    /// Record the current signature of `path`
    pub fn observe(&mut self, path: PathBuf, signature: FileSignature, now: Instant) {
        if self.reported.contains(&path) {
            return;
        }

        match self.candidates.get_mut(&path) {
            Some(candidate) if candidate.signature == signature => {}
            Some(candidate) => {
                candidate.signature = signature;
                candidate.last_change = now;
            }
            None => {
                self.candidates.insert(
                    path,
                    Candidate {
                        signature,
                        last_change: now,
                    },
                );
            }
        }
    }

    /// Forget files that disappeared from the directory. A capture deleted
    /// and written again under the same name is reported again.
    pub fn retain_present(&mut self, present: &HashSet<PathBuf>) {
        self.candidates.retain(|path, _| present.contains(path));
        self.reported.retain(|path| present.contains(path));
    }

    /// Files quiet for at least the window, each returned once.
    /// Empty files are never stable.
    pub fn take_stable(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let mut stable: Vec<PathBuf> = self
            .candidates
            .iter()
            .filter(|(_, c)| {
                c.signature.size > 0 && now.saturating_duration_since(c.last_change) >= window
            })
            .map(|(path, _)| path.clone())
            .collect();
        stable.sort();

        for path in &stable {
            self.candidates.remove(path);
            self.reported.insert(path.clone());
        }
        stable
    }

    /// Files seen but not yet stable
    pub fn pending(&self) -> usize {
        self.candidates.len()
    }

    /// Files already reported or marked known
    pub fn reported(&self) -> usize {
        self.reported.len()
    }
}

/// Watches one directory (non-recursively) for new captures
pub struct DirectoryWatcher {
    dir: PathBuf,
    config: WatchConfig,
    resume: Option<StabilityTracker>,
}

impl DirectoryWatcher {
    /// Fails with `WatchSetup` if `dir` is not a readable directory
    pub fn new(dir: impl Into<PathBuf>, config: WatchConfig) -> Result<Self, PipelineError> {
        let dir = dir.into();
        let setup_error = |reason: String| PipelineError::WatchSetup {
            path: dir.clone(),
            reason,
        };

        let metadata = fs::metadata(&dir).map_err(|e| setup_error(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(setup_error("not a directory".to_string()));
        }
        fs::read_dir(&dir).map_err(|e| setup_error(format!("unreadable: {}", e)))?;

        Ok(Self {
            dir,
            config,
            resume: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Continue from the state of an earlier watch on the same directory:
    /// files it already reported stay reported, and files still inside their
    /// stability window keep their progress. Skips the existing-file snapshot.
    pub fn resume_from(mut self, state: StabilityTracker) -> Self {
        self.resume = Some(state);
        self
    }

    /// Start polling. `on_stable` is called once for every stable capture.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(self, on_stable: F) -> Result<WatchHandle, PipelineError>
    where
        F: Fn(PathBuf) + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| PipelineError::WatchSetup {
            path: self.dir.clone(),
            reason: format!("no async runtime: {}", e),
        })?;

        let tracker = match self.resume {
            Some(state) => {
                debug!(
                    "Resuming watch on {:?} ({} pending, {} reported)",
                    self.dir,
                    state.pending(),
                    state.reported()
                );
                state
            }
            None => {
                let mut tracker = StabilityTracker::new(self.config.stability_window());
                if !self.config.process_existing {
                    let existing = snapshot(&self.dir);
                    debug!("Skipping {} existing files in {:?}", existing.len(), self.dir);
                    for path in existing {
                        tracker.mark_known(path);
                    }
                }
                tracker
            }
        };
        let tracker = Arc::new(Mutex::new(tracker));
        let state = Arc::clone(&tracker);

        let running = Arc::new(RwLock::new(true));
        let is_running = Arc::clone(&running);
        let dir = self.dir.clone();
        let poll_interval = self.config.poll_interval().max(Duration::from_millis(1));

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !*is_running.read() {
                    break;
                }

                let files = match scan_directory(&dir).await {
                    Ok(files) => files,
                    Err(e) => {
                        warn!("Failed to scan {:?}: {}", dir, e);
                        continue;
                    }
                };

                let now = Instant::now();
                let stable = {
                    let mut tracker = state.lock();
                    let mut present = HashSet::with_capacity(files.len());
                    for (path, signature) in files {
                        present.insert(path.clone());
                        tracker.observe(path, signature, now);
                    }
                    tracker.retain_present(&present);
                    tracker.take_stable(now)
                };

                for path in stable {
                    info!("New capture ready: {:?}", path);
                    on_stable(path);
                }
            }

            *is_running.write() = false;
            debug!("Watcher for {:?} stopped", dir);
        });

        info!(
            "Watching {:?} (stability window {:?}, poll {:?})",
            self.dir,
            self.config.stability_window(),
            poll_interval
        );

        Ok(WatchHandle {
            dir: self.dir,
            running,
            tracker,
            task: Some(task),
        })
    }
}

/// Accepted files currently in `dir`
fn snapshot(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_candidate(path) && path.is_file())
            .collect(),
        Err(e) => {
            warn!("Failed to list {:?}: {}", dir, e);
            Vec::new()
        }
    }
}

async fn scan_directory(dir: &Path) -> std::io::Result<Vec<(PathBuf, FileSignature)>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_candidate(&path) {
            continue;
        }

        // The file may vanish between listing and stat
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping {:?}: {}", path, e);
                continue;
            }
        };
        if metadata.is_file() {
            files.push((path, FileSignature::of(&metadata)));
        }
    }

    Ok(files)
}

/// Running watch; stops polling when dropped
pub struct WatchHandle {
    dir: PathBuf,
    running: Arc<RwLock<bool>>,
    tracker: Arc<Mutex<StabilityTracker>>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Copy of the stability state, for handing to a replacement watch
    pub fn stability_state(&self) -> StabilityTracker {
        self.tracker.lock().clone()
    }

    /// Stop polling. Files already handed off are unaffected.
    pub fn stop(&mut self) {
        *self.running.write() = false;
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Stopped watching {:?}", self.dir);
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
