//! Segmentation service: watcher, queue and pipeline wired together

use crate::config::ServiceConfig;
use crate::error::PipelineError;
use crate::models::{ModelManager, PartClassifier};
use crate::processing::composer::{ensure_output_tree, ArtifactSink, FsSink};
use crate::processing::pipeline::{FileProcessor, ProcessReport, SegmentationPipeline};
use crate::queue::{EnqueueOutcome, ProcessingQueue, QueueEntry};
use crate::regions::{verify_partition, REGION_TABLE};
use crate::resource::BufferTracker;
use crate::watcher::{DirectoryWatcher, WatchHandle};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolve `path` against the process working directory
pub fn resolve_dir(path: &Path) -> Result<PathBuf, PipelineError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

pub struct SegmentationService {
    config: ServiceConfig,
    tracker: Arc<BufferTracker>,
    pipeline: Arc<SegmentationPipeline>,
    queue: ProcessingQueue,
    watch: Mutex<Option<WatchHandle>>,
}

impl SegmentationService {
    /// Validate the configuration and load the classifier.
    ///
    /// A model that cannot be loaded is fatal: nothing is watched.
    pub fn initialize(config: ServiceConfig) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;

        let manager = ModelManager::new(Arc::new(config.classifier.clone()));
        let classifier = manager.load()?;
        Self::with_classifier(config, classifier)
    }

    /// Build the service around an already loaded classifier
    pub fn with_classifier(
        config: ServiceConfig,
        classifier: Arc<dyn PartClassifier>,
    ) -> Result<Self, PipelineError> {
        Self::with_sink(config, classifier, Arc::new(FsSink))
    }

    /// Build the service with a custom artifact sink
    pub fn with_sink(
        config: ServiceConfig,
        classifier: Arc<dyn PartClassifier>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;
        verify_partition(&REGION_TABLE)?;

        let tracker = BufferTracker::new();
        let pipeline = Arc::new(SegmentationPipeline::with_sink(
            classifier,
            sink,
            config.output.clone(),
            Arc::clone(&tracker),
        ));
        let queue = ProcessingQueue::new(pipeline.clone(), &config.queue);

        info!("Segmentation service initialized");
        Ok(Self {
            config,
            tracker,
            pipeline,
            queue,
            watch: Mutex::new(None),
        })
    }

    /// Watch `input_dir` and write cutouts under `output_root`.
    ///
    /// Replaces any previous watch. Re-watching the same folder keeps captures
    /// the previous watch had seen but not yet reported. The six region
    /// directories are created before this returns.
    pub fn start_watching(&self, input_dir: &Path, output_root: &Path) -> Result<(), PipelineError> {
        let input_dir = resolve_dir(input_dir)?;
        let output_root = resolve_dir(output_root)?;

        ensure_output_tree(&output_root)?;
        let mut watcher = DirectoryWatcher::new(&input_dir, self.config.watch.clone())?;
        if let Some(previous) = self.watch.lock().as_ref() {
            // Same folder: carry over captures still settling
            if previous.dir() == watcher.dir() {
                watcher = watcher.resume_from(previous.stability_state());
            }
        }

        let queue = self.queue.clone();
        let root = output_root.clone();
        let handle = watcher.spawn(move |path| match queue.enqueue(&path, &root) {
            EnqueueOutcome::Queued => {}
            EnqueueOutcome::QueueFull => warn!("Dropped {:?}: queue full", path),
            outcome => debug!("Ignored {:?}: {:?}", path, outcome),
        })?;

        if let Some(mut previous) = self.watch.lock().replace(handle) {
            previous.stop();
            info!("Replaced watch on {:?}", previous.dir());
        }

        info!("Watching {:?}, writing to {:?}", input_dir, output_root);
        Ok(())
    }

    /// Stop watching. The file being processed, and anything already queued,
    /// still completes.
    pub fn stop(&self) {
        if let Some(mut handle) = self.watch.lock().take() {
            handle.stop();
        }
    }

    /// Stop watching and wait up to `grace` for the queue to drain.
    /// Returns `true` if it drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        match tokio::time::timeout(grace, self.queue.wait_idle()).await {
            Ok(()) => {
                info!("Segmentation service shut down");
                true
            }
            Err(_) => {
                warn!(
                    "Queue still busy after {:?} ({} pending)",
                    grace,
                    self.queue.pending_len()
                );
                false
            }
        }
    }

    /// Hand `path` to the queue as if the watcher had found it
    pub fn enqueue(&self, path: &Path, output_root: &Path) -> Result<EnqueueOutcome, PipelineError> {
        let output_root = resolve_dir(output_root)?;
        Ok(self.queue.enqueue(&resolve_dir(path)?, &output_root))
    }

    /// Process one file synchronously, outside the queue
    pub fn process_file(&self, path: &Path, output_root: &Path) -> Result<ProcessReport, PipelineError> {
        let output_root = resolve_dir(output_root)?;
        ensure_output_tree(&output_root)?;
        let entry = QueueEntry {
            path: resolve_dir(path)?,
            output_root,
            enqueued_at: Utc::now(),
        };
        self.pipeline.process(&entry)
    }

    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .as_ref()
            .map(|handle| handle.is_running())
            .unwrap_or(false)
    }

    pub fn queue(&self) -> &ProcessingQueue {
        &self.queue
    }

    pub fn tracker(&self) -> &Arc<BufferTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

impl Drop for SegmentationService {
    fn drop(&mut self) {
        self.stop();
    }
}
