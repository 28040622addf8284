//! Per-file pipeline: segmentation, region mapping, composition

use crate::config::OutputConfig;
use crate::error::PipelineError;
use crate::models::PartClassifier;
use crate::processing::composer::{
    file_stem, ArtifactSink, CutoutComposer, FsSink, OutputArtifact, RegionFailure,
};
use crate::processing::mapper::RegionMapper;
use crate::processing::segmentation::SegmentationEngine;
use crate::queue::QueueEntry;
use crate::resource::BufferTracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Work the queue worker runs for each entry.
///
/// A report with failed regions is still returned as `Ok` so the written
/// artifacts stay visible; it is not complete, and the capture is not marked
/// processed.
pub trait FileProcessor: Send + Sync {
    fn process(&self, entry: &QueueEntry) -> Result<ProcessReport, PipelineError>;
}

/// Outcome of processing one capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub source: PathBuf,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub artifacts: Vec<OutputArtifact>,
    pub failed_regions: Vec<RegionFailure>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub label_map: Option<PathBuf>,
}

impl ProcessReport {
    pub fn new(source: PathBuf, started_at: DateTime<Utc>) -> Self {
        Self {
            source,
            started_at,
            elapsed_ms: 0,
            artifacts: Vec::new(),
            failed_regions: Vec::new(),
            label_map: None,
        }
    }

    /// Every region was written. Only complete captures count as processed.
    pub fn is_complete(&self) -> bool {
        self.failed_regions.is_empty()
    }
}

/// Segmentation engine, region mapper and cutout composer run back to back
pub struct SegmentationPipeline {
    engine: SegmentationEngine,
    mapper: RegionMapper,
    composer: CutoutComposer,
    output: OutputConfig,
}

impl SegmentationPipeline {
    /// Create a pipeline writing to the local filesystem
    pub fn new(
        classifier: Arc<dyn PartClassifier>,
        output: OutputConfig,
        tracker: Arc<BufferTracker>,
    ) -> Self {
        Self::with_sink(classifier, Arc::new(FsSink), output, tracker)
    }

    /// Create a pipeline writing through a custom sink
    pub fn with_sink(
        classifier: Arc<dyn PartClassifier>,
        sink: Arc<dyn ArtifactSink>,
        output: OutputConfig,
        tracker: Arc<BufferTracker>,
    ) -> Self {
        Self {
            engine: SegmentationEngine::new(classifier, Arc::clone(&tracker)),
            mapper: RegionMapper::new(Arc::clone(&tracker)),
            composer: CutoutComposer::new(sink, tracker),
            output,
        }
    }
}

impl FileProcessor for SegmentationPipeline {
    fn process(&self, entry: &QueueEntry) -> Result<ProcessReport, PipelineError> {
        let start = Instant::now();
        let mut report = ProcessReport::new(entry.path.clone(), Utc::now());
        let stem = file_stem(&entry.path);

        let labels = self.engine.segment(&entry.path)?;
        let masks = self.mapper.map_regions(&labels);

        if self.output.save_label_map {
            match self
                .composer
                .write_label_map(&labels, &entry.output_root, &stem)
            {
                Ok(path) => report.label_map = Some(path),
                Err(e) => warn!("Failed to save label map for {:?}: {}", entry.path, e),
            }
        }
        labels.release();

        let outcome = self
            .composer
            .compose(&entry.path, masks, &entry.output_root)?;

        if outcome.artifacts.is_empty() {
            if let Some(first) = outcome.failures.into_iter().next() {
                return Err(first.into_error());
            }
        } else {
            report.artifacts = outcome.artifacts;
            report.failed_regions = outcome.failures;
        }
        report.elapsed_ms = start.elapsed().as_millis() as u64;

        if self.output.write_manifest {
            let written = serde_json::to_vec_pretty(&report)
                .map_err(|e| PipelineError::Config(format!("Failed to serialize report: {}", e)))
                .and_then(|json| self.composer.write_summary(&json, &entry.output_root, &stem));
            match written {
                Ok(path) => debug!("Wrote summary {:?}", path),
                Err(e) => warn!("Failed to write summary for {:?}: {}", entry.path, e),
            }
        }

        Ok(report)
    }
}
