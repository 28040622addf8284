//! Per-file processing stages

pub mod composer;
pub mod mapper;
pub mod pipeline;
pub mod segmentation;

pub use composer::{ArtifactSink, CompositionOutcome, CutoutComposer, FsSink, OutputArtifact, RegionFailure};
pub use mapper::{RegionMapper, RegionMask};
pub use pipeline::{FileProcessor, ProcessReport, SegmentationPipeline};
pub use segmentation::SegmentationEngine;
