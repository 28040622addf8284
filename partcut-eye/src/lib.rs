//! partcut-eye: body-part cutouts for captured photographs
//!
//! Watches a folder for new captures, segments each person into body parts
//! with an ONNX classifier, groups the parts into six anatomical regions and
//! writes one masked PNG per region into a region-keyed output tree.

pub mod config;
pub mod error;
pub mod models;
pub mod orientation;
pub mod processing;
pub mod queue;
pub mod regions;
pub mod resource;
pub mod service;
pub mod utils;
pub mod watcher;

pub use config::{ClassifierConfig, Device, OutputConfig, QueueConfig, ServiceConfig, WatchConfig};
pub use error::PipelineError;
pub use models::{ModelManager, NormalizedImage, OnnxPartClassifier, PartClassifier, PartLabelMap};
pub use processing::{FileProcessor, OutputArtifact, ProcessReport, SegmentationPipeline};
pub use queue::{EnqueueOutcome, ProcessingQueue, QueueEntry};
pub use regions::Region;
pub use resource::{BufferKind, BufferTracker};
pub use service::SegmentationService;
pub use watcher::DirectoryWatcher;
