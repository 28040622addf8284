//! Error types for partcut-eye

use crate::regions::Region;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Watch setup error for {path:?}: {reason}")]
    WatchSetup { path: PathBuf, reason: String },

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Decode error for {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Composition error for region {region}: {reason}")]
    Composition { region: Region, reason: String },

    #[error("Region table error: {0}")]
    RegionTable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),
}

impl PipelineError {
    /// Whether the error only affects the file (or region) being processed.
    ///
    /// The queue worker logs recoverable errors as warnings and skips the
    /// file; anything else is logged as an error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode { .. }
                | PipelineError::Classifier(_)
                | PipelineError::Composition { .. }
                | PipelineError::Io(_)
                | PipelineError::Image(_)
                | PipelineError::Ort(_)
        )
    }
}

impl From<ort::Error> for PipelineError {
    fn from(err: ort::Error) -> Self {
        PipelineError::Ort(err.to_string())
    }
}
