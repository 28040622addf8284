//! Model manager: resolves, validates and loads the classifier exactly once

use crate::config::ClassifierConfig;
use crate::error::PipelineError;
use crate::models::classifier::PartClassifier;
use crate::models::onnx::OnnxPartClassifier;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Smallest file accepted as a model; anything shorter is a truncated download
const MIN_MODEL_SIZE: u64 = 1024;

/// Loader for the shared body-part classifier
pub struct ModelManager {
    config: Arc<ClassifierConfig>,
    loaded: Mutex<Option<Arc<dyn PartClassifier>>>,
}

impl ModelManager {
    /// Create a new model manager
    pub fn new(config: Arc<ClassifierConfig>) -> Self {
        Self {
            config,
            loaded: Mutex::new(None),
        }
    }

    /// Resolve the configured model path and check that it looks like a model
    pub fn resolve_model_path(&self) -> Result<PathBuf, PipelineError> {
        let path = &self.config.model_path;
        validate_model_file(path)?;
        Ok(path.clone())
    }

    /// Load the classifier, or return the already loaded handle
    pub fn load(&self) -> Result<Arc<dyn PartClassifier>, PipelineError> {
        self.load_with(|config| {
            let classifier = OnnxPartClassifier::load(config)?;
            Ok(Arc::new(classifier) as Arc<dyn PartClassifier>)
        })
    }

    /// Load through a custom loader. The loader runs at most once per manager.
    pub fn load_with<F>(&self, loader: F) -> Result<Arc<dyn PartClassifier>, PipelineError>
    where
        F: FnOnce(&ClassifierConfig) -> Result<Arc<dyn PartClassifier>, PipelineError>,
    {
        let mut loaded = self.loaded.lock();
        if let Some(classifier) = loaded.as_ref() {
            warn!("Classifier already loaded, reusing existing handle");
            return Ok(Arc::clone(classifier));
        }

        self.resolve_model_path()?;
        let classifier = loader(&self.config)?;
        info!("Classifier ready: {:?}", self.config.model_path);

        *loaded = Some(Arc::clone(&classifier));
        Ok(classifier)
    }

    /// Check if the classifier is loaded
    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }
}

/// Check that `path` names a readable, plausibly complete `.onnx` file
pub fn validate_model_file(path: &Path) -> Result<(), PipelineError> {
    let metadata = fs::metadata(path).map_err(|e| {
        PipelineError::ModelLoad(format!("Model file {:?} is not accessible: {}", path, e))
    })?;

    if !metadata.is_file() {
        return Err(PipelineError::ModelLoad(format!(
            "Model path {:?} is not a file",
            path
        )));
    }

    let is_onnx = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("onnx"))
        .unwrap_or(false);
    if !is_onnx {
        return Err(PipelineError::ModelLoad(format!(
            "Model file {:?} must have an .onnx extension",
            path
        )));
    }

    if metadata.len() < MIN_MODEL_SIZE {
        return Err(PipelineError::ModelLoad(format!(
            "Model file {:?} is too small ({} bytes), likely corrupted",
            path,
            metadata.len()
        )));
    }

    Ok(())
}
