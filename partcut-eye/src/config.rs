//! Configuration for partcut-eye

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Execution device for the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Try CUDA, fall back to CPU
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for Device {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda),
            other => Err(PipelineError::Config(format!(
                "Unknown device '{}' (expected auto, cpu or cuda)",
                other
            ))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        };
        f.write_str(name)
    }
}

/// Directory watching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Folder the capture UI drops finished photographs into
    pub input_dir: PathBuf,
    /// Quiet period after the last write before a file is eligible
    pub stability_window_ms: u64,
    /// How often the folder is rescanned
    pub poll_interval_ms: u64,
    /// Ingest files already present when watching starts
    pub process_existing: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("captures"),
            stability_window_ms: 1000,
            poll_interval_ms: 100,
            process_existing: false,
        }
    }
}

impl WatchConfig {
    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Processing queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of entries waiting behind the in-flight one
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_pending: 100 }
    }
}

/// Output tree settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of the region-keyed output tree
    pub output_dir: PathBuf,
    /// Also write the raw label map as `<stem>_full_segmentation.png`
    pub save_label_map: bool,
    /// Also write `<stem>_summary.json` with the processing report
    pub write_manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            save_label_map: false,
            write_manifest: false,
        }
    }
}

/// Load-time parameters of the ONNX body-part classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Path to the `.onnx` model file
    pub model_path: PathBuf,
    pub device: Device,
    /// Model input resolution (width, height)
    pub input_size: (u32, u32),
    /// Per-channel normalization mean (RGB, on a 0..1 scale)
    pub mean: [f32; 3],
    /// Per-channel normalization std (RGB, on a 0..1 scale)
    pub std: [f32; 3],
    /// Person probability below which a pixel is background
    pub person_threshold: f32,
    /// Intra-op threads for inference (0 = runtime default)
    pub intra_threads: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let model_path = dirs::home_dir()
            .map(|mut p| {
                p.push(".partcut");
                p.push("models");
                p.push("body_parts.onnx");
                p
            })
            .unwrap_or_else(|| PathBuf::from("./models/body_parts.onnx"));

        Self {
            model_path,
            device: Device::Auto,
            input_size: (768, 1024),
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            person_threshold: 0.5,
            intra_threads: 0,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub watch: WatchConfig,
    pub queue: QueueConfig,
    pub output: OutputConfig,
    pub classifier: ClassifierConfig,
}

impl ServiceConfig {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text)
            .map_err(|e| PipelineError::Config(format!("Invalid config: {}", e)))
    }

    pub fn to_toml_string(&self) -> Result<String, PipelineError> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.watch.poll_interval_ms == 0 || self.watch.poll_interval_ms > 60_000 {
            return Err("Poll interval must be between 1ms and 60s".to_string());
        }

        if self.watch.stability_window_ms < self.watch.poll_interval_ms {
            return Err("Stability window must be at least one poll interval".to_string());
        }

        if self.queue.max_pending == 0 || self.queue.max_pending > 10_000 {
            return Err("Queue capacity must be between 1 and 10000".to_string());
        }

        let (width, height) = self.classifier.input_size;
        if width == 0 || height == 0 {
            return Err("Classifier input size must be non-zero".to_string());
        }
        if width > 4096 || height > 4096 {
            return Err("Classifier input size too large (max 4096)".to_string());
        }

        if self
            .classifier
            .std
            .iter()
            .any(|s| !s.is_finite() || *s <= 0.0)
        {
            return Err("Normalization std must be finite and positive".to_string());
        }
        if self.classifier.mean.iter().any(|m| !m.is_finite()) {
            return Err("Normalization mean must be finite".to_string());
        }

        let threshold = self.classifier.person_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err("Person threshold must be between 0 and 1".to_string());
        }

        Ok(())
    }
}
