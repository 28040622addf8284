//! Body-part classifier and model management

pub mod classifier;
pub mod manager;
pub mod onnx;

pub use classifier::{NormalizedImage, PartClassifier, PartLabelMap};
pub use manager::ModelManager;
pub use onnx::OnnxPartClassifier;
