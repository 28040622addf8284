//! ONNX Runtime body-part classifier

use crate::config::{ClassifierConfig, Device};
use crate::error::PipelineError;
use crate::models::classifier::{NormalizedImage, PartClassifier, PartLabelMap};
use crate::regions::{BACKGROUND_LABEL, LABEL_COUNT};
use crate::utils::{apply_normalization, array_to_rgb_image, resize_labels_nearest, rgb_to_chw_tensor};
use ndarray::Array2;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

/// Part classifier backed by an ONNX segmentation model.
///
/// The model takes a `[1, 3, H, W]` normalized RGB tensor. Its first output is
/// `[1, C, h, w]` logits: with `C == 24` each channel is a part label and an
/// optional second `[1, 1, h, w]` output carries a person logit; with
/// `C == 25` channel 0 is background.
pub struct OnnxPartClassifier {
    session: Mutex<Session>,
    input_size: (u32, u32),
    mean: [f32; 3],
    std: [f32; 3],
    person_threshold: f32,
}

impl OnnxPartClassifier {
    /// Load the model described by `config`
    pub fn load(config: &ClassifierConfig) -> Result<Self, PipelineError> {
        let session = build_session(&config.model_path, config.device, config.intra_threads)?;

        info!(
            "Body-part classifier loaded from {:?} (device: {}, input {}x{})",
            config.model_path, config.device, config.input_size.0, config.input_size.1
        );

        Ok(Self {
            session: Mutex::new(session),
            input_size: config.input_size,
            mean: config.mean,
            std: config.std,
            person_threshold: config.person_threshold,
        })
    }

    fn preprocess(&self, image: &NormalizedImage) -> Result<Vec<f32>, PipelineError> {
        let rgb = array_to_rgb_image(image.pixels())
            .ok_or_else(|| PipelineError::Classifier("Image buffer is not RGB".to_string()))?;
        let mut data = rgb_to_chw_tensor(&rgb, self.input_size.0, self.input_size.1)?;
        apply_normalization(&mut data, &self.mean, &self.std);
        Ok(data)
    }
}

fn build_session(model_path: &Path, device: Device, intra_threads: usize) -> Result<Session, PipelineError> {
    let mut builder = Session::builder()
        .map_err(|e| PipelineError::ModelLoad(format!("Failed to create session builder: {}", e)))?;

    if intra_threads > 0 {
        builder = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| PipelineError::ModelLoad(format!("Failed to set thread count: {}", e)))?;
    }

    let providers = match device {
        Device::Cpu => vec![CPUExecutionProvider::default().build()],
        Device::Cuda => vec![CUDAExecutionProvider::default().build().error_on_failure()],
        // CUDA is registered if available, otherwise ONNX Runtime stays on CPU
        Device::Auto => vec![
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ],
    };
    builder = builder
        .with_execution_providers(providers)
        .map_err(|e| PipelineError::ModelLoad(format!("Failed to register {} provider: {}", device, e)))?;

    builder
        .commit_from_file(model_path)
        .map_err(|e| PipelineError::ModelLoad(format!("Failed to load model {:?}: {}", model_path, e)))
}

impl PartClassifier for OnnxPartClassifier {
    fn classify(&self, image: &NormalizedImage) -> Result<PartLabelMap, PipelineError> {
        let (width, height) = self.input_size;
        let data = self.preprocess(image)?;
        let input = Tensor::from_array(([1usize, 3, height as usize, width as usize], data))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| PipelineError::Classifier(format!("Inference failed: {}", e)))?;

        if outputs.len() == 0 {
            return Err(PipelineError::Classifier("Model produced no outputs".to_string()));
        }

        let (shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Classifier(format!("Failed to extract logits: {}", e)))?;
        let dims: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();

        let person = if outputs.len() > 1 {
            match outputs[1].try_extract_tensor::<f32>() {
                Ok((shape, data)) => {
                    let person_dims: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();
                    Some((person_dims, data))
                }
                Err(e) => {
                    debug!("Ignoring second model output: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let labels = decode_logits(
            &dims,
            logits,
            person.as_ref().map(|(d, v)| (d.as_slice(), *v)),
            self.person_threshold,
        )?;

        drop(outputs);
        drop(session);

        PartLabelMap::new(resize_labels_nearest(&labels, image.height(), image.width()))
    }
}

/// Turn `[1, C, h, w]` logits into an `h × w` label grid.
///
/// `person` is an optional `[1, 1, h, w]` person logit; pixels whose sigmoid
/// falls below `person_threshold` become background.
pub fn decode_logits(
    dims: &[usize],
    logits: &[f32],
    person: Option<(&[usize], &[f32])>,
    person_threshold: f32,
) -> Result<Array2<i32>, PipelineError> {
    if dims.len() != 4 || dims[0] != 1 {
        return Err(PipelineError::Classifier(format!(
            "Unexpected logits shape {:?}, expected [1, C, H, W]",
            dims
        )));
    }
    let (channels, height, width) = (dims[1], dims[2], dims[3]);
    let with_background = match channels as i32 {
        c if c == LABEL_COUNT => false,
        c if c == LABEL_COUNT + 1 => true,
        _ => {
            return Err(PipelineError::Classifier(format!(
                "Model emits {} classes, expected {} or {}",
                channels,
                LABEL_COUNT,
                LABEL_COUNT + 1
            )))
        }
    };

    let plane = height * width;
    if plane == 0 || logits.len() != channels * plane {
        return Err(PipelineError::Classifier(format!(
            "Logits length {} does not match shape {:?}",
            logits.len(),
            dims
        )));
    }

    let person = match person {
        Some((pdims, pdata)) if pdims.iter().product::<usize>() == plane && pdata.len() == plane => {
            Some(pdata)
        }
        Some((pdims, _)) => {
            debug!("Person output shape {:?} does not match logits, ignoring", pdims);
            None
        }
        None => None,
    };

    let mut labels = Array2::from_elem((height, width), BACKGROUND_LABEL);
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;

            let mut best = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..channels {
                let score = logits[c * plane + idx];
                if score.is_finite() && score > best_score {
                    best_score = score;
                    best = c;
                }
            }

            let label = if with_background {
                if best == 0 {
                    BACKGROUND_LABEL
                } else {
                    best as i32 - 1
                }
            } else {
                best as i32
            };

            let is_person = person
                .map(|p| sigmoid(p[idx]) >= person_threshold)
                .unwrap_or(true);

            labels[[y, x]] = if is_person { label } else { BACKGROUND_LABEL };
        }
    }

    Ok(labels)
}

fn sigmoid(x: f32) -> f32 {
    if !x.is_finite() {
        return if x > 0.0 { 1.0 } else { 0.0 };
    }
    1.0 / (1.0 + (-x).exp())
}
