//! Body-part classifier abstraction

use crate::error::PipelineError;
use crate::regions::{BACKGROUND_LABEL, LABEL_COUNT};
use ndarray::{Array2, Array3};

/// Orientation-corrected RGB buffer handed to the classifier
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pixels: Array3<u8>,
}

impl NormalizedImage {
    /// Wrap a (height, width, 3) buffer
    pub fn new(pixels: Array3<u8>) -> Result<Self, PipelineError> {
        let (_, _, channels) = pixels.dim();
        if channels != 3 {
            return Err(PipelineError::Classifier(format!(
                "Expected 3 channels, got {}",
                channels
            )));
        }
        Ok(Self { pixels })
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }
}

/// Per-pixel part labels. `-1` marks background.
#[derive(Debug, Clone, PartialEq)]
pub struct PartLabelMap {
    labels: Array2<i32>,
}

impl PartLabelMap {
    /// Build a label map, rejecting labels outside `[-1, LABEL_COUNT)`
    pub fn new(labels: Array2<i32>) -> Result<Self, PipelineError> {
        if let Some(bad) = labels
            .iter()
            .find(|l| **l != BACKGROUND_LABEL && !(0..LABEL_COUNT).contains(*l))
        {
            return Err(PipelineError::Classifier(format!(
                "Label {} is outside the part domain",
                bad
            )));
        }
        Ok(Self { labels })
    }

    /// Map filled with a single label
    pub fn filled(height: usize, width: usize, label: i32) -> Result<Self, PipelineError> {
        Self::new(Array2::from_elem((height, width), label))
    }

    pub fn height(&self) -> usize {
        self.labels.dim().0
    }

    pub fn width(&self) -> usize {
        self.labels.dim().1
    }

    pub fn dim(&self) -> (usize, usize) {
        self.labels.dim()
    }

    pub fn get(&self, y: usize, x: usize) -> Option<i32> {
        self.labels.get((y, x)).copied()
    }

    pub fn as_array(&self) -> &Array2<i32> {
        &self.labels
    }
}

/// Anything that turns an image into a part label map.
///
/// Loaded once and shared read-only by the segmentation engine.
#[cfg_attr(test, mockall::automock)]
pub trait PartClassifier: Send + Sync {
    fn classify(&self, image: &NormalizedImage) -> Result<PartLabelMap, PipelineError>;
}

impl<F> PartClassifier for F
where
    F: Fn(&NormalizedImage) -> Result<PartLabelMap, PipelineError> + Send + Sync,
{
    fn classify(&self, image: &NormalizedImage) -> Result<PartLabelMap, PipelineError> {
        self(image)
    }
}
