//! Segmentation engine: file bytes to part label map

use crate::error::PipelineError;
use crate::models::{NormalizedImage, PartClassifier, PartLabelMap};
use crate::orientation;
use crate::resource::{BufferKind, BufferTracker, Transient};
use crate::utils::decode_rgb;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Runs the orientation heuristic and the shared classifier on one file
pub struct SegmentationEngine {
    classifier: Arc<dyn PartClassifier>,
    tracker: Arc<BufferTracker>,
}

impl SegmentationEngine {
    /// Create a new segmentation engine
    pub fn new(classifier: Arc<dyn PartClassifier>, tracker: Arc<BufferTracker>) -> Self {
        Self { classifier, tracker }
    }

    /// Decode `path`, correct its orientation and classify every pixel.
    ///
    /// The label map has the dimensions of the orientation-corrected image.
    pub fn segment(&self, path: &Path) -> Result<Transient<PartLabelMap>, PipelineError> {
        let bytes = fs::read(path)?;
        let source = self
            .tracker
            .track(BufferKind::SourceImage, decode_rgb(path, &bytes)?);
        drop(bytes);

        let (height, width, _) = source.dim();
        let canonical = orientation::canonicalize(&*source);
        source.release();
        let (corrected, rotation) = orientation::correct_rotation(&canonical);
        drop(canonical);
        debug!(
            "Segmenting {:?}: {}x{} decoded, rotation {:?}",
            path, width, height, rotation
        );

        let normalized = self
            .tracker
            .track(BufferKind::NormalizedImage, NormalizedImage::new(corrected)?);
        let expected = (normalized.height(), normalized.width());

        let result = self.classifier.classify(&normalized);
        normalized.release();

        let labels = result?;
        if labels.dim() != expected {
            return Err(PipelineError::Classifier(format!(
                "Label map is {}x{}, expected {}x{}",
                labels.width(),
                labels.height(),
                expected.1,
                expected.0
            )));
        }

        debug!("Label map ready for {:?}", path);
        Ok(self.tracker.track(BufferKind::LabelMap, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classifier::MockPartClassifier;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let path = dir.path().join(name);
        RgbImage::from_pixel(width, height, Rgb([200, 100, 50]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_segment_passes_corrected_image() {
        let dir = TempDir::new().unwrap();
        // 100 wide, 200 tall: canonicalized to 200x100 wide, rotated back
        let path = write_png(&dir, "tall.png", 100, 200);

        let mut mock = MockPartClassifier::new();
        mock.expect_classify()
            .withf(|image| image.height() == 200 && image.width() == 100)
            .times(1)
            .returning(|image| PartLabelMap::filled(image.height(), image.width(), 12));

        let tracker = BufferTracker::new();
        let engine = SegmentationEngine::new(Arc::new(mock), Arc::clone(&tracker));
        let labels = engine.segment(&path).unwrap();
        assert_eq!(labels.dim(), (200, 100));
        assert_eq!(tracker.live(BufferKind::NormalizedImage), 0);
        assert_eq!(tracker.live(BufferKind::LabelMap), 1);
        drop(labels);
        assert_eq!(tracker.total_live(), 0);
    }

    #[test]
    fn test_wrong_label_dimensions_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "square.png", 8, 8);

        let mut mock = MockPartClassifier::new();
        mock.expect_classify()
            .returning(|_| PartLabelMap::filled(4, 4, 0));

        let tracker = BufferTracker::new();
        let engine = SegmentationEngine::new(Arc::new(mock), Arc::clone(&tracker));
        assert!(matches!(
            engine.segment(&path),
            Err(PipelineError::Classifier(_))
        ));
        assert_eq!(tracker.total_live(), 0);
    }

    #[test]
    fn test_classifier_failure_releases_buffers() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "a.png", 8, 8);

        let mut mock = MockPartClassifier::new();
        mock.expect_classify()
            .returning(|_| Err(PipelineError::Classifier("no person".to_string())));

        let tracker = BufferTracker::new();
        let engine = SegmentationEngine::new(Arc::new(mock), Arc::clone(&tracker));
        assert!(engine.segment(&path).is_err());
        assert_eq!(tracker.total_live(), 0);
        assert_eq!(tracker.created(BufferKind::NormalizedImage), 1);
    }

    #[test]
    fn test_undecodable_file_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"definitely not a png").unwrap();

        let mock = MockPartClassifier::new();
        let tracker = BufferTracker::new();
        let engine = SegmentationEngine::new(Arc::new(mock), Arc::clone(&tracker));
        assert!(matches!(
            engine.segment(&path),
            Err(PipelineError::Decode { .. })
        ));
        assert_eq!(tracker.total_live(), 0);
    }
}
