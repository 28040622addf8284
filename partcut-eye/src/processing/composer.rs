//! Cutout composer: masks applied to the original capture, one PNG per region

use crate::error::PipelineError;
use crate::models::PartLabelMap;
use crate::orientation;
use crate::processing::mapper::RegionMask;
use crate::regions::{Region, BACKGROUND_LABEL};
use crate::resource::{BufferKind, BufferTracker, Transient};
use crate::utils::{decode_rgb, encode_png_gray, encode_png_rgb};
use image::{GrayImage, Luma};
use ndarray::{Array2, Array3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Destination for encoded artifacts
pub trait ArtifactSink: Send + Sync {
    /// Write `bytes` to `path`, replacing any previous content
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// Writes artifacts to the local filesystem.
///
/// Content goes to a temporary sibling first and is renamed into place, so a
/// crash never leaves a truncated PNG under the final name.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSink;

impl ArtifactSink for FsSink {
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut temp_name = path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            e
        })
    }
}

/// One saved region image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub region: Region,
    pub path: PathBuf,
    /// Pixels kept from the original
    pub pixel_count: usize,
}

/// A region that could not be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFailure {
    pub region: Region,
    pub reason: String,
}

impl RegionFailure {
    pub fn into_error(self) -> PipelineError {
        PipelineError::Composition {
            region: self.region,
            reason: self.reason,
        }
    }
}

/// Result of composing every region of one capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionOutcome {
    pub artifacts: Vec<OutputArtifact>,
    pub failures: Vec<RegionFailure>,
}

/// `output_root/<region>/<region>_<stem>.png`
pub fn artifact_path(output_root: &Path, region: Region, stem: &str) -> PathBuf {
    output_root
        .join(region.name())
        .join(format!("{}_{}.png", region.name(), stem))
}

/// Create the six region directories under `output_root`
pub fn ensure_output_tree(output_root: &Path) -> io::Result<()> {
    for region in Region::ALL {
        fs::create_dir_all(output_root.join(region.name()))?;
    }
    Ok(())
}

/// File stem used in artifact names
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string())
}

/// Copy of `image` with every pixel outside `mask` set to zero
pub fn apply_mask(image: &Array3<u8>, mask: &Array2<bool>) -> Array3<u8> {
    let mut cutout = image.clone();
    Zip::from(cutout.lanes_mut(Axis(2)))
        .and(mask)
        .for_each(|mut pixel, keep| {
            if !*keep {
                pixel.fill(0);
            }
        });
    cutout
}

/// Grayscale rendering of a label map; background is 255
pub fn label_map_image(label_map: &PartLabelMap) -> GrayImage {
    let (height, width) = label_map.dim();
    let labels = label_map.as_array();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let label = labels[[y as usize, x as usize]];
        if label == BACKGROUND_LABEL {
            Luma([255])
        } else {
            Luma([label as u8])
        }
    })
}

pub struct CutoutComposer {
    sink: Arc<dyn ArtifactSink>,
    tracker: Arc<BufferTracker>,
}

impl CutoutComposer {
    pub fn new(sink: Arc<dyn ArtifactSink>, tracker: Arc<BufferTracker>) -> Self {
        Self { sink, tracker }
    }

    /// Write one cutout per mask.
    ///
    /// The original is decoded again from `source`. A region that fails is
    /// recorded in the outcome and the remaining regions are still written;
    /// only a failure to decode the original is returned as an error.
    pub fn compose(
        &self,
        source: &Path,
        masks: Vec<Transient<RegionMask>>,
        output_root: &Path,
    ) -> Result<CompositionOutcome, PipelineError> {
        let mut outcome = CompositionOutcome::default();
        let mask_dims = match masks.first() {
            Some(mask) => mask.dim(),
            None => return Ok(outcome),
        };

        let bytes = fs::read(source)?;
        let decoded = self
            .tracker
            .track(BufferKind::SourceImage, decode_rgb(source, &bytes)?);
        drop(bytes);

        let aligned = self.tracker.track(
            BufferKind::SourceImage,
            orientation::align_for_composition(&*decoded, mask_dims),
        );
        decoded.release();

        let (height, width, _) = aligned.dim();
        if (height, width) != mask_dims {
            let reason = format!(
                "dimension mismatch: image is {}x{}, mask is {}x{}",
                width, height, mask_dims.1, mask_dims.0
            );
            warn!("Cannot compose {:?}: {}", source, reason);
            outcome.failures = masks
                .iter()
                .map(|mask| RegionFailure {
                    region: mask.region,
                    reason: reason.clone(),
                })
                .collect();
            return Ok(outcome);
        }

        let stem = file_stem(source);
        for mask in masks {
            let region = mask.region;
            match self.write_region(&aligned, &mask, output_root, &stem) {
                Ok(artifact) => {
                    debug!("Wrote {} cutout to {:?}", region, artifact.path);
                    outcome.artifacts.push(artifact);
                }
                Err(e) => {
                    warn!("Failed to write {} cutout for {:?}: {}", region, source, e);
                    outcome.failures.push(RegionFailure {
                        region,
                        reason: e.to_string(),
                    });
                }
            }
            // Mask is released here, before the next region is composed
        }

        info!(
            "Composed {:?}: {} regions written, {} failed",
            source,
            outcome.artifacts.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    fn write_region(
        &self,
        image: &Array3<u8>,
        mask: &RegionMask,
        output_root: &Path,
        stem: &str,
    ) -> Result<OutputArtifact, PipelineError> {
        let region = mask.region;
        let cutout = self
            .tracker
            .track(BufferKind::Cutout, apply_mask(image, &mask.mask));
        let png = encode_png_rgb(&cutout).map_err(|e| PipelineError::Composition {
            region,
            reason: format!("PNG encoding failed: {}", e),
        })?;
        cutout.release();

        let path = artifact_path(output_root, region, stem);
        self.sink
            .write(&path, &png)
            .map_err(|e| PipelineError::Composition {
                region,
                reason: format!("write to {:?} failed: {}", path, e),
            })?;

        Ok(OutputArtifact {
            region,
            path,
            pixel_count: mask.pixel_count,
        })
    }

    /// Write the raw label map as `output_root/<stem>_full_segmentation.png`
    pub fn write_label_map(
        &self,
        label_map: &PartLabelMap,
        output_root: &Path,
        stem: &str,
    ) -> Result<PathBuf, PipelineError> {
        let png = encode_png_gray(&label_map_image(label_map))?;
        let path = output_root.join(format!("{}_full_segmentation.png", stem));
        self.sink.write(&path, &png)?;
        Ok(path)
    }

    /// Write `bytes` as `output_root/<stem>_summary.json`
    pub fn write_summary(
        &self,
        json: &[u8],
        output_root: &Path,
        stem: &str,
    ) -> Result<PathBuf, PipelineError> {
        let path = output_root.join(format!("{}_summary.json", stem));
        self.sink.write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::mapper::RegionMapper;
    use image::{Rgb, RgbImage};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Records writes in memory and fails for one region
    #[derive(Default)]
    struct RecordingSink {
        fail_on: Option<Region>,
        written: Mutex<Vec<PathBuf>>,
    }

    impl ArtifactSink for RecordingSink {
        fn write(&self, path: &Path, _bytes: &[u8]) -> io::Result<()> {
            if let Some(region) = self.fail_on {
                let prefix = format!("{}_", region.name());
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                if name.starts_with(&prefix) {
                    return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
                }
            }
            self.written.lock().push(path.to_path_buf());
            Ok(())
        }
    }

    fn capture(dir: &TempDir, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join("shot.png");
        RgbImage::from_pixel(width, height, Rgb([9, 90, 200]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_artifact_path_layout() {
        let path = artifact_path(Path::new("/out"), Region::LeftArm, "IMG_001");
        assert_eq!(path, PathBuf::from("/out/left_arm/left_arm_IMG_001.png"));
    }

    #[test]
    fn test_apply_mask_zeroes_outside() {
        let image = Array3::<u8>::from_elem((2, 2, 3), 50);
        let mut mask = Array2::from_elem((2, 2), false);
        mask[[1, 0]] = true;
        let cutout = apply_mask(&image, &mask);
        assert_eq!(cutout[[1, 0, 2]], 50);
        assert_eq!(cutout[[0, 0, 0]], 0);
        assert_eq!(cutout[[1, 1, 1]], 0);
    }

    #[test]
    fn test_label_map_background_is_white() {
        let mut labels = Array2::from_elem((1, 2), BACKGROUND_LABEL);
        labels[[0, 1]] = 13;
        let image = label_map_image(&PartLabelMap::new(labels).unwrap());
        assert_eq!(image.get_pixel(0, 0)[0], 255);
        assert_eq!(image.get_pixel(1, 0)[0], 13);
    }

    #[test]
    fn test_region_failure_is_isolated() {
        let dir = TempDir::new().unwrap();
        let source = capture(&dir, 8, 8);
        let tracker = BufferTracker::new();
        let sink = Arc::new(RecordingSink {
            fail_on: Some(Region::Torso),
            ..Default::default()
        });
        let composer = CutoutComposer::new(sink.clone(), Arc::clone(&tracker));

        let map = PartLabelMap::filled(8, 8, 12).unwrap();
        let masks = RegionMapper::new(Arc::clone(&tracker)).map_regions(&map);
        let outcome = composer.compose(&source, masks, Path::new("/out")).unwrap();

        assert_eq!(outcome.artifacts.len(), 5);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].region, Region::Torso);
        assert_eq!(sink.written.lock().len(), 5);
        assert_eq!(tracker.total_live(), 0);
    }

    #[test]
    fn test_dimension_mismatch_fails_every_region() {
        let dir = TempDir::new().unwrap();
        let source = capture(&dir, 8, 8);
        let tracker = BufferTracker::new();
        let composer = CutoutComposer::new(Arc::new(RecordingSink::default()), Arc::clone(&tracker));

        let map = PartLabelMap::filled(5, 7, 0).unwrap();
        let masks = RegionMapper::new(Arc::clone(&tracker)).map_regions(&map);
        let outcome = composer.compose(&source, masks, Path::new("/out")).unwrap();

        assert!(outcome.artifacts.is_empty());
        assert_eq!(outcome.failures.len(), 6);
        assert!(outcome.failures[0].reason.contains("dimension mismatch"));
        assert_eq!(tracker.total_live(), 0);
    }

    #[test]
    fn test_fs_sink_overwrites_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("head").join("head_a.png");
        FsSink.write(&path, b"first").unwrap();
        FsSink.write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_ensure_output_tree() {
        let dir = TempDir::new().unwrap();
        ensure_output_tree(dir.path()).unwrap();
        for region in Region::ALL {
            assert!(dir.path().join(region.name()).is_dir());
        }
    }
}
