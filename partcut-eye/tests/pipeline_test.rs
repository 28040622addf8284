//! End-to-end tests for the segmentation pipeline

use image::{Rgb, RgbImage};
use ndarray::Array2;
use parking_lot::Mutex;
use partcut_eye::processing::ArtifactSink;
use partcut_eye::processing::FsSink;
use partcut_eye::{
    EnqueueOutcome, NormalizedImage, PartClassifier, PartLabelMap, PipelineError, Region,
    SegmentationService, ServiceConfig,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const COLOR: [u8; 3] = [200, 120, 40];

fn write_capture(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb(COLOR))
        .save(&path)
        .unwrap();
    path
}

/// Label map all head (0) except a 10x10 torso (12) block in the top-left corner
fn corner_classifier() -> Arc<dyn PartClassifier> {
    Arc::new(|image: &NormalizedImage| {
        let mut labels = Array2::from_elem((image.height(), image.width()), 0);
        for y in 0..10 {
            for x in 0..10 {
                labels[[y, x]] = 12;
            }
        }
        PartLabelMap::new(labels)
    })
}

fn artifact_count(output: &Path) -> usize {
    Region::ALL
        .iter()
        .map(|region| {
            std::fs::read_dir(output.join(region.name()))
                .map(|entries| entries.count())
                .unwrap_or(0)
        })
        .sum()
}

fn is_black(pixel: &Rgb<u8>) -> bool {
    pixel.0 == [0, 0, 0]
}

#[test]
fn test_end_to_end_cutouts() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = write_capture(input.path(), "person.png", 100, 200);

    let service =
        SegmentationService::with_classifier(ServiceConfig::default(), corner_classifier()).unwrap();
    let report = service.process_file(&source, output.path()).unwrap();

    assert_eq!(report.artifacts.len(), 6);
    assert!(report.failed_regions.is_empty());
    assert_eq!(artifact_count(output.path()), 6);

    let head = image::open(output.path().join("head/head_person.png"))
        .unwrap()
        .to_rgb8();
    assert_eq!(head.dimensions(), (100, 200));
    let torso = image::open(output.path().join("torso/torso_person.png"))
        .unwrap()
        .to_rgb8();
    assert_eq!(torso.dimensions(), (100, 200));

    // Torso keeps exactly the 10x10 corner block, head keeps everything else
    for (x, y, pixel) in torso.enumerate_pixels() {
        let in_corner = x < 10 && y < 10;
        let head_pixel = head.get_pixel(x, y);
        if in_corner {
            assert_eq!(pixel.0, COLOR, "torso ({}, {})", x, y);
            assert!(is_black(head_pixel), "head ({}, {})", x, y);
        } else {
            assert!(is_black(pixel), "torso ({}, {})", x, y);
            assert_eq!(head_pixel.0, COLOR, "head ({}, {})", x, y);
        }
    }

    for region in [Region::LeftArm, Region::RightArm, Region::LeftLeg, Region::RightLeg] {
        let path = output
            .path()
            .join(region.name())
            .join(format!("{}_person.png", region.name()));
        let cutout = image::open(path).unwrap().to_rgb8();
        assert!(cutout.pixels().all(is_black), "{} should be black", region);
    }

    let torso_artifact = report
        .artifacts
        .iter()
        .find(|a| a.region == Region::Torso)
        .unwrap();
    assert_eq!(torso_artifact.pixel_count, 100);
    assert_eq!(service.tracker().total_live(), 0);
}

/// Filesystem sink that refuses to write one region
struct FailingSink {
    region: Region,
}

impl ArtifactSink for FailingSink {
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name.starts_with(&format!("{}_", self.region.name())) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        FsSink.write(path, bytes)
    }
}

#[test]
fn test_region_failure_leaves_other_artifacts() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = write_capture(input.path(), "shot.png", 40, 40);

    let service = SegmentationService::with_sink(
        ServiceConfig::default(),
        corner_classifier(),
        Arc::new(FailingSink {
            region: Region::Torso,
        }),
    )
    .unwrap();

    let report = service.process_file(&source, output.path()).unwrap();
    assert_eq!(report.artifacts.len(), 5);
    assert_eq!(report.failed_regions.len(), 1);
    assert_eq!(report.failed_regions[0].region, Region::Torso);
    assert_eq!(artifact_count(output.path()), 5);
    assert!(!output.path().join("torso/torso_shot.png").exists());
    assert_eq!(service.tracker().total_live(), 0);
}

/// Filesystem sink whose torso writes fail until switched off
struct FlakyTorsoSink {
    failing: AtomicBool,
}

impl ArtifactSink for FlakyTorsoSink {
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name.starts_with("torso_") && self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk busy"));
        }
        FsSink.write(path, bytes)
    }
}

#[tokio::test]
async fn test_partial_capture_is_retried_on_next_event() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = write_capture(input.path(), "retry.png", 20, 20);
    let torso = output.path().join("torso/torso_retry.png");

    let sink = Arc::new(FlakyTorsoSink {
        failing: AtomicBool::new(true),
    });
    let service =
        SegmentationService::with_sink(ServiceConfig::default(), corner_classifier(), sink.clone())
            .unwrap();

    assert_eq!(
        service.enqueue(&source, output.path()).unwrap(),
        EnqueueOutcome::Queued
    );
    service.queue().wait_idle().await;

    assert!(!torso.exists());
    assert_eq!(artifact_count(output.path()), 5);
    assert!(!service.queue().is_processed(&source));

    sink.failing.store(false, Ordering::SeqCst);
    assert_eq!(
        service.enqueue(&source, output.path()).unwrap(),
        EnqueueOutcome::Queued
    );
    service.queue().wait_idle().await;

    assert!(torso.is_file());
    assert_eq!(artifact_count(output.path()), 6);
    assert!(service.queue().is_processed(&source));
    assert_eq!(service.tracker().total_live(), 0);
}

#[tokio::test]
async fn test_same_path_twice_yields_six_artifacts() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = write_capture(input.path(), "twice.png", 30, 30);

    let service =
        SegmentationService::with_classifier(ServiceConfig::default(), corner_classifier()).unwrap();

    assert_eq!(
        service.enqueue(&source, output.path()).unwrap(),
        EnqueueOutcome::Queued
    );
    let _ = service.enqueue(&source, output.path()).unwrap();
    service.queue().wait_idle().await;

    assert_eq!(
        service.enqueue(&source, output.path()).unwrap(),
        EnqueueOutcome::AlreadyProcessed
    );
    service.queue().wait_idle().await;

    assert_eq!(artifact_count(output.path()), 6);
    assert_eq!(service.queue().processed_count(), 1);
}

/// Records (height, start, end) for every call, after a fixed delay
struct SlowClassifier {
    delay: Duration,
    calls: Mutex<Vec<(usize, Instant, Instant)>>,
}

impl PartClassifier for SlowClassifier {
    fn classify(&self, image: &NormalizedImage) -> Result<PartLabelMap, PipelineError> {
        let start = Instant::now();
        std::thread::sleep(self.delay);
        let map = PartLabelMap::filled(image.height(), image.width(), 12)?;
        self.calls.lock().push((image.height(), start, Instant::now()));
        Ok(map)
    }
}

#[tokio::test]
async fn test_entries_complete_in_order() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let classifier = Arc::new(SlowClassifier {
        delay: Duration::from_millis(50),
        calls: Mutex::new(Vec::new()),
    });
    let service =
        SegmentationService::with_classifier(ServiceConfig::default(), classifier.clone()).unwrap();

    // Square captures of distinct sizes identify each call
    let a = write_capture(input.path(), "a.png", 10, 10);
    let b = write_capture(input.path(), "b.png", 12, 12);
    let c = write_capture(input.path(), "c.png", 14, 14);
    for path in [&a, &b, &c] {
        assert_eq!(
            service.enqueue(path, output.path()).unwrap(),
            EnqueueOutcome::Queued
        );
    }
    service.queue().wait_idle().await;

    let calls = classifier.calls.lock().clone();
    let order: Vec<usize> = calls.iter().map(|(h, _, _)| *h).collect();
    assert_eq!(order, vec![10, 12, 14]);
    for pair in calls.windows(2) {
        // Next call starts only after the previous one finished
        assert!(pair[1].1 >= pair[0].2);
    }
    assert_eq!(service.queue().processed_count(), 3);
}

#[test]
fn test_buffers_released_on_every_path() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let good = write_capture(input.path(), "good.png", 20, 20);
    let broken = input.path().join("broken.png");
    std::fs::write(&broken, b"not an image").unwrap();

    // Success
    let service =
        SegmentationService::with_classifier(ServiceConfig::default(), corner_classifier()).unwrap();
    service.process_file(&good, output.path()).unwrap();
    assert_eq!(service.tracker().total_live(), 0);

    // Decode failure
    assert!(matches!(
        service.process_file(&broken, output.path()),
        Err(PipelineError::Decode { .. })
    ));
    assert_eq!(service.tracker().total_live(), 0);

    // Classifier failure
    let failing: Arc<dyn PartClassifier> =
        Arc::new(|_: &NormalizedImage| -> Result<PartLabelMap, PipelineError> {
            Err(PipelineError::Classifier("no person detected".to_string()))
        });
    let service = SegmentationService::with_classifier(ServiceConfig::default(), failing).unwrap();
    assert!(service.process_file(&good, output.path()).is_err());
    assert_eq!(service.tracker().total_live(), 0);

    // Wrong label map dimensions
    let wrong: Arc<dyn PartClassifier> =
        Arc::new(|_: &NormalizedImage| PartLabelMap::filled(3, 3, 0));
    let service = SegmentationService::with_classifier(ServiceConfig::default(), wrong).unwrap();
    assert!(matches!(
        service.process_file(&good, output.path()),
        Err(PipelineError::Classifier(_))
    ));
    assert_eq!(service.tracker().total_live(), 0);
}

/// Sink that fails every write
struct BrokenSink;

impl ArtifactSink for BrokenSink {
    fn write(&self, _path: &Path, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "disk full"))
    }
}

#[tokio::test]
async fn test_file_with_no_written_region_is_not_processed() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = write_capture(input.path(), "lost.png", 16, 16);

    let service = SegmentationService::with_sink(
        ServiceConfig::default(),
        corner_classifier(),
        Arc::new(BrokenSink),
    )
    .unwrap();

    assert!(matches!(
        service.process_file(&source, output.path()),
        Err(PipelineError::Composition { .. })
    ));

    service.enqueue(&source, output.path()).unwrap();
    service.queue().wait_idle().await;
    assert!(!service.queue().is_processed(&source));
    assert_eq!(service.tracker().total_live(), 0);
}
