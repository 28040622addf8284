//! Edge case tests for partcut-eye

use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use partcut_eye::config::ServiceConfig;
use partcut_eye::orientation::{self, Rotation};
use partcut_eye::processing::composer::artifact_path;
use partcut_eye::regions::BACKGROUND_LABEL;
use partcut_eye::{NormalizedImage, PartClassifier, PartLabelMap, Region, SegmentationService};
use std::sync::Arc;
use tempfile::TempDir;

fn filled_classifier(label: i32) -> Arc<dyn PartClassifier> {
    Arc::new(move |image: &NormalizedImage| {
        PartLabelMap::filled(image.height(), image.width(), label)
    })
}

#[test]
fn test_config_edge_cases() {
    // Minimum valid values
    let mut config = ServiceConfig::default();
    config.watch.poll_interval_ms = 1;
    config.watch.stability_window_ms = 1;
    config.queue.max_pending = 1;
    config.classifier.input_size = (1, 1);
    assert!(config.validate().is_ok());

    // Maximum valid values
    config.watch.poll_interval_ms = 60_000;
    config.watch.stability_window_ms = 60_000;
    config.queue.max_pending = 10_000;
    config.classifier.input_size = (4096, 4096);
    assert!(config.validate().is_ok());
}

#[test]
fn test_background_only_writes_black_cutouts() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = input.path().join("empty_scene.png");
    RgbImage::from_pixel(12, 12, Rgb([255, 255, 255]))
        .save(&source)
        .unwrap();

    let service =
        SegmentationService::with_classifier(ServiceConfig::default(), filled_classifier(BACKGROUND_LABEL))
            .unwrap();
    let report = service.process_file(&source, output.path()).unwrap();

    assert_eq!(report.artifacts.len(), 6);
    assert!(report.artifacts.iter().all(|a| a.pixel_count == 0));
    let head = image::open(artifact_path(output.path(), Region::Head, "empty_scene"))
        .unwrap()
        .to_rgb8();
    assert!(head.pixels().all(|p| p.0 == [0, 0, 0]));
}

#[test]
fn test_stem_with_dots_and_uppercase_extension() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = input.path().join("IMG.2024.01.PNG");
    RgbImage::from_pixel(6, 6, Rgb([5, 5, 5]))
        .save_with_format(&source, image::ImageFormat::Png)
        .unwrap();

    let service =
        SegmentationService::with_classifier(ServiceConfig::default(), filled_classifier(13)).unwrap();
    service.process_file(&source, output.path()).unwrap();

    assert!(output.path().join("torso/torso_IMG.2024.01.png").is_file());
}

#[test]
fn test_grayscale_and_alpha_inputs() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    let gray = input.path().join("gray.png");
    GrayImage::from_pixel(10, 10, Luma([128])).save(&gray).unwrap();
    let rgba = input.path().join("alpha.png");
    RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 0])).save(&rgba).unwrap();

    let service =
        SegmentationService::with_classifier(ServiceConfig::default(), filled_classifier(0)).unwrap();

    service.process_file(&gray, output.path()).unwrap();
    let head = image::open(artifact_path(output.path(), Region::Head, "gray"))
        .unwrap()
        .to_rgb8();
    assert!(head.pixels().all(|p| p.0 == [128, 128, 128]));

    service.process_file(&rgba, output.path()).unwrap();
    let head = image::open(artifact_path(output.path(), Region::Head, "alpha"))
        .unwrap()
        .to_rgb8();
    assert!(head.pixels().all(|p| p.0 == [1, 2, 3]));
}

#[test]
fn test_wide_capture_is_rotated_before_classification() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = input.path().join("wide.png");
    RgbImage::from_pixel(300, 100, Rgb([9, 9, 9]))
        .save(&source)
        .unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(None));
    let record = Arc::clone(&seen);
    let classifier: Arc<dyn PartClassifier> = Arc::new(move |image: &NormalizedImage| {
        *record.lock() = Some((image.height(), image.width()));
        PartLabelMap::filled(image.height(), image.width(), 0)
    });

    let service = SegmentationService::with_classifier(ServiceConfig::default(), classifier).unwrap();
    let report = service.process_file(&source, output.path()).unwrap();

    // 300x100 has ratio 3.0: rotated counter-clockwise to 100 wide, 300 tall
    assert_eq!(*seen.lock(), Some((300, 100)));
    assert_eq!(report.artifacts.len(), 6);
    let head = image::open(artifact_path(output.path(), Region::Head, "wide"))
        .unwrap()
        .to_rgb8();
    assert_eq!(head.dimensions(), (100, 300));
}

#[test]
fn test_rotation_thresholds() {
    assert_eq!(Rotation::from_aspect(50, 100), Rotation::Clockwise);
    assert_eq!(Rotation::from_aspect(200, 100), Rotation::CounterClockwise);
    assert_eq!(Rotation::from_aspect(100, 100), Rotation::None);

    let buf = ndarray::Array3::<u8>::zeros((1, 1, 3));
    let (out, rotation) = orientation::correct_rotation(&buf);
    assert_eq!(rotation, Rotation::None);
    assert_eq!(out.dim(), (1, 1, 3));
}
