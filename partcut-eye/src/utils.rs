//! Utility functions for image buffers and tensors

use crate::error::PipelineError;
use image::codecs::png::PngEncoder;
use image::{ColorType, GrayImage, ImageEncoder, RgbImage};
use ndarray::{Array2, Array3};
use std::path::Path;

/// Decode file bytes into an RGB buffer of shape (height, width, 3)
pub fn decode_rgb(path: &Path, bytes: &[u8]) -> Result<Array3<u8>, PipelineError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|source| PipelineError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    rgb_image_to_array(decoded)
}

/// Convert an `RgbImage` into a (height, width, 3) array without copying
pub fn rgb_image_to_array(image: RgbImage) -> Result<Array3<u8>, PipelineError> {
    let (width, height) = image.dimensions();
    Array3::from_shape_vec((height as usize, width as usize, 3), image.into_raw())
        .map_err(|e| PipelineError::Classifier(format!("Invalid image buffer shape: {}", e)))
}

/// Convert a (height, width, 3) array back into an `RgbImage`
pub fn array_to_rgb_image(buf: &Array3<u8>) -> Option<RgbImage> {
    let (height, width, channels) = buf.dim();
    if channels != 3 {
        return None;
    }
    let raw = buf.as_standard_layout().into_owned().into_raw_vec();
    RgbImage::from_raw(width as u32, height as u32, raw)
}

/// Encode a (height, width, 3) array as PNG bytes
pub fn encode_png_rgb(buf: &Array3<u8>) -> Result<Vec<u8>, image::ImageError> {
    let (height, width, _) = buf.dim();
    let raw = buf.as_standard_layout();
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        raw.as_slice().unwrap_or(&[]),
        width as u32,
        height as u32,
        ColorType::Rgb8,
    )?;
    Ok(bytes)
}

/// Encode a grayscale image as PNG bytes
pub fn encode_png_gray(image: &GrayImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::L8,
    )?;
    Ok(bytes)
}

/// Resize an RGB image and lay it out as a CHW float tensor scaled to [0, 1]
pub fn rgb_to_chw_tensor(
    image: &RgbImage,
    target_width: u32,
    target_height: u32,
) -> Result<Vec<f32>, PipelineError> {
    if target_width == 0 || target_height == 0 {
        return Err(PipelineError::Classifier(
            "Target dimensions cannot be zero".to_string(),
        ));
    }

    // Check for potential overflow
    let total = (target_width as usize)
        .checked_mul(target_height as usize)
        .and_then(|p| p.checked_mul(3))
        .ok_or_else(|| {
            PipelineError::Classifier("Target dimensions too large, would overflow".to_string())
        })?;

    if total > 100_000_000 {
        return Err(PipelineError::Classifier(
            "Target dimensions too large (max 100M elements)".to_string(),
        ));
    }

    let resized = image::imageops::resize(
        image,
        target_width,
        target_height,
        image::imageops::FilterType::Triangle,
    );

    let hw = (target_width * target_height) as usize;
    let mut chw = vec![0.0f32; total];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = y as usize * target_width as usize + x as usize;
        for c in 0..3 {
            chw[c * hw + idx] = pixel[c] as f32 / 255.0;
        }
    }

    Ok(chw)
}

/// Apply per-channel mean/std normalization to a CHW tensor in place
pub fn apply_normalization(data: &mut [f32], mean: &[f32; 3], std: &[f32; 3]) {
    const CHANNELS: usize = 3;

    if data.len() < CHANNELS {
        return;
    }

    let hw = data.len() / CHANNELS;
    for c in 0..CHANNELS {
        // Prevent division by zero
        if std[c] == 0.0 {
            continue;
        }

        for val in data[c * hw..(c + 1) * hw].iter_mut() {
            let normalized = (*val - mean[c]) / std[c];
            *val = if normalized.is_finite() { normalized } else { 0.0 };
        }
    }
}

/// Nearest-neighbour resize of a label grid to (height, width)
pub fn resize_labels_nearest(labels: &Array2<i32>, height: usize, width: usize) -> Array2<i32> {
    let (src_h, src_w) = labels.dim();
    if src_h == 0 || src_w == 0 {
        return Array2::from_elem((height, width), crate::regions::BACKGROUND_LABEL);
    }
    if (src_h, src_w) == (height, width) {
        return labels.clone();
    }

    Array2::from_shape_fn((height, width), |(y, x)| {
        let sy = ((y * src_h) / height.max(1)).min(src_h - 1);
        let sx = ((x * src_w) / width.max(1)).min(src_w - 1);
        labels[[sy, sx]]
    })
}
