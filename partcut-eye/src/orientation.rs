//! Orientation correction for captured photographs
//!
//! Buffers are `(height, width, channels)` arrays. Rotation is inferred from
//! the aspect ratio alone; nothing here looks at image content, so an upright
//! portrait shot and a rotated landscape shot of the same shape get the same
//! treatment.

use ndarray::{s, Array3, ArrayBase, Data, Ix3};

/// Below this width/height ratio a capture is treated as rotated clockwise
pub const TALL_RATIO: f32 = 0.8;
/// Above this width/height ratio a capture is treated as rotated counter-clockwise
pub const WIDE_RATIO: f32 = 1.5;

/// Rotation chosen by the aspect-ratio heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Transpose, then mirror the width axis (90° clockwise)
    Clockwise,
    /// Transpose, then mirror the height axis (90° counter-clockwise)
    CounterClockwise,
    None,
}

impl Rotation {
    /// Pick a rotation for a buffer of the given size
    pub fn from_aspect(width: usize, height: usize) -> Rotation {
        if width == 0 || height == 0 {
            return Rotation::None;
        }
        let ratio = width as f32 / height as f32;
        if ratio < TALL_RATIO {
            Rotation::Clockwise
        } else if ratio > WIDE_RATIO {
            Rotation::CounterClockwise
        } else {
            Rotation::None
        }
    }
}

fn height_width<S: Data>(buf: &ArrayBase<S, Ix3>) -> (usize, usize) {
    let dims = buf.dim();
    (dims.0, dims.1)
}

/// Swap the height and width axes
pub fn transpose<S: Data<Elem = u8>>(buf: &ArrayBase<S, Ix3>) -> Array3<u8> {
    buf.view()
        .permuted_axes([1, 0, 2])
        .as_standard_layout()
        .into_owned()
}

/// Mirror the height axis (upside down)
pub fn flip_vertical<S: Data<Elem = u8>>(buf: &ArrayBase<S, Ix3>) -> Array3<u8> {
    buf.slice(s![..;-1, .., ..]).as_standard_layout().into_owned()
}

/// Mirror the width axis (left to right)
pub fn flip_horizontal<S: Data<Elem = u8>>(buf: &ArrayBase<S, Ix3>) -> Array3<u8> {
    buf.slice(s![.., ..;-1, ..]).as_standard_layout().into_owned()
}

/// Apply `rotation` to `buf`
pub fn rotate<S: Data<Elem = u8>>(buf: &ArrayBase<S, Ix3>, rotation: Rotation) -> Array3<u8> {
    match rotation {
        Rotation::Clockwise => flip_horizontal(&transpose(buf)),
        Rotation::CounterClockwise => flip_vertical(&transpose(buf)),
        Rotation::None => buf.as_standard_layout().into_owned(),
    }
}

/// Put a freshly decoded buffer in canonical axis order: when the first
/// dimension exceeds the second, the axes are swapped.
pub fn canonicalize<S: Data<Elem = u8>>(buf: &ArrayBase<S, Ix3>) -> Array3<u8> {
    let (height, width) = height_width(buf);
    if height > width {
        transpose(buf)
    } else {
        buf.as_standard_layout().into_owned()
    }
}

/// Apply the aspect-ratio rotation heuristic. Returns the corrected buffer and
/// the rotation that was applied.
pub fn correct_rotation<S: Data<Elem = u8>>(buf: &ArrayBase<S, Ix3>) -> (Array3<u8>, Rotation) {
    let (height, width) = height_width(buf);
    let rotation = Rotation::from_aspect(width, height);
    (rotate(buf, rotation), rotation)
}

/// Full correction applied before classification: canonical axis order, then
/// the rotation heuristic.
pub fn normalize_for_classifier<S: Data<Elem = u8>>(buf: &ArrayBase<S, Ix3>) -> Array3<u8> {
    let canonical = canonicalize(buf);
    let (corrected, _) = correct_rotation(&canonical);
    corrected
}

/// Correction applied to the re-decoded original before masking.
///
/// Captures are stored upside down, so a vertical flip always comes first.
/// If the result is the transpose of the mask shape it is transposed, and a
/// final horizontal-and-vertical flip matches the classifier's coordinate
/// convention. The returned buffer may still differ from `mask_dims` (height,
/// width); callers must check.
pub fn align_for_composition<S: Data<Elem = u8>>(
    buf: &ArrayBase<S, Ix3>,
    mask_dims: (usize, usize),
) -> Array3<u8> {
    let mut aligned = flip_vertical(buf);

    let (height, width) = height_width(&aligned);
    if (height, width) != mask_dims && (width, height) == mask_dims {
        aligned = transpose(&aligned);
    }

    flip_vertical(&flip_horizontal(&aligned))
}
