//! Background mask composition.
//!
//! A primary segmentation mask is merged with optional per-photo side signals
//! (portrait matte, depth map) by per-pixel maximum, rescaled to the canvas,
//! eroded with a square minimum filter and finally feathered with a Gaussian blur.

use image::{GrayImage, Luma, RgbaImage, imageops};
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{Mask, grayscale_erode};
use log::debug;
use rayon::prelude::*;

use squareprep_utils::{DepthImage, timing_guard};

/// Contrast multiplier applied to depth values around mid-gray.
pub const DEPTH_CONTRAST: f32 = 2.0;

/// Optional per-photo side signals, already aligned with the image they describe.
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryAssets {
    /// Portrait matte alpha (255 = subject).
    pub portrait_matte: Option<GrayImage>,
    /// Normalized disparity; larger values are closer to the camera.
    pub depth: Option<DepthImage>,
}

impl AuxiliaryAssets {
    pub fn is_empty(&self) -> bool {
        self.portrait_matte.is_none() && self.depth.is_none()
    }
}

/// Erosion and feather radii applied after merging.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaskRefinement {
    /// Gaussian sigma in pixels; `0` disables feathering.
    pub feather: f32,
    /// Minimum-filter radius in pixels; `0` disables erosion.
    pub erosion: u32,
}

/// Convert a depth map into an opacity mask: closer is more opaque.
pub fn depth_to_alpha(depth: &DepthImage) -> GrayImage {
    let (w, h) = depth.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let value = depth.get_pixel(x, y)[0];
        let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        let boosted = ((value - 0.5) * DEPTH_CONTRAST + 0.5).clamp(0.0, 1.0);
        Luma([(boosted * 255.0).round() as u8])
    })
}

/// Merge the available masks and refine the result for a `target` sized canvas.
///
/// Returns `None` only when there is nothing to merge.
pub fn composite_mask(
    primary: Option<GrayImage>,
    auxiliary: &AuxiliaryAssets,
    target: (u32, u32),
    refinement: MaskRefinement,
) -> Option<GrayImage> {
    let _guard = timing_guard("squareprep_core::composite_mask", log::Level::Debug);

    let mut contributors: Vec<GrayImage> = Vec::with_capacity(3);
    contributors.extend(primary);
    contributors.extend(auxiliary.portrait_matte.clone());
    contributors.extend(auxiliary.depth.as_ref().map(depth_to_alpha));
    debug!("Compositing {} mask signal(s)", contributors.len());

    let mut contributors = contributors.into_iter();
    let mut merged = contributors.next()?;
    for mask in contributors {
        max_composite(&mut merged, &mask);
    }

    if merged.dimensions() != target {
        merged = resize_mask(&merged, target);
    }
    if refinement.erosion > 0 {
        merged = erode(&merged, refinement.erosion);
    }
    if refinement.feather > 0.0 && refinement.feather.is_finite() {
        merged = gaussian_blur_f32(&merged, refinement.feather);
    }
    Some(merged)
}

/// Per-pixel maximum of `base` and `other`, resampling `other` to `base`'s extent if needed.
pub fn max_composite(base: &mut GrayImage, other: &GrayImage) {
    let resized;
    let other = if other.dimensions() == base.dimensions() {
        other
    } else {
        resized = resize_mask(other, base.dimensions());
        &resized
    };
    let dst: &mut [u8] = base;
    dst.par_iter_mut()
        .zip(other.as_raw().par_iter())
        .for_each(|(out, value)| *out = (*out).max(*value));
}

/// Non-uniform resize of a mask to exactly `(width, height)`.
pub fn resize_mask(mask: &GrayImage, (width, height): (u32, u32)) -> GrayImage {
    imageops::resize(mask, width.max(1), height.max(1), imageops::FilterType::Triangle)
}

/// Square minimum filter of the given radius. Pixels outside the mask are ignored.
///
/// Radii beyond 255 are clamped.
pub fn erode(mask: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 || mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    let radius = u8::try_from(radius).unwrap_or(u8::MAX);
    grayscale_erode(mask, &Mask::square(radius))
}

/// Scale the image's alpha by the mask, leaving color untouched.
pub fn apply_alpha_mask(image: &RgbaImage, mask: &GrayImage) -> RgbaImage {
    let resized;
    let mask = if mask.dimensions() == image.dimensions() {
        mask
    } else {
        resized = resize_mask(mask, image.dimensions());
        &resized
    };
    let mut out = image.clone();
    for (pixel, coverage) in out.pixels_mut().zip(mask.pixels()) {
        let alpha = u16::from(pixel[3]) * u16::from(coverage[0]);
        pixel[3] = ((alpha + 127) / 255) as u8;
    }
    out
}
