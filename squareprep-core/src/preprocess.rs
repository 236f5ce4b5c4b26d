//! Tensor preparation for the ONNX oracles.
//!
//! Every model takes a `[1, 3, H, W]` f32 tensor; they differ in channel order and
//! value range. The helpers return the scale factors needed to map model-space
//! coordinates back onto the source image where that matters.

use anyhow::Result;
use image::{DynamicImage, RgbImage, RgbaImage, imageops::FilterType};
use tract_onnx::prelude::Tensor;

use squareprep_utils::telemetry::timing_guard;
use squareprep_utils::{compute_resize_scales, resize_image, rgb_to_bgr_chw};

/// ImageNet channel means (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Model input resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl InputSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }
}

impl Default for InputSize {
    fn default() -> Self {
        Self::new(640, 640)
    }
}

/// A model input tensor plus the factors mapping model coordinates back to the source.
#[derive(Debug)]
pub struct PreparedInput {
    pub tensor: Tensor,
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Resize to `size` and lay out as BGR CHW with raw `0..=255` values (OpenCV `blobFromImage`).
pub fn bgr_blob(image: &RgbaImage, size: InputSize) -> Result<PreparedInput> {
    let _guard = timing_guard("squareprep_core::bgr_blob", log::Level::Trace);
    let (orig_w, orig_h) = image.dimensions();
    anyhow::ensure!(
        size.width > 0 && size.height > 0,
        "input dimensions must be greater than zero"
    );
    let dynamic = DynamicImage::ImageRgba8(image.clone());
    let resized = resize_image(&dynamic, size.width, size.height, FilterType::Triangle);
    let chw = rgb_to_bgr_chw(&resized);

    let shape = [1usize, 3, size.height as usize, size.width as usize];
    let (data, offset) = chw.into_raw_vec_and_offset();
    debug_assert_eq!(offset, Some(0), "expected contiguous array");
    let tensor = Tensor::from_shape(&shape, &data)
        .map_err(|e| anyhow::anyhow!("failed to build tensor: {e}"))?;
    let (scale_x, scale_y) = compute_resize_scales((orig_w, orig_h), (size.width, size.height))?;

    Ok(PreparedInput {
        tensor,
        scale_x,
        scale_y,
    })
}

/// Resize to `size` and lay out as RGB CHW normalized with the given mean and std.
pub fn normalized_rgb_tensor(
    image: &RgbaImage,
    size: InputSize,
    mean: [f32; 3],
    std: [f32; 3],
) -> Result<Tensor> {
    let dynamic = DynamicImage::ImageRgba8(image.clone());
    let resized = resize_image(&dynamic, size.width, size.height, FilterType::Triangle);
    let plane = (size.width * size.height) as usize;
    let mut data = vec![0f32; plane * 3];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (f32::from(pixel[c]) / 255.0 - mean[c]) / std[c];
        }
    }
    Tensor::from_shape(&[1, 3, size.height as usize, size.width as usize], &data)
        .map_err(|e| anyhow::anyhow!("failed to build tensor: {e}"))
}

/// RGB CHW tensor with values in `[0, 1]`, no resizing.
pub fn unit_rgb_tensor(image: &RgbImage) -> Result<Tensor> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0f32; plane * 3];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = f32::from(pixel[c]) / 255.0;
        }
    }
    Tensor::from_shape(&[1, 3, height as usize, width as usize], &data)
        .map_err(|e| anyhow::anyhow!("failed to build tensor: {e}"))
}
