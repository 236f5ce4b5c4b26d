//! Optional super-resolution: the oracle trait, a tiled ONNX implementation and
//! the bounded "upscale until large enough" loop.

use std::path::Path;

use anyhow::Result;
use image::{
    DynamicImage, GenericImageView, GrayImage, Luma, Rgba, RgbaImage,
    imageops::{self, FilterType},
};
use log::{debug, warn};
use serde::Serialize;

use crate::model::OnnxModel;
use crate::preprocess::{InputSize, unit_rgb_tensor};
use squareprep_utils::timing_guard;

/// Default bound on repeated passes.
pub const MAX_UPSCALE_ITERATIONS: u32 = 4;
/// Minimum linear gain per pass (in both dimensions) to keep going.
pub const MIN_UPSCALE_GAIN: f32 = 0.01;

/// Black-box image-to-image super-resolution.
pub trait Upscaler: Send + Sync {
    fn upscale(&self, image: &RgbaImage) -> Result<RgbaImage>;
}

/// Why the upscale loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpscaleStop {
    /// The short side reached the target.
    Reached,
    /// A pass grew the image by less than 1% in some dimension.
    Stalled,
    /// A pass returned an error.
    Failed,
    /// The iteration bound was hit first.
    Exhausted,
}

/// Result of [`upscale_until`].
#[derive(Debug, Clone)]
pub struct UpscaleOutcome {
    pub image: RgbaImage,
    pub passes: u32,
    pub stop: UpscaleStop,
}

/// Repeatedly upscale until the short side is at least `target`.
///
/// Stops early when a pass fails or when it grows either dimension by less than
/// 1%; the stalled result is discarded and the previous image kept.
pub fn upscale_until(
    upscaler: &dyn Upscaler,
    image: RgbaImage,
    target: u32,
    max_iterations: u32,
) -> UpscaleOutcome {
    let _guard = timing_guard("squareprep_core::upscale_until", log::Level::Debug);
    let mut current = image;
    let mut passes = 0;
    loop {
        if current.width().min(current.height()) >= target {
            return UpscaleOutcome {
                image: current,
                passes,
                stop: UpscaleStop::Reached,
            };
        }
        if passes >= max_iterations {
            return UpscaleOutcome {
                image: current,
                passes,
                stop: UpscaleStop::Exhausted,
            };
        }

        let next = match upscaler.upscale(&current) {
            Ok(next) => next,
            Err(err) => {
                warn!("Super-resolution pass {} failed: {err:#}", passes + 1);
                return UpscaleOutcome {
                    image: current,
                    passes,
                    stop: UpscaleStop::Failed,
                };
            }
        };
        let gain_x = next.width() as f32 / current.width() as f32 - 1.0;
        let gain_y = next.height() as f32 / current.height() as f32 - 1.0;
        if gain_x < MIN_UPSCALE_GAIN || gain_y < MIN_UPSCALE_GAIN {
            warn!(
                "Super-resolution stalled at {}x{} (pass {} gave {}x{})",
                current.width(),
                current.height(),
                passes + 1,
                next.width(),
                next.height()
            );
            return UpscaleOutcome {
                image: current,
                passes,
                stop: UpscaleStop::Stalled,
            };
        }
        passes += 1;
        debug!(
            "Super-resolution pass {passes}: {}x{} -> {}x{}",
            current.width(),
            current.height(),
            next.width(),
            next.height()
        );
        current = next;
    }
}

/// Tiled ONNX super-resolution model with `[1, 3, T, T]` RGB input in `[0, 1]`.
///
/// The integer scale factor is read from the first tile's output. Edge tiles are
/// padded by replicating border pixels; alpha is resized separately.
#[derive(Debug)]
pub struct OnnxUpscaler {
    model: OnnxModel,
    tile: u32,
}

impl OnnxUpscaler {
    pub fn load<P: AsRef<Path>>(path: P, tile: u32) -> Result<Self> {
        let tile = tile.max(1);
        let model = OnnxModel::load(path, InputSize::square(tile), "super-resolution")?;
        Ok(Self { model, tile })
    }

    fn run_tile(&self, tile: &RgbaImage) -> Result<(Vec<f32>, usize)> {
        let rgb = DynamicImage::ImageRgba8(tile.clone()).to_rgb8();
        let outputs = self.model.run(unit_rgb_tensor(&rgb)?)?;
        let output = &outputs[0];
        let side = match *output.shape() {
            [1, 3, h, w] if h == w => h,
            ref other => anyhow::bail!("unexpected super-resolution output shape {other:?}"),
        };
        let values = output
            .as_slice::<f32>()
            .map_err(|e| anyhow::anyhow!("super-resolution output is not f32: {e}"))?;
        Ok((values.to_vec(), side))
    }
}

impl Upscaler for OnnxUpscaler {
    fn upscale(&self, image: &RgbaImage) -> Result<RgbaImage> {
        let _guard = timing_guard("squareprep_core::onnx_upscale", log::Level::Debug);
        let (width, height) = image.dimensions();
        anyhow::ensure!(width > 0 && height > 0, "cannot upscale an empty image");
        let tile = self.tile;

        let mut out: Option<RgbaImage> = None;
        let mut scale = 0u32;
        for ty in (0..height).step_by(tile as usize) {
            for tx in (0..width).step_by(tile as usize) {
                let patch = replicate_tile(image, tx, ty, tile);
                let (values, side) = self.run_tile(&patch)?;
                if scale == 0 {
                    anyhow::ensure!(
                        side % tile as usize == 0 && side >= tile as usize,
                        "super-resolution output side {side} is not a multiple of tile {tile}"
                    );
                    scale = (side / tile as usize) as u32;
                    out = Some(RgbaImage::new(width * scale, height * scale));
                }
                anyhow::ensure!(
                    side == (tile * scale) as usize,
                    "super-resolution output side changed between tiles"
                );
                let Some(canvas) = out.as_mut() else {
                    anyhow::bail!("super-resolution produced no output canvas");
                };

                let plane = side * side;
                let valid_w = (width - tx).min(tile) * scale;
                let valid_h = (height - ty).min(tile) * scale;
                for y in 0..valid_h {
                    for x in 0..valid_w {
                        let i = y as usize * side + x as usize;
                        let channel =
                            |c: usize| (values[c * plane + i].clamp(0.0, 1.0) * 255.0).round() as u8;
                        canvas.put_pixel(
                            tx * scale + x,
                            ty * scale + y,
                            Rgba([channel(0), channel(1), channel(2), 255]),
                        );
                    }
                }
            }
        }

        let mut canvas = out.ok_or_else(|| anyhow::anyhow!("super-resolution produced no tiles"))?;
        if image.pixels().any(|p| p[3] != 255) {
            let alpha = GrayImage::from_fn(width, height, |x, y| Luma([image.get_pixel(x, y)[3]]));
            let alpha =
                imageops::resize(&alpha, canvas.width(), canvas.height(), FilterType::CatmullRom);
            for (pixel, a) in canvas.pixels_mut().zip(alpha.pixels()) {
                pixel[3] = a[0];
            }
        }
        Ok(canvas)
    }
}

/// `tile × tile` patch at `(x, y)`, replicating edge pixels beyond the image.
fn replicate_tile(image: &RgbaImage, x: u32, y: u32, tile: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if x + tile <= width && y + tile <= height {
        return image.view(x, y, tile, tile).to_image();
    }
    RgbaImage::from_fn(tile, tile, |dx, dy| {
        *image.get_pixel((x + dx).min(width - 1), (y + dy).min(height - 1))
    })
}
