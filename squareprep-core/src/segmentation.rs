//! Person / foreground segmentation oracles and engine resolution.

use std::path::Path;

use anyhow::Result;
use image::{GrayImage, Luma, RgbaImage};
use log::{info, warn};
use tract_onnx::prelude::Tensor;

use crate::mask::resize_mask;
use crate::model::OnnxModel;
use crate::preprocess::{IMAGENET_MEAN, IMAGENET_STD, InputSize, normalized_rgb_tensor};
use squareprep_utils::config::{BackgroundSettings, SegmentationEngine};
use squareprep_utils::timing_guard;

/// What a segmenter produced for one image.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentationOutcome {
    /// Coverage mask aligned with the input image (255 = subject).
    Mask(GrayImage),
    /// The segmenter cannot produce a mask for this input; not an error.
    Unsupported,
}

/// Black-box segmentation oracle.
pub trait PersonSegmenter: Send + Sync {
    /// Engine actually backing this segmenter.
    fn engine(&self) -> SegmentationEngine;

    fn segment(&self, image: &RgbaImage) -> Result<SegmentationOutcome>;
}

/// Segmenter that never produces a mask; only auxiliary signals contribute.
#[derive(Debug, Default, Clone, Copy)]
pub struct MatteOnlySegmenter;

impl PersonSegmenter for MatteOnlySegmenter {
    fn engine(&self) -> SegmentationEngine {
        SegmentationEngine::MatteOnly
    }

    fn segment(&self, _image: &RgbaImage) -> Result<SegmentationOutcome> {
        Ok(SegmentationOutcome::Unsupported)
    }
}

/// ONNX segmentation model taking an ImageNet-normalized `[1, 3, S, S]` RGB tensor.
#[derive(Debug)]
pub struct OnnxSegmenter {
    model: OnnxModel,
    engine: SegmentationEngine,
}

impl OnnxSegmenter {
    pub fn load<P: AsRef<Path>>(path: P, input_side: u32, engine: SegmentationEngine) -> Result<Self> {
        let label = match engine {
            SegmentationEngine::Foreground => "foreground segmentation",
            _ => "person segmentation",
        };
        let model = OnnxModel::load(path, InputSize::square(input_side.max(1)), label)?;
        Ok(Self { model, engine })
    }
}

impl PersonSegmenter for OnnxSegmenter {
    fn engine(&self) -> SegmentationEngine {
        self.engine
    }

    fn segment(&self, image: &RgbaImage) -> Result<SegmentationOutcome> {
        let _guard = timing_guard("squareprep_core::segment", log::Level::Debug);
        let input = normalized_rgb_tensor(image, self.model.input_size(), IMAGENET_MEAN, IMAGENET_STD)?;
        let outputs = self.model.run(input)?;
        let mask = probability_mask(&outputs[0])?;
        Ok(SegmentationOutcome::Mask(resize_mask(&mask, image.dimensions())))
    }
}

/// Convert a model output into an 8-bit coverage mask.
///
/// Accepts `[1, 1, H, W]`, `[1, H, W]`, `[1, H, W, 1]`, `[H, W]` single-channel maps
/// and `[1, 2, H, W]` two-class logits (channel 1 = subject). Values outside
/// `[0, 1]` are treated as logits.
pub fn probability_mask(output: &Tensor) -> Result<GrayImage> {
    let values = output
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("segmentation output is not f32: {e}"))?;
    let (height, width, two_class) = match *output.shape() {
        [1, 1, h, w] | [1, h, w] | [1, h, w, 1] | [h, w] => (h, w, false),
        [1, 2, h, w] => (h, w, true),
        ref other => anyhow::bail!("unsupported segmentation output shape {other:?}"),
    };
    anyhow::ensure!(width > 0 && height > 0, "segmentation output is empty");
    let plane = width * height;

    let probabilities: Vec<f32> = if two_class {
        values[..plane]
            .iter()
            .zip(&values[plane..2 * plane])
            .map(|(&background, &subject)| sigmoid(subject - background))
            .collect()
    } else {
        let plane_values = &values[..plane];
        let is_logits = plane_values.iter().any(|&v| !(0.0..=1.0).contains(&v));
        plane_values
            .iter()
            .map(|&v| if is_logits { sigmoid(v) } else { v })
            .collect()
    };

    let mut mask = GrayImage::new(width as u32, height as u32);
    for (pixel, p) in mask.pixels_mut().zip(probabilities) {
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        *pixel = Luma([(p * 255.0).round() as u8]);
    }
    Ok(mask)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Build the segmenter for the requested engine, degrading gracefully.
///
/// `foreground` falls back to `person`, and `person` falls back to `matte-only`
/// when its model is missing or fails to load.
pub fn resolve_segmenter(settings: &BackgroundSettings) -> Box<dyn PersonSegmenter> {
    let requested = settings.engine;
    let mut engine = requested;
    loop {
        let attempt = match engine {
            SegmentationEngine::Foreground => settings
                .foreground_model
                .as_deref()
                .map(|path| (path, settings.foreground_input_size)),
            SegmentationEngine::Person => settings
                .person_model
                .as_deref()
                .map(|path| (path, settings.person_input_size)),
            SegmentationEngine::MatteOnly => return Box::new(MatteOnlySegmenter),
        };

        let fallback = match engine {
            SegmentationEngine::Foreground => SegmentationEngine::Person,
            _ => SegmentationEngine::MatteOnly,
        };
        match attempt {
            Some((path, side)) => match OnnxSegmenter::load(path, side, engine) {
                Ok(segmenter) => {
                    if engine != requested {
                        info!("Using '{engine}' segmentation in place of '{requested}'");
                    }
                    return Box::new(segmenter);
                }
                Err(err) => warn!(
                    "Segmentation engine '{engine}' unavailable ({err:#}); falling back to '{fallback}'"
                ),
            },
            None => warn!(
                "Segmentation engine '{engine}' has no model configured; falling back to '{fallback}'"
            ),
        }
        engine = fallback;
    }
}
