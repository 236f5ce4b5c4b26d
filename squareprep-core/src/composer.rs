//! Per-photo canvas composition.
//!
//! [`CanvasComposer`] turns one upright photo plus an optional subject box into a
//! `size × size` RGBA canvas: optional tight crop around the subject, padding
//! that centers the subject, optional super-resolution, the crop-or-pad fit
//! decision and optional background removal. Every geometric step updates a
//! [`Placement`] so the subject box and auxiliary signals can follow the pixels.

use anyhow::Result;
use image::{GrayImage, Luma, Rgba, RgbaImage, imageops};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use log::{debug, info, warn};
use serde::Serialize;

use crate::detector::{FaceDetector, MultiAngleConfig, MultiAngleDetector};
use crate::geometry::{
    Affine, Rect, center_square_window, clamp_square_around, edge_average_color, pad_offsets,
    pad_sides, pad_to_square, scale_long_side, scale_short_side,
};
use crate::mask::{AuxiliaryAssets, MaskRefinement, apply_alpha_mask, composite_mask};
use crate::segmentation::{PersonSegmenter, SegmentationOutcome, resolve_segmenter};
use crate::selector::FaceSelection;
use crate::upscale::{OnnxUpscaler, UpscaleStop, Upscaler, upscale_until};
use crate::yunet::YuNetFaceDetector;
use squareprep_utils::{
    AppSettings, DepthImage, FitPreference, PadColorPolicy, PngCompression, RgbaColor,
    SegmentationEngine, timing_guard,
};

/// Tolerance (pixels) used by the fit decision.
pub const FIT_TOLERANCE: f32 = 0.5;

/// Immutable per-run settings for the composer and the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Output side length in pixels.
    pub size: u32,
    pub remove_background: bool,
    pub pad_color: PadColorPolicy,
    /// When false, no face detection is attempted.
    pub detect_faces: bool,
    pub fit: FitPreference,
    pub maximize_subject_fill: bool,
    /// Square side as a multiple of the subject box for `maximize_subject_fill`.
    pub subject_margin: f32,
    pub segmentation_engine: SegmentationEngine,
    pub refinement: MaskRefinement,
    pub detection: MultiAngleConfig,
    pub max_upscale_iterations: u32,
    pub png_compression: PngCompression,
}

impl PipelineConfig {
    /// Snapshot the persisted settings for one run.
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            size: settings.output.size.max(1),
            remove_background: settings.background.enabled,
            pad_color: settings.output.pad_color,
            detect_faces: settings.detection.enabled,
            fit: settings.output.fit,
            maximize_subject_fill: settings.output.maximize_subject_fill,
            subject_margin: settings.output.subject_margin,
            segmentation_engine: settings.background.engine,
            refinement: MaskRefinement {
                feather: settings.background.feather,
                erosion: settings.background.erosion,
            },
            detection: MultiAngleConfig {
                angles: settings.detection.angles.clone(),
                cluster_iou: settings.detection.cluster_iou,
                working_long_side: settings.detection.working_long_side,
            },
            max_upscale_iterations: settings.upscale.max_iterations,
            png_compression: PngCompression::parse(&settings.output.png_compression),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

/// The external models used by a run. Any of them may be absent.
#[derive(Default)]
pub struct Oracles {
    pub detector: Option<Box<dyn FaceDetector>>,
    pub segmenter: Option<Box<dyn PersonSegmenter>>,
    pub upscaler: Option<Box<dyn Upscaler>>,
}

impl Oracles {
    pub fn with_detector(mut self, detector: impl FaceDetector + 'static) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    pub fn with_segmenter(mut self, segmenter: impl PersonSegmenter + 'static) -> Self {
        self.segmenter = Some(Box::new(segmenter));
        self
    }

    pub fn with_upscaler(mut self, upscaler: impl Upscaler + 'static) -> Self {
        self.upscaler = Some(Box::new(upscaler));
        self
    }

    /// Load the ONNX-backed oracles the settings ask for.
    ///
    /// Models that fail to load are logged and left out; the run degrades instead of failing.
    pub fn from_settings(settings: &AppSettings) -> Self {
        let mut oracles = Oracles::default();

        if settings.detection.enabled {
            match YuNetFaceDetector::from_settings(&settings.detection) {
                Ok(detector) => oracles.detector = Some(Box::new(detector)),
                Err(err) => warn!("Face detection unavailable, continuing without it: {err:#}"),
            }
        }
        if settings.background.enabled {
            oracles.segmenter = Some(resolve_segmenter(&settings.background));
        }
        if let Some(path) = settings.upscale.model_path.as_deref() {
            match OnnxUpscaler::load(path, settings.upscale.tile_size) {
                Ok(upscaler) => oracles.upscaler = Some(Box::new(upscaler)),
                Err(err) => warn!("Super-resolution unavailable, continuing without it: {err:#}"),
            }
        }
        oracles
    }
}

/// Maps original-photo coordinates onto the working canvas: `canvas = photo * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

impl Placement {
    fn translated(self, dx: f32, dy: f32) -> Self {
        Self {
            offset_x: self.offset_x + dx,
            offset_y: self.offset_y + dy,
            ..self
        }
    }

    fn scaled(self, sx: f32, sy: f32) -> Self {
        Self {
            scale_x: self.scale_x * sx,
            scale_y: self.scale_y * sy,
            offset_x: self.offset_x * sx,
            offset_y: self.offset_y * sy,
        }
    }

    pub fn to_affine(&self) -> Affine {
        Affine::scale(self.scale_x, self.scale_y)
            .then(&Affine::translation(self.offset_x, self.offset_y))
    }

    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let rect = rect.standardized();
        Rect::new(
            rect.x * self.scale_x + self.offset_x,
            rect.y * self.scale_y + self.offset_y,
            rect.width * self.scale_x,
            rect.height * self.scale_y,
        )
    }
}

/// Working image plus where the original photo sits on it.
struct Canvas {
    image: RgbaImage,
    placement: Placement,
}

impl Canvas {
    fn crop(&mut self, x: u32, y: u32, width: u32, height: u32) {
        if (x, y, width, height) == (0, 0, self.image.width(), self.image.height()) {
            return;
        }
        self.image = imageops::crop_imm(&self.image, x, y, width, height).to_image();
        self.placement = self.placement.translated(-(x as f32), -(y as f32));
    }

    fn pad(&mut self, (left, top, right, bottom): (u32, u32, u32, u32), fill: Rgba<u8>) {
        self.image = pad_sides(&self.image, (left, top, right, bottom), fill);
        self.placement = self.placement.translated(left as f32, top as f32);
    }

    fn pad_square(&mut self, size: u32, fill: Rgba<u8>) {
        let (w, h) = self.image.dimensions();
        if let Some((x, y)) = pad_offsets((w, h), size) {
            self.image = pad_to_square(&self.image, size, fill);
            self.placement = self.placement.translated(x as f32, y as f32);
        }
    }

    /// Replace the image with a rescaled version of itself.
    fn rescaled(&mut self, image: RgbaImage) {
        let sx = image.width() as f32 / self.image.width() as f32;
        let sy = image.height() as f32 / self.image.height() as f32;
        self.image = image;
        self.placement = self.placement.scaled(sx, sy);
    }

    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Which fit branch produced the square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitOutcome {
    /// Short side scaled to target, then center-cropped.
    Cropped,
    /// Long side scaled to target, then padded.
    Padded,
    /// Source too small: long side kept or reduced, then padded.
    LowResolutionPadded,
}

/// Result of composing one photo.
#[derive(Debug, Clone)]
pub struct Composition {
    /// Final `size × size` canvas.
    pub image: RgbaImage,
    /// Original-photo to canvas mapping.
    pub placement: Placement,
    /// Subject box in canvas coordinates.
    pub subject: Option<Rect>,
    pub fit: FitOutcome,
    pub upscale: Option<UpscaleStop>,
    /// Whether a background mask was applied.
    pub background_removed: bool,
}

/// Composes square canvases using the run's configuration and oracles.
pub struct CanvasComposer<'a> {
    config: &'a PipelineConfig,
    oracles: &'a Oracles,
}

impl<'a> CanvasComposer<'a> {
    pub fn new(config: &'a PipelineConfig, oracles: &'a Oracles) -> Self {
        Self { config, oracles }
    }

    /// Find the subject face, or report none when detection is off or unavailable.
    pub fn locate_subject(&self, image: &RgbaImage) -> FaceSelection {
        if !self.config.detect_faces {
            return FaceSelection::NoFace;
        }
        let Some(detector) = self.oracles.detector.as_deref() else {
            return FaceSelection::NoFace;
        };
        MultiAngleDetector::new(detector, self.config.detection.clone()).detect_largest_face(image)
    }

    /// Compose the final square canvas for one photo.
    pub fn compose(
        &self,
        image: RgbaImage,
        subject: Option<Rect>,
        auxiliary: &AuxiliaryAssets,
    ) -> Result<Composition> {
        let _guard = timing_guard("squareprep_core::compose", log::Level::Debug);
        anyhow::ensure!(
            image.width() > 0 && image.height() > 0,
            "cannot compose an empty image"
        );
        let size = self.config.size;
        let photo_dims = image.dimensions();
        let mut canvas = Canvas {
            image,
            placement: Placement::default(),
        };

        if let (true, Some(subject)) = (self.config.maximize_subject_fill, subject) {
            let extent = Rect::from_dimensions(canvas.dimensions());
            let window = clamp_square_around(&subject, &extent, self.config.subject_margin);
            let (x, y, w, h) = pixel_window(&window, canvas.dimensions());
            debug!("Maximizing subject fill: cropping to {w}x{h} at ({x}, {y})");
            canvas.crop(x, y, w, h);
        }

        let fill = self.pad_fill(&canvas.image);

        if let Some(subject) = subject {
            let margins = centering_margins(&canvas.placement.map_rect(&subject), canvas.dimensions());
            debug!("Centering subject with margins {margins:?}");
            canvas.pad(margins, fill);
        }

        let mut upscale = None;
        if let Some(upscaler) = self.oracles.upscaler.as_deref() {
            let (w, h) = canvas.dimensions();
            if w.min(h) < size {
                let outcome = upscale_until(
                    upscaler,
                    canvas.image.clone(),
                    size,
                    self.config.max_upscale_iterations,
                );
                debug!("Super-resolution finished after {} pass(es): {:?}", outcome.passes, outcome.stop);
                if outcome.passes > 0 {
                    canvas.rescaled(outcome.image);
                }
                upscale = Some(outcome.stop);
            }
        }

        let fit = self.fit_to_square(&mut canvas, subject, fill);

        let mut background_removed = false;
        if self.config.remove_background {
            let photo_to_canvas = canvas.placement.to_affine();
            if let Some(mask) = self.background_mask(&canvas.image, auxiliary, photo_dims, &photo_to_canvas) {
                canvas.image = apply_alpha_mask(&canvas.image, &mask);
                background_removed = true;
            }
        }

        let image = finalize(canvas.image, size);
        Ok(Composition {
            image,
            placement: canvas.placement,
            subject: subject.map(|s| canvas.placement.map_rect(&s)),
            fit,
            upscale,
            background_removed,
        })
    }

    fn pad_fill(&self, image: &RgbaImage) -> Rgba<u8> {
        match self.config.pad_color {
            PadColorPolicy::Transparent => RgbaColor::TRANSPARENT.to_pixel(),
            PadColorPolicy::EdgeAverage => edge_average_color(image),
            PadColorPolicy::Solid(color) => color.to_pixel(),
        }
    }

    fn fit_to_square(&self, canvas: &mut Canvas, subject: Option<Rect>, fill: Rgba<u8>) -> FitOutcome {
        let size = self.config.size;
        let target = size as f32;
        let (w, h) = canvas.dimensions();

        if (w.min(h) as f32) + FIT_TOLERANCE < target {
            canvas.rescaled(scale_long_side(&canvas.image, size));
            canvas.pad_square(size, fill);
            return FitOutcome::LowResolutionPadded;
        }

        let by_short = scale_short_side(&canvas.image, size);
        let long_after = by_short.width().max(by_short.height()) as f32;
        let crop = match self.config.fit {
            FitPreference::Pad => long_after <= target + FIT_TOLERANCE,
            FitPreference::Crop => {
                let sx = by_short.width() as f32 / w as f32;
                let sy = by_short.height() as f32 / h as f32;
                let (x, y, cw, ch) = center_square_window(by_short.dimensions(), size);
                let window = Rect::new(x as f32, y as f32, cw as f32, ch as f32);
                subject
                    .map(|s| canvas.placement.scaled(sx, sy).map_rect(&s))
                    .is_none_or(|s| window.contains(&s, 1.0))
            }
        };

        if crop {
            canvas.rescaled(by_short);
            let (x, y, cw, ch) = center_square_window(canvas.dimensions(), size);
            canvas.crop(x, y, cw, ch);
            FitOutcome::Cropped
        } else {
            canvas.rescaled(scale_long_side(&canvas.image, size));
            canvas.pad_square(size, fill);
            FitOutcome::Padded
        }
    }

    fn background_mask(
        &self,
        image: &RgbaImage,
        auxiliary: &AuxiliaryAssets,
        photo_dims: (u32, u32),
        photo_to_canvas: &Affine,
    ) -> Option<GrayImage> {
        let primary = match self.oracles.segmenter.as_deref() {
            Some(segmenter) => {
                if segmenter.engine() != self.config.segmentation_engine {
                    debug!(
                        "Segmenting with '{}' (requested '{}')",
                        segmenter.engine(),
                        self.config.segmentation_engine
                    );
                }
                match segmenter.segment(image) {
                    Ok(SegmentationOutcome::Mask(mask)) => Some(mask),
                    Ok(SegmentationOutcome::Unsupported) => {
                        info!("Segmentation engine '{}' produced no mask", segmenter.engine());
                        None
                    }
                    Err(err) => {
                        warn!("Segmentation failed, keeping background: {err:#}");
                        None
                    }
                }
            }
            None => None,
        };

        let aligned = align_auxiliary(auxiliary, photo_dims, photo_to_canvas, image.dimensions());
        let mask = composite_mask(primary, &aligned, image.dimensions(), self.config.refinement);
        if mask.is_none() {
            info!("No background mask available; output stays opaque");
        }
        mask
    }
}

/// Per-side padding that moves the subject's center to the canvas center.
///
/// Each side receives `max(0, opposite distance - own distance)`, so the canvas only grows.
pub fn centering_margins(subject: &Rect, (width, height): (u32, u32)) -> (u32, u32, u32, u32) {
    let (cx, cy) = subject.center();
    let left = cx;
    let right = width as f32 - cx;
    let top = cy;
    let bottom = height as f32 - cy;
    let grow = |value: f32| value.max(0.0).round() as u32;
    (
        grow(right - left),
        grow(bottom - top),
        grow(left - right),
        grow(top - bottom),
    )
}

/// Integer crop window for a float rect, clamped to the image.
fn pixel_window(rect: &Rect, (width, height): (u32, u32)) -> (u32, u32, u32, u32) {
    let x = (rect.x.round().max(0.0) as u32).min(width.saturating_sub(1));
    let y = (rect.y.round().max(0.0) as u32).min(height.saturating_sub(1));
    let w = (rect.width.round().max(1.0) as u32).min(width - x);
    let h = (rect.height.round().max(1.0) as u32).min(height - y);
    (x, y, w, h)
}

/// Resample auxiliary signals from photo space onto the working canvas.
fn align_auxiliary(
    auxiliary: &AuxiliaryAssets,
    photo_dims: (u32, u32),
    photo_to_canvas: &Affine,
    canvas_dims: (u32, u32),
) -> AuxiliaryAssets {
    let to_canvas = |source_dims: (u32, u32)| {
        Affine::scale(
            photo_dims.0 as f32 / source_dims.0.max(1) as f32,
            photo_dims.1 as f32 / source_dims.1.max(1) as f32,
        )
        .then(photo_to_canvas)
    };

    let portrait_matte = auxiliary
        .portrait_matte
        .as_ref()
        .and_then(|matte| warp_gray(matte, &to_canvas(matte.dimensions()), canvas_dims));
    let depth = auxiliary.depth.as_ref().and_then(|depth| {
        let quantized = GrayImage::from_fn(depth.width(), depth.height(), |x, y| {
            Luma([(depth.get_pixel(x, y)[0].clamp(0.0, 1.0) * 255.0).round() as u8])
        });
        let warped = warp_gray(&quantized, &to_canvas(depth.dimensions()), canvas_dims)?;
        Some(DepthImage::from_fn(canvas_dims.0, canvas_dims.1, |x, y| {
            Luma([f32::from(warped.get_pixel(x, y)[0]) / 255.0])
        }))
    });

    AuxiliaryAssets {
        portrait_matte,
        depth,
    }
}

fn warp_gray(source: &GrayImage, transform: &Affine, (width, height): (u32, u32)) -> Option<GrayImage> {
    let projection = Projection::from_matrix(transform.to_matrix())?;
    let mut out = GrayImage::new(width, height);
    warp_into(source, &projection, Interpolation::Bilinear, Luma([0]), &mut out);
    Some(out)
}

/// Exactly `size × size`, anchored at the canvas origin.
fn finalize(image: RgbaImage, size: u32) -> RgbaImage {
    if image.dimensions() == (size, size) {
        return image;
    }
    let mut out = RgbaImage::new(size, size);
    imageops::replace(&mut out, &image, 0, 0);
    out
}
