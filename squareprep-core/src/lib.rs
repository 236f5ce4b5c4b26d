//! Dataset preparation core.
//!
//! Turns a folder of portrait photos into uniformly sized square PNGs: faces are
//! located with multi-angle voting over a pluggable detector, the subject is
//! centered by padding, the canvas is fitted to the target square and the
//! background can optionally be removed with a composited mask.

/// Face candidate clustering across rotations.
pub mod cluster;
/// Per-photo canvas composition.
pub mod composer;
/// Multi-angle face detection.
pub mod detector;
/// Fatal input errors.
pub mod error;
/// Rects, affine transforms and square crop/pad helpers.
pub mod geometry;
/// Segmentation mask compositing.
pub mod mask;
/// ONNX model loading and execution.
pub mod model;
/// Batch orchestration.
pub mod pipeline;
/// YuNet detection post-processing (decoding, score filtering, NMS).
pub mod postprocess;
/// Model input tensor preparation.
pub mod preprocess;
/// Segmentation oracles.
pub mod segmentation;
/// Face selection cascade.
pub mod selector;
/// Super-resolution oracles.
pub mod upscale;
/// YuNet face detector.
pub mod yunet;

pub use cluster::{RectCluster, cluster_rects};
pub use composer::{
    CanvasComposer, Composition, FitOutcome, Oracles, PipelineConfig, Placement,
    centering_margins,
};
pub use detector::{FaceDetector, MultiAngleConfig, MultiAngleDetector};
pub use error::InputError;
pub use geometry::{
    Affine, Rect, center_crop_square, clamp_square_around, edge_average_color,
    intersection_over_union, pad_to_square, rotated_image, scale_long_side, scale_short_side,
    transform_rect,
};
pub use mask::{AuxiliaryAssets, MaskRefinement, apply_alpha_mask, composite_mask};
pub use pipeline::{
    ProcessedImagePair, ProcessingFailure, ProgressEvent, RunReport, collect_inputs,
    create_output_directory, run_batch,
};
pub use segmentation::{
    MatteOnlySegmenter, OnnxSegmenter, PersonSegmenter, SegmentationOutcome, resolve_segmenter,
};
pub use selector::{FaceCandidate, FaceSelection, SelectionStage, select_face};
pub use upscale::{OnnxUpscaler, UpscaleOutcome, UpscaleStop, Upscaler, upscale_until};
pub use yunet::YuNetFaceDetector;

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
