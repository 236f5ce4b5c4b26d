use anyhow::Result;
use image::RgbaImage;
use log::{debug, warn};

use crate::cluster::{DEFAULT_CLUSTER_IOU, cluster_rects};
use crate::geometry::{Affine, Rect, rotated_image, scale_long_side, transform_rect};
use crate::selector::{FaceCandidate, FaceSelection, SelectionStage, largest_rect, select_face};
use squareprep_utils::timing_guard;

/// Mapped detections this small (either side, pixels) are discarded as noise.
pub const MIN_FACE_SIDE: f32 = 2.0;

/// Black-box face detector returning absolute pixel boxes in the image's own frame.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbaImage) -> Result<Vec<Rect>>;
}

/// Settings for the rotation voting pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiAngleConfig {
    /// Rotation angles in degrees.
    pub angles: Vec<f32>,
    /// IoU threshold used when clustering detections across angles.
    pub cluster_iou: f32,
    /// The photo is downscaled so its long side does not exceed this before rotating.
    pub working_long_side: u32,
}

impl Default for MultiAngleConfig {
    fn default() -> Self {
        Self {
            angles: vec![-15.0, 0.0, 15.0],
            cluster_iou: DEFAULT_CLUSTER_IOU,
            working_long_side: 1280,
        }
    }
}

/// Runs a [`FaceDetector`] over several rotations of a photo and votes on the results.
pub struct MultiAngleDetector<'a> {
    detector: &'a dyn FaceDetector,
    config: MultiAngleConfig,
}

impl<'a> MultiAngleDetector<'a> {
    pub fn new(detector: &'a dyn FaceDetector, config: MultiAngleConfig) -> Self {
        Self { detector, config }
    }

    pub fn config(&self) -> &MultiAngleConfig {
        &self.config
    }

    /// Detect at every configured angle and cluster the detections in original coordinates.
    ///
    /// A failing detector call at one angle counts as "no detections" for that angle.
    pub fn detect_candidates(&self, image: &RgbaImage) -> Vec<FaceCandidate> {
        let _guard = timing_guard("squareprep_core::detect_candidates", log::Level::Debug);
        let extent = Rect::from_dimensions(image.dimensions());

        let working = scale_long_side(image, self.config.working_long_side);
        let to_original = Affine::scale(
            image.width() as f32 / working.width() as f32,
            image.height() as f32 / working.height() as f32,
        );

        let mut mapped = Vec::new();
        for &angle in &self.config.angles {
            let (rotated, forward) = match rotated_image(&working, angle) {
                Ok(result) => result,
                Err(err) => {
                    warn!("Skipping face detection at {angle}°: {err}");
                    continue;
                }
            };
            let Some(inverse) = forward.inverse() else {
                continue;
            };
            let back = inverse.then(&to_original);

            let detections = match self.detector.detect(&rotated) {
                Ok(detections) => detections,
                Err(err) => {
                    warn!("Face detector failed at {angle}°: {err:#}");
                    continue;
                }
            };
            debug!("{} raw detection(s) at {angle}°", detections.len());

            mapped.extend(
                detections
                    .iter()
                    .map(|rect| transform_rect(rect, &back).intersection(&extent))
                    .filter(|rect| rect.width > MIN_FACE_SIDE && rect.height > MIN_FACE_SIDE),
            );
        }

        cluster_rects(&mapped, self.config.cluster_iou)
            .into_iter()
            .map(|cluster| FaceCandidate {
                rect: cluster.representative().intersection(&extent),
                support: cluster.count(),
            })
            .filter(|candidate| !candidate.rect.is_empty())
            .collect()
    }

    /// Locate the principal face, falling back to a single unrotated pass at full resolution.
    pub fn detect_largest_face(&self, image: &RgbaImage) -> FaceSelection {
        let _guard = timing_guard("squareprep_core::detect_largest_face", log::Level::Debug);
        let extent = Rect::from_dimensions(image.dimensions());
        let candidates = self.detect_candidates(image);
        if !candidates.is_empty() {
            return select_face(&candidates, &extent);
        }

        debug!("No clustered face candidates; running a single unrotated pass");
        let detections = match self.detector.detect(image) {
            Ok(detections) => detections,
            Err(err) => {
                warn!("Single-pass face detection failed: {err:#}");
                return FaceSelection::NoFace;
            }
        };
        let clipped: Vec<Rect> = detections
            .iter()
            .map(|rect| rect.standardized().intersection(&extent))
            .filter(|rect| !rect.is_empty())
            .collect();
        match largest_rect(&clipped) {
            Some(rect) => FaceSelection::Found {
                rect,
                stage: SelectionStage::SinglePass,
            },
            None => FaceSelection::NoFace,
        }
    }
}
