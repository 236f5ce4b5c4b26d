use std::path::Path;

use anyhow::Result;
use image::RgbaImage;

use crate::detector::FaceDetector;
use crate::geometry::Rect;
use crate::model::OnnxModel;
use crate::postprocess::{PostprocessConfig, apply_postprocess, decode_outputs};
use crate::preprocess::{InputSize, bgr_blob};
use squareprep_utils::{config::DetectionSettings, timing_guard};

/// YuNet ONNX face detector.
///
/// Implements [`FaceDetector`] by resizing the photo to the model input, decoding
/// the raw outputs and scaling the surviving boxes back to the photo's pixels.
#[derive(Debug)]
pub struct YuNetFaceDetector {
    model: OnnxModel,
    postprocess: PostprocessConfig,
}

impl YuNetFaceDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: InputSize,
        postprocess: PostprocessConfig,
    ) -> Result<Self> {
        let model = OnnxModel::load(model_path, input_size, "YuNet")?;
        Ok(Self { model, postprocess })
    }

    /// Build a detector from persisted detection settings.
    pub fn from_settings(settings: &DetectionSettings) -> Result<Self> {
        let path = settings
            .model_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no face detection model configured"))?;
        Self::new(
            path,
            InputSize::new(settings.input_width, settings.input_height),
            PostprocessConfig::from(settings),
        )
    }
}

impl FaceDetector for YuNetFaceDetector {
    fn detect(&self, image: &RgbaImage) -> Result<Vec<Rect>> {
        let _guard = timing_guard("squareprep_core::yunet_detect", log::Level::Trace);
        let input_size = self.model.input_size();
        let prepared = bgr_blob(image, input_size)?;
        let outputs = {
            let _guard = timing_guard("squareprep_core::yunet_inference", log::Level::Trace);
            self.model.run(prepared.tensor)?
        };
        let boxes = decode_outputs(&outputs, input_size)?;
        Ok(
            apply_postprocess(boxes, prepared.scale_x, prepared.scale_y, &self.postprocess)
                .into_iter()
                .map(|b| b.rect)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_path_is_reported() {
        let settings = DetectionSettings {
            model_path: None,
            ..Default::default()
        };
        let err = YuNetFaceDetector::from_settings(&settings).expect_err("no model");
        assert!(format!("{err}").contains("no face detection model"));
    }
}
