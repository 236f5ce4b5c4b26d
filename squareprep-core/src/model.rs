use std::{fmt::Write, path::Path};

use anyhow::{Context, Result};
use log::{debug, warn};
use tract_onnx::prelude::*;

use crate::preprocess::InputSize;

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// An ONNX graph prepared for repeated execution on `[1, 3, H, W]` inputs.
///
/// Shared by the face detector, the segmentation models and the super-resolution model.
#[derive(Debug)]
pub struct OnnxModel {
    runnable: RunnableModel,
    input_size: InputSize,
    label: &'static str,
}

impl OnnxModel {
    /// Load and optimize an ONNX graph with a fixed input resolution.
    ///
    /// Falls back to the decluttered (unoptimized) graph when optimization fails.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        input_size: InputSize,
        label: &'static str,
    ) -> Result<Self> {
        let path = model_path.as_ref();
        anyhow::ensure!(
            path.exists(),
            "{label} model file not found: {}",
            path.display()
        );

        let runnable = match load_runnable_model(path, input_size, true) {
            Ok(model) => {
                debug!(
                    "{label} model {} optimized ({}x{})",
                    path.display(),
                    input_size.width,
                    input_size.height
                );
                model
            }
            Err(opt_err) => {
                let optimize_msg = format!("{opt_err}");
                let mut chain_msg = String::new();
                for cause in opt_err.chain() {
                    let _ = writeln!(&mut chain_msg, "  - {cause}");
                }
                warn!(
                    "{label} model {} failed optimized load ({optimize_msg}); using decluttered graph.\nError chain:\n{}",
                    path.display(),
                    chain_msg.trim_end()
                );
                load_runnable_model(path, input_size, false).with_context(|| {
                    format!("fallback to decluttered {label} graph failed after: {optimize_msg}")
                })?
            }
        };

        Ok(Self {
            runnable,
            input_size,
            label,
        })
    }

    /// Run the graph and return every output tensor.
    pub fn run(&self, input: Tensor) -> Result<Vec<Tensor>> {
        let outputs = self
            .runnable
            .run(tvec![input.into()])
            .map_err(|e| anyhow::anyhow!("{} execution failed: {e}", self.label))?;
        let tensors: Vec<Tensor> = outputs
            .into_iter()
            .map(|value| value.into_tensor())
            .collect();
        anyhow::ensure!(!tensors.is_empty(), "{} model produced no outputs", self.label);
        Ok(tensors)
    }

    pub fn input_size(&self) -> InputSize {
        self.input_size
    }
}

fn load_runnable_model(path: &Path, input_size: InputSize, optimized: bool) -> Result<RunnableModel> {
    let shape = [
        1usize,
        3,
        input_size.height as usize,
        input_size.width as usize,
    ];
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))?
        .with_input_fact(0, f32::fact(shape).into())
        .map_err(|e| anyhow::anyhow!("unable to fix input shape {shape:?}: {e}"))?;

    if optimized {
        model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))
    } else {
        model
            .into_typed()
            .map_err(|e| anyhow::anyhow!("unable to type-check graph: {e}"))?
            .into_decluttered()
            .map_err(|e| anyhow::anyhow!("unable to declutter graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loading_missing_model_fails() {
        let err = OnnxModel::load("missing.onnx", InputSize::default(), "test")
            .expect_err("missing model");
        assert!(format!("{err}").contains("not found"));
    }

    #[test]
    fn invalid_model_produces_useful_error() {
        let mut temp = NamedTempFile::new().expect("temp file");
        temp.write_all(b"not a real onnx file")
            .expect("write mock model");

        let err = OnnxModel::load(temp.path(), InputSize::default(), "test")
            .expect_err("invalid ONNX should fail");
        let message = format!("{err:#}");
        assert!(
            message.contains("failed to parse ONNX") || message.contains("unable to optimize"),
            "Unexpected error message: {message}"
        );
    }
}
