//! YuNet output decoding, score filtering and non-maximum suppression.

use std::cmp::Ordering;

use anyhow::Result;
use tract_onnx::prelude::Tensor;

use crate::geometry::Rect;
use crate::preprocess::InputSize;
use squareprep_utils::config::DetectionSettings;

const STRIDES: [usize; 3] = [8, 16, 32];
const OUTPUTS_PER_STRIDE: usize = 4; // cls, obj, bbox, kps
const FUSED_COLS: usize = 15; // bbox (4) + landmarks (10) + score (1)

/// Score and NMS parameters applied to raw detections.
#[derive(Debug, Clone)]
pub struct PostprocessConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.9,
            nms_threshold: 0.3,
            top_k: 5_000,
        }
    }
}

impl From<&DetectionSettings> for PostprocessConfig {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            score_threshold: settings.score_threshold,
            nms_threshold: settings.nms_threshold,
            ..Self::default()
        }
    }
}

/// A box in model input space with its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredBox {
    pub rect: Rect,
    pub score: f32,
}

/// Turn the model outputs into scored boxes in model input space.
///
/// Accepts either a single fused `[N, 15]` / `[1, N, 15]` tensor or the twelve
/// per-stride tensors (cls, obj, bbox, kps for strides 8, 16 and 32).
pub fn decode_outputs(outputs: &[Tensor], input_size: InputSize) -> Result<Vec<ScoredBox>> {
    match outputs.len() {
        1 => decode_fused(&outputs[0]),
        len if len == STRIDES.len() * OUTPUTS_PER_STRIDE => decode_strides(outputs, input_size),
        other => anyhow::bail!(
            "unexpected number of YuNet outputs: expected 1 or {}, got {other}",
            STRIDES.len() * OUTPUTS_PER_STRIDE
        ),
    }
}

fn decode_fused(output: &Tensor) -> Result<Vec<ScoredBox>> {
    let rows = match output.shape() {
        [rows, FUSED_COLS] | [1, rows, FUSED_COLS] => *rows,
        other => anyhow::bail!("YuNet output must have shape [N, 15] or [1, N, 15] (got {other:?})"),
    };
    let values = output
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("YuNet output is not f32: {e}"))?;
    Ok(values
        .chunks_exact(FUSED_COLS)
        .take(rows)
        .map(|row| ScoredBox {
            rect: Rect::new(row[0], row[1], row[2], row[3]),
            score: row[14],
        })
        .collect())
}

fn decode_strides(outputs: &[Tensor], input_size: InputSize) -> Result<Vec<ScoredBox>> {
    let pad_w = (input_size.width as usize).div_ceil(32) * 32;
    let pad_h = (input_size.height as usize).div_ceil(32) * 32;
    let mut boxes = Vec::new();

    for (stride_index, &stride) in STRIDES.iter().enumerate() {
        let cols = pad_w / stride;
        let rows = pad_h / stride;
        let cells = cols * rows;
        let cls = stride_slice(outputs, stride_index, "cls", cells)?;
        let obj = stride_slice(outputs, stride_index + STRIDES.len(), "obj", cells)?;
        let bbox = stride_slice(outputs, stride_index + STRIDES.len() * 2, "bbox", cells * 4)?;

        let stride_f = stride as f32;
        for idx in 0..cells {
            let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
            if !score.is_finite() {
                continue;
            }
            let (row, col) = ((idx / cols) as f32, (idx % cols) as f32);
            let d = &bbox[idx * 4..idx * 4 + 4];
            let cx = (col + d[0]) * stride_f;
            let cy = (row + d[1]) * stride_f;
            let w = d[2].exp() * stride_f;
            let h = d[3].exp() * stride_f;
            boxes.push(ScoredBox {
                rect: Rect::new(cx - 0.5 * w, cy - 0.5 * h, w, h),
                score,
            });
        }
    }
    Ok(boxes)
}

fn stride_slice<'t>(
    outputs: &'t [Tensor],
    index: usize,
    name: &str,
    expected: usize,
) -> Result<&'t [f32]> {
    let values = outputs[index]
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("{name} output not f32: {e}"))?;
    anyhow::ensure!(
        values.len() == expected,
        "{name} length mismatch: expected {expected}, got {}",
        values.len()
    );
    Ok(values)
}

/// Filter by score, scale into source coordinates and suppress overlapping boxes.
pub fn apply_postprocess(
    boxes: Vec<ScoredBox>,
    scale_x: f32,
    scale_y: f32,
    config: &PostprocessConfig,
) -> Vec<ScoredBox> {
    let mut kept: Vec<ScoredBox> = boxes
        .into_iter()
        .filter(|b| b.score.is_finite() && b.score >= config.score_threshold)
        .map(|b| ScoredBox {
            rect: Rect::new(
                b.rect.x * scale_x,
                b.rect.y * scale_y,
                b.rect.width * scale_x,
                b.rect.height * scale_y,
            ),
            score: b.score,
        })
        .filter(|b| !b.rect.is_empty())
        .collect();

    kept.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    if config.top_k > 0 {
        kept.truncate(config.top_k);
    }
    if config.nms_threshold > 0.0 && kept.len() > 1 {
        kept = non_max_suppression(kept, config.nms_threshold);
    }
    kept
}

fn non_max_suppression(detections: Vec<ScoredBox>, threshold: f32) -> Vec<ScoredBox> {
    let mut result: Vec<ScoredBox> = Vec::with_capacity(detections.len());
    for detection in detections {
        if result
            .iter()
            .all(|kept| detection.rect.iou(&kept.rect) <= threshold)
        {
            result.push(detection);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fused(rows: &[[f32; 15]]) -> Tensor {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_shape(&[rows.len(), 15], &flat).unwrap()
    }

    fn row(x: f32, y: f32, w: f32, h: f32, score: f32) -> [f32; 15] {
        let mut row = [0.0; 15];
        row[..4].copy_from_slice(&[x, y, w, h]);
        row[14] = score;
        row
    }

    #[test]
    fn filters_by_score_and_scales_coordinates() {
        let tensor = fused(&[row(10.0, 20.0, 30.0, 40.0, 0.95), row(5.0, 5.0, 10.0, 10.0, 0.2)]);
        let boxes = decode_outputs(&[tensor], InputSize::default()).unwrap();
        let kept = apply_postprocess(
            boxes,
            2.0,
            0.5,
            &PostprocessConfig {
                score_threshold: 0.3,
                ..Default::default()
            },
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].rect, Rect::new(20.0, 10.0, 60.0, 20.0));
    }

    #[test]
    fn applies_non_max_suppression() {
        let tensor = fused(&[row(0.0, 0.0, 10.0, 10.0, 0.95), row(1.0, 1.0, 10.0, 10.0, 0.99)]);
        let boxes = decode_outputs(&[tensor], InputSize::default()).unwrap();
        let kept = apply_postprocess(boxes, 1.0, 1.0, &PostprocessConfig::default());
        assert_eq!(kept.len(), 1);
        assert!((kept[0].score - 0.99).abs() < f32::EPSILON);
    }

    #[test]
    fn decodes_stride_outputs() {
        let size = InputSize::square(64);
        let mut tensors = Vec::new();
        let cells: Vec<usize> = STRIDES.iter().map(|s| (64 / s) * (64 / s)).collect();
        for (group, per_cell) in [(0, 1), (1, 1), (2, 4), (3, 10)] {
            for (i, &n) in cells.iter().enumerate() {
                let mut values = vec![0f32; n * per_cell];
                // One confident cell at stride 8, cell (row 1, col 2).
                if i == 0 && group < 2 {
                    values[8 + 2] = 1.0;
                }
                tensors.push(Tensor::from_shape(&[n * per_cell], &values).unwrap());
            }
        }
        let boxes = decode_outputs(&tensors, size).unwrap();
        let kept = apply_postprocess(boxes, 1.0, 1.0, &PostprocessConfig::default());
        assert_eq!(kept.len(), 1);
        // exp(0) * 8 = 8px box centered on (2 * 8, 1 * 8).
        assert_eq!(kept[0].rect, Rect::new(12.0, 4.0, 8.0, 8.0));
    }

    #[test]
    fn rejects_unexpected_output_count() {
        let tensor = Tensor::from_shape(&[1], &[0f32]).unwrap();
        assert!(decode_outputs(&[tensor.clone(), tensor], InputSize::default()).is_err());
    }
}
