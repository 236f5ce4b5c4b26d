//! Command-line argument definitions for squareprep.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use squareprep_utils::{FitPreference, PadColorPolicy, SegmentationEngine};

/// Turn a folder of portrait photos into uniformly sized square PNGs.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct PrepArgs {
    /// Folder containing the photos to process (not searched recursively).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Display name used for the output folder and file names.
    #[arg(short, long)]
    pub name: String,

    /// Where the run folder is created. Defaults to the input folder's parent.
    #[arg(short, long, value_name = "DIR")]
    pub output_root: Option<PathBuf>,

    /// Side length of the square output in pixels.
    #[arg(short, long)]
    pub size: Option<u32>,

    /// Make the background transparent.
    #[arg(long, action = ArgAction::SetTrue)]
    pub remove_background: bool,

    /// Padding fill: `transparent`, `edge` (edge-average color) or `#RRGGBB[AA]`.
    #[arg(long, value_name = "COLOR")]
    pub pad_color: Option<PadColorPolicy>,

    /// Skip face detection and treat every photo as having no subject.
    #[arg(long = "no-face-detection", action = ArgAction::SetTrue)]
    pub no_face_detection: bool,

    /// Path to the YuNet ONNX face detection model.
    #[arg(long, value_name = "PATH")]
    pub face_model: Option<PathBuf>,

    /// Behaviour when the photo exceeds the target size: `pad` or `crop`.
    #[arg(long, value_name = "MODE")]
    pub fit: Option<FitPreference>,

    /// Crop tightly around the detected subject before centering.
    #[arg(long, action = ArgAction::SetTrue)]
    pub maximize_fill: bool,

    /// Square side as a multiple of the subject box when maximizing fill.
    #[arg(long, value_name = "FACTOR", requires = "maximize_fill")]
    pub subject_margin: Option<f32>,

    /// Segmentation strategy: `person`, `foreground` or `matte-only`.
    #[arg(long, value_name = "ENGINE")]
    pub segmentation_engine: Option<SegmentationEngine>,

    /// ONNX model for the `person` segmentation engine.
    #[arg(long, value_name = "PATH")]
    pub person_model: Option<PathBuf>,

    /// ONNX model for the `foreground` segmentation engine.
    #[arg(long, value_name = "PATH")]
    pub foreground_model: Option<PathBuf>,

    /// Gaussian feather radius for the background mask (pixels).
    #[arg(long, value_name = "PX")]
    pub feather: Option<f32>,

    /// Erosion radius for the background mask (pixels).
    #[arg(long, value_name = "PX")]
    pub erosion: Option<u32>,

    /// ONNX super-resolution model used for photos smaller than the target size.
    #[arg(long, value_name = "PATH")]
    pub upscale_model: Option<PathBuf>,

    /// PNG compression: fast, default, best or a level 0-9.
    #[arg(long, value_name = "LEVEL")]
    pub png_compression: Option<String>,

    /// Optional settings JSON. Defaults to `config/squareprep.json` when present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write a JSON run report (processed pairs and failures) to this file.
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Enable telemetry timing logs (defaults to settings file).
    #[arg(long, action = ArgAction::SetTrue)]
    pub telemetry: bool,

    /// Override telemetry logging level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub telemetry_level: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
