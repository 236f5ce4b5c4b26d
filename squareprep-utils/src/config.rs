//! Persisted settings shared by the CLI and the core pipeline.
//!
//! [`AppSettings`] is the on-disk JSON form. Every struct uses `#[serde(default)]`
//! so partial files keep working as new fields are added. The core crate turns a
//! loaded `AppSettings` into its own immutable per-run snapshot.

use crate::color::{RgbaColor, parse_hex_color};

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// How areas outside the photo are filled when the canvas grows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PadColorPolicy {
    /// Fully transparent padding.
    Transparent,
    /// Opaque mean color of the four border bands of the working image.
    #[default]
    EdgeAverage,
    /// A fixed color.
    Solid(RgbaColor),
}

impl fmt::Display for PadColorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PadColorPolicy::Transparent => f.write_str("transparent"),
            PadColorPolicy::EdgeAverage => f.write_str("edge"),
            PadColorPolicy::Solid(color) => f.write_str(&color.to_hex()),
        }
    }
}

impl FromStr for PadColorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transparent" | "clear" | "none" => Ok(PadColorPolicy::Transparent),
            "edge" | "edge-average" | "edge_average" | "auto" => Ok(PadColorPolicy::EdgeAverage),
            other => parse_hex_color(other).map(PadColorPolicy::Solid).ok_or_else(|| {
                format!("invalid pad color '{other}'; expected 'transparent', 'edge' or #RRGGBB[AA]")
            }),
        }
    }
}

/// What to do when the photo is larger than the target square in both dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FitPreference {
    /// Crop only when the photo is already square; otherwise scale the long side and pad.
    #[default]
    Pad,
    /// Center-crop to a square unless the crop would cut into the subject.
    Crop,
}

impl fmt::Display for FitPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FitPreference::Crop => "crop",
            FitPreference::Pad => "pad",
        })
    }
}

impl FromStr for FitPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crop" => Ok(FitPreference::Crop),
            "pad" => Ok(FitPreference::Pad),
            other => Err(format!("invalid fit preference '{other}'; expected 'crop' or 'pad'")),
        }
    }
}

/// Named background segmentation strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentationEngine {
    /// Person segmentation model (default).
    #[default]
    Person,
    /// Salient-foreground model; falls back to `Person` when unavailable.
    Foreground,
    /// No model; only auxiliary matte/depth sidecars contribute.
    MatteOnly,
}

impl SegmentationEngine {
    pub fn as_label(self) -> &'static str {
        match self {
            SegmentationEngine::Person => "person",
            SegmentationEngine::Foreground => "foreground",
            SegmentationEngine::MatteOnly => "matte-only",
        }
    }
}

impl fmt::Display for SegmentationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for SegmentationEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "person" => Ok(SegmentationEngine::Person),
            "foreground" => Ok(SegmentationEngine::Foreground),
            "matte-only" | "matte" => Ok(SegmentationEngine::MatteOnly),
            other => Err(format!(
                "invalid segmentation engine '{other}'; expected 'person', 'foreground' or 'matte-only'"
            )),
        }
    }
}

/// Output canvas settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    /// Side length of the square output in pixels.
    pub size: u32,
    /// Fill policy for padded regions.
    pub pad_color: PadColorPolicy,
    /// Crop-vs-pad preference when the photo exceeds the target size.
    pub fit: FitPreference,
    /// Crop tightly around the subject before centering.
    pub maximize_subject_fill: bool,
    /// Square side as a multiple of the subject box when maximizing fill.
    pub subject_margin: f32,
    /// PNG compression strategy ("fast", "default", "best") or numeric level (0-9).
    pub png_compression: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            size: 1024,
            pad_color: PadColorPolicy::EdgeAverage,
            fit: FitPreference::Pad,
            maximize_subject_fill: false,
            subject_margin: 3.0,
            png_compression: "default".to_string(),
        }
    }
}

/// Face detection settings: the YuNet oracle plus multi-angle voting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionSettings {
    /// Run face detection at all.
    pub enabled: bool,
    /// Path to the YuNet ONNX model.
    pub model_path: Option<String>,
    /// Model input width in pixels.
    pub input_width: u32,
    /// Model input height in pixels.
    pub input_height: u32,
    /// Minimum confidence score for a raw detection.
    pub score_threshold: f32,
    /// Non-maximum suppression threshold inside a single pass.
    pub nms_threshold: f32,
    /// Rotation angles (degrees) voted across.
    pub angles: Vec<f32>,
    /// IoU needed to merge a detection into an existing cluster.
    pub cluster_iou: f32,
    /// Long side the photo is reduced to before the rotated passes.
    pub working_long_side: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: Some("models/face_detection_yunet_2023mar.onnx".into()),
            input_width: 640,
            input_height: 640,
            score_threshold: 0.9,
            nms_threshold: 0.3,
            angles: vec![-15.0, 0.0, 15.0],
            cluster_iou: 0.35,
            working_long_side: 1280,
        }
    }
}

/// Background removal settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackgroundSettings {
    /// Make the background transparent.
    pub enabled: bool,
    /// Requested segmentation strategy.
    pub engine: SegmentationEngine,
    /// ONNX model used by the `person` engine.
    pub person_model: Option<String>,
    /// ONNX model used by the `foreground` engine.
    pub foreground_model: Option<String>,
    /// Square input resolution of the `person` model.
    pub person_input_size: u32,
    /// Square input resolution of the `foreground` model.
    pub foreground_input_size: u32,
    /// Gaussian feather radius applied to the final mask (pixels).
    pub feather: f32,
    /// Minimum-filter erosion radius applied before feathering (pixels).
    pub erosion: u32,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            engine: SegmentationEngine::Person,
            person_model: None,
            foreground_model: None,
            person_input_size: 320,
            foreground_input_size: 1024,
            feather: 0.0,
            erosion: 0,
        }
    }
}

/// Optional super-resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpscaleSettings {
    /// ONNX super-resolution model; upscaling is skipped when unset.
    pub model_path: Option<String>,
    /// Square tile edge fed to the model.
    pub tile_size: u32,
    /// Upper bound on repeated passes.
    pub max_iterations: u32,
}

impl Default for UpscaleSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            tile_size: 128,
            max_iterations: 4,
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether telemetry timing logs are enabled.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }
}

/// Persistent settings consumed by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppSettings {
    pub output: OutputSettings,
    pub detection: DetectionSettings,
    pub background: BackgroundSettings,
    pub upscale: UpscaleSettings,
    pub telemetry: TelemetrySettings,
}

impl AppSettings {
    /// Load settings from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        settings.sanitize();
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// Clamp values to ranges the pipeline can work with.
    pub fn sanitize(&mut self) {
        self.output.size = self.output.size.max(1);
        if !self.output.subject_margin.is_finite() || self.output.subject_margin < 1.0 {
            self.output.subject_margin = 1.0;
        }
        if self.detection.angles.is_empty() {
            self.detection.angles = vec![0.0];
        }
        self.detection.cluster_iou = self.detection.cluster_iou.clamp(0.0, 1.0);
        self.detection.working_long_side = self.detection.working_long_side.max(64);
        if !self.background.feather.is_finite() || self.background.feather < 0.0 {
            self.background.feather = 0.0;
        }
        self.upscale.tile_size = self.upscale.tile_size.max(16);
    }
}

/// Returns the default settings path (`config/squareprep.json`).
pub fn default_settings_path() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join("config/squareprep.json"))
        .unwrap_or_else(|_| PathBuf::from("config/squareprep.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let mut settings = AppSettings::default();
        settings.output.pad_color = PadColorPolicy::Solid(RgbaColor::opaque(1, 2, 3));
        settings.background.engine = SegmentationEngine::Foreground;
        settings.save_to_path(file.path()).expect("save");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.output, settings.output);
        assert_eq!(loaded.detection, settings.detection);
        assert_eq!(loaded.background, settings.background);
        assert_eq!(loaded.upscale, settings.upscale);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        let json = r#"{
            "output": { "size": 512, "pad_color": "transparent" },
            "background": { "enabled": true, "erosion": 2 }
        }"#;
        fs::write(file.path(), json).expect("write custom settings");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.output.size, 512);
        assert_eq!(loaded.output.pad_color, PadColorPolicy::Transparent);
        assert_eq!(loaded.output.fit, FitPreference::Pad);
        assert!(loaded.background.enabled);
        assert_eq!(loaded.background.erosion, 2);
        assert_eq!(loaded.background.feather, 0.0);
        assert_eq!(loaded.detection.angles, vec![-15.0, 0.0, 15.0]);
        assert!(!loaded.telemetry.enabled);
        assert_eq!(loaded.telemetry.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn sanitize_repairs_out_of_range_values() {
        let mut settings = AppSettings::default();
        settings.output.size = 0;
        settings.output.subject_margin = f32::NAN;
        settings.detection.angles.clear();
        settings.background.feather = -3.0;
        settings.sanitize();
        assert_eq!(settings.output.size, 1);
        assert_eq!(settings.output.subject_margin, 1.0);
        assert_eq!(settings.detection.angles, vec![0.0]);
        assert_eq!(settings.background.feather, 0.0);
    }

    #[test]
    fn policies_parse_from_cli_tokens() {
        assert_eq!("edge".parse::<PadColorPolicy>(), Ok(PadColorPolicy::EdgeAverage));
        assert_eq!(
            "Transparent".parse::<PadColorPolicy>(),
            Ok(PadColorPolicy::Transparent)
        );
        assert_eq!(
            "#ff0000".parse::<PadColorPolicy>(),
            Ok(PadColorPolicy::Solid(RgbaColor::opaque(255, 0, 0)))
        );
        assert!("purple-ish".parse::<PadColorPolicy>().is_err());
        assert_eq!("CROP".parse::<FitPreference>(), Ok(FitPreference::Crop));
        assert_eq!(
            "matte_only".parse::<SegmentationEngine>(),
            Ok(SegmentationEngine::MatteOnly)
        );
    }
}
