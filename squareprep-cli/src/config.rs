//! Configuration loading and CLI override logic.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use squareprep_utils::{AppSettings, default_settings_path, normalize_path};

use crate::args::PrepArgs;

/// Load application settings from a file or use defaults.
pub fn load_settings(config_path: Option<&PathBuf>) -> Result<AppSettings> {
    if let Some(path) = config_path {
        let resolved = normalize_path(path)?;
        let settings = AppSettings::load_from_path(&resolved)?;
        info!("Loaded settings from {}", resolved.display());
        Ok(settings)
    } else {
        let default_path = default_settings_path();
        if default_path.exists() {
            let settings = AppSettings::load_from_path(&default_path).with_context(|| {
                format!(
                    "failed to load default settings from {}",
                    default_path.display()
                )
            })?;
            info!("Loaded settings from {}", default_path.display());
            Ok(settings)
        } else {
            Ok(AppSettings::default())
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Apply command-line arguments to override loaded or default settings.
pub fn apply_cli_overrides(settings: &mut AppSettings, args: &PrepArgs) {
    if args.telemetry {
        settings.telemetry.enabled = true;
    }
    if let Some(level) = args.telemetry_level.as_ref() {
        let normalized = level.trim();
        if !normalized.is_empty() {
            let lower = normalized.to_ascii_lowercase();
            settings.telemetry.level = lower.clone();
            if lower == "off" {
                settings.telemetry.enabled = false;
            }
        }
    }

    if let Some(size) = args.size {
        if size == 0 {
            warn!("Ignoring --size 0; keeping {}", settings.output.size);
        } else {
            settings.output.size = size;
        }
    }
    if let Some(policy) = args.pad_color {
        settings.output.pad_color = policy;
    }
    if let Some(fit) = args.fit {
        settings.output.fit = fit;
    }
    if args.maximize_fill {
        settings.output.maximize_subject_fill = true;
    }
    if let Some(margin) = args.subject_margin {
        settings.output.subject_margin = margin;
    }
    if let Some(level) = args.png_compression.as_ref() {
        settings.output.png_compression = level.clone();
    }

    if args.no_face_detection {
        settings.detection.enabled = false;
    }
    if let Some(model) = args.face_model.as_deref() {
        settings.detection.model_path = Some(path_string(model));
    }

    if args.remove_background {
        settings.background.enabled = true;
    }
    if let Some(engine) = args.segmentation_engine {
        settings.background.engine = engine;
    }
    if let Some(model) = args.person_model.as_deref() {
        settings.background.person_model = Some(path_string(model));
    }
    if let Some(model) = args.foreground_model.as_deref() {
        settings.background.foreground_model = Some(path_string(model));
    }
    if let Some(feather) = args.feather {
        settings.background.feather = feather;
    }
    if let Some(erosion) = args.erosion {
        settings.background.erosion = erosion;
    }

    if let Some(model) = args.upscale_model.as_deref() {
        settings.upscale.model_path = Some(path_string(model));
    }

    settings.sanitize();
}
