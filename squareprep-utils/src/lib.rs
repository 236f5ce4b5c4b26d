//! Common helpers shared across squareprep crates.

/// Color parsing and conversion.
pub mod color;
/// Application configuration and settings management.
pub mod config;
/// Oriented image loading, sidecar signals and tensor conversion.
pub mod image_utils;
/// Name token, run directory and sequence file naming.
pub mod naming;
/// Metadata-free PNG output.
pub mod output;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use std::path::Path;

use anyhow::Result;
use log::LevelFilter;

pub use color::{RgbaColor, parse_hex_color};
pub use config::{
    AppSettings, BackgroundSettings, DetectionSettings, FitPreference, OutputSettings,
    PadColorPolicy, SegmentationEngine, TelemetrySettings, UpscaleSettings, default_settings_path,
};
pub use image_utils::{
    DepthImage, OrientedImage, SidecarSignals, compute_resize_scales, is_sidecar_path,
    load_oriented_image, load_sidecars, resize_image, rgb_to_bgr_chw,
};
pub use naming::{normalize_name_token, output_file_name, unique_run_directory};
pub use output::{PngCompression, encode_png, save_png};
pub use telemetry::{
    TELEMETRY_TARGET, TimingGuard, configure as configure_telemetry, telemetry_allows,
    telemetry_enabled, timing_guard,
};

/// Initialize logging once for the CLI and tests.
///
/// This function respects the `RUST_LOG` environment variable if it is set.
/// Otherwise, it falls back to the provided default filter level.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module(TELEMETRY_TARGET, LevelFilter::Trace);

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}

/// Validate that a path exists and resolve it to an absolute path.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> Result<std::path::PathBuf> {
    let path = path.as_ref();
    anyhow::ensure!(path.exists(), "path does not exist: {}", path.display());
    Ok(path.canonicalize()?)
}
