//! Batch orchestration: input enumeration, per-photo error isolation and progress events.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use crate::composer::{CanvasComposer, Oracles, PipelineConfig};
use crate::error::InputError;
use crate::geometry::Rect;
use crate::mask::AuxiliaryAssets;
use crate::selector::FaceSelection;
use squareprep_utils::{
    is_sidecar_path, load_oriented_image, load_sidecars, output_file_name, save_png, timing_guard,
};

/// File extensions accepted as input photos (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

/// A successfully processed photo and where its output went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedImagePair {
    pub original_path: PathBuf,
    pub processed_path: PathBuf,
}

/// A photo that could not be processed, with a human-readable cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingFailure {
    pub source_path: PathBuf,
    pub error: String,
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub processed: Vec<ProcessedImagePair>,
    pub failures: Vec<ProcessingFailure>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.processed.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Progress notifications emitted while a run advances.
///
/// For a given photo, `Processing` always precedes its `FaceDetectionResult`,
/// `FileWritten` or `Failed` events.
#[derive(Debug, Clone)]
pub enum ProgressEvent<'a> {
    Started { total: usize },
    Processing { index: usize, path: &'a Path },
    FaceDetectionResult { path: &'a Path, face: Option<Rect> },
    FileWritten(&'a ProcessedImagePair),
    Failed(&'a ProcessingFailure),
    Completed(&'a RunReport),
}

/// List the photos directly inside `folder`, sorted case-insensitively by file name.
///
/// Sidecar files (`*.matte.png`, `*.depth.png`) are skipped.
pub fn collect_inputs(folder: &Path) -> Result<Vec<PathBuf>, InputError> {
    if !folder.exists() {
        return Err(InputError::MissingFolder(folder.to_path_buf()));
    }
    if !folder.is_dir() {
        return Err(InputError::NotADirectory(folder.to_path_buf()));
    }

    let mut images: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if !supported {
                debug!("Skipping non-image file {}", path.display());
            }
            supported && !is_sidecar_path(path)
        })
        .collect();

    if images.is_empty() {
        return Err(InputError::NoImages(folder.to_path_buf()));
    }
    images.sort_by_cached_key(|path| {
        let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase());
        (name, path.clone())
    });
    Ok(images)
}

/// Create the run's output directory.
pub fn create_output_directory(path: &Path) -> Result<(), InputError> {
    std::fs::create_dir_all(path).map_err(|source| InputError::OutputDirectory {
        path: path.to_path_buf(),
        source,
    })
}

/// Process `inputs` in order, writing `01_<token>.png`, `02_<token>.png`, ... into `output_dir`.
///
/// A failing or panicking photo is recorded and skipped; sequence numbers only advance on success.
pub fn run_batch<F>(
    inputs: &[PathBuf],
    output_dir: &Path,
    token: &str,
    config: &PipelineConfig,
    oracles: &Oracles,
    mut on_event: F,
) -> RunReport
where
    F: FnMut(&ProgressEvent<'_>),
{
    let _guard = timing_guard("squareprep_core::run_batch", log::Level::Info);
    let composer = CanvasComposer::new(config, oracles);
    let mut report = RunReport::default();
    on_event(&ProgressEvent::Started {
        total: inputs.len(),
    });

    for (index, path) in inputs.iter().enumerate() {
        on_event(&ProgressEvent::Processing { index, path });
        let destination = output_dir.join(output_file_name(report.processed.len() + 1, token));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            process_photo(&composer, config, path, &destination, &mut on_event)
        }))
        .unwrap_or_else(|payload| {
            Err(anyhow::anyhow!("panicked: {}", panic_message(&*payload)))
        });

        match outcome {
            Ok(()) => {
                report.processed.push(ProcessedImagePair {
                    original_path: path.clone(),
                    processed_path: destination,
                });
                if let Some(pair) = report.processed.last() {
                    info!("Wrote {} -> {}", path.display(), pair.processed_path.display());
                    on_event(&ProgressEvent::FileWritten(pair));
                }
            }
            Err(err) => {
                warn!("Failed to process {}: {err:#}", path.display());
                report.failures.push(ProcessingFailure {
                    source_path: path.clone(),
                    error: format!("{err:#}"),
                });
                if let Some(failure) = report.failures.last() {
                    on_event(&ProgressEvent::Failed(failure));
                }
            }
        }
    }

    info!(
        "Run finished: {} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );
    on_event(&ProgressEvent::Completed(&report));
    report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn process_photo<F>(
    composer: &CanvasComposer<'_>,
    config: &PipelineConfig,
    path: &Path,
    destination: &Path,
    on_event: &mut F,
) -> Result<()>
where
    F: FnMut(&ProgressEvent<'_>),
{
    let oriented = load_oriented_image(path)?;
    let sidecars = load_sidecars(path, oriented.exif_orientation);
    let auxiliary = AuxiliaryAssets {
        portrait_matte: sidecars.matte,
        depth: sidecars.depth,
    };

    let subject = if config.detect_faces {
        let selection = composer.locate_subject(&oriented.image);
        match selection {
            FaceSelection::Found { rect, stage } => info!(
                "Face found in {} at ({:.0}, {:.0}, {:.0}x{:.0}) via {}",
                path.display(),
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                stage.as_label()
            ),
            FaceSelection::NoFace => info!("No face found in {}", path.display()),
        }
        selection.rect()
    } else {
        debug!("Face detection bypassed for {}", path.display());
        None
    };
    on_event(&ProgressEvent::FaceDetectionResult {
        path,
        face: subject,
    });

    let composition = composer
        .compose(oriented.image, subject, &auxiliary)
        .with_context(|| format!("failed to compose {}", path.display()))?;
    save_png(&composition.image, destination, config.png_compression)
        .with_context(|| format!("failed to write {}", destination.display()))?;
    Ok(())
}
