//! JSON run report.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;
use squareprep_core::{ProcessedImagePair, ProcessingFailure, RunReport};

#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub version: &'static str,
    pub name: &'a str,
    pub token: &'a str,
    pub output_dir: &'a Path,
    pub size: u32,
    pub succeeded: usize,
    pub failed: usize,
    pub processed: &'a [ProcessedImagePair],
    pub failures: &'a [ProcessingFailure],
}

impl<'a> RunSummary<'a> {
    pub fn new(
        name: &'a str,
        token: &'a str,
        output_dir: &'a Path,
        size: u32,
        report: &'a RunReport,
    ) -> Self {
        Self {
            version: squareprep_core::version(),
            name,
            token,
            output_dir,
            size,
            succeeded: report.succeeded(),
            failed: report.failed(),
            processed: &report.processed,
            failures: &report.failures,
        }
    }
}

/// Write the summary as pretty JSON, creating parent folders as needed.
pub fn write_report(path: &Path, summary: &RunSummary<'_>) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(summary).context("failed to serialize run report")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
