mod args;
mod config;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use squareprep_core::{
    Oracles, PipelineConfig, ProgressEvent, collect_inputs, create_output_directory, run_batch,
};
use squareprep_utils::{
    configure_telemetry, init_logging, normalize_name_token, unique_run_directory,
};

use crate::{
    args::PrepArgs,
    config::{apply_cli_overrides, load_settings},
    report::{RunSummary, write_report},
};

fn main() -> Result<()> {
    let args = PrepArgs::parse();
    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    init_logging(level)?;
    debug!("squareprep {}", squareprep_core::version());

    let mut settings = load_settings(args.config.as_ref())?;
    apply_cli_overrides(&mut settings, &args);
    configure_telemetry(
        settings.telemetry.enabled,
        settings.telemetry.level_filter(),
    );

    let inputs = collect_inputs(&args.input)?;
    let token = normalize_name_token(&args.name);
    info!(
        "Found {} photo(s) in {}; name token {token}",
        inputs.len(),
        args.input.display()
    );

    let output_root = match args.output_root.as_ref() {
        Some(root) => root.clone(),
        None => {
            let input = args
                .input
                .canonicalize()
                .with_context(|| format!("failed to resolve {}", args.input.display()))?;
            match input.parent() {
                Some(parent) => parent.to_path_buf(),
                None => input.clone(),
            }
        }
    };
    let run_dir = unique_run_directory(&output_root, &token, chrono::Local::now());

    let config = PipelineConfig::from_settings(&settings);
    let oracles = Oracles::from_settings(&settings);
    if config.detect_faces && oracles.detector.is_none() {
        warn!("Continuing without face detection; every photo is treated as having no subject");
    }
    debug!("Pipeline configuration: {config:?}");

    create_output_directory(&run_dir)?;
    info!("Writing output to {}", run_dir.display());

    let report = run_batch(&inputs, &run_dir, &token, &config, &oracles, |event| {
        match event {
            ProgressEvent::Started { total } => debug!("Starting run over {total} photo(s)"),
            ProgressEvent::Processing { index, path } => {
                info!("[{}/{}] {}", index + 1, inputs.len(), path.display())
            }
            ProgressEvent::FaceDetectionResult { .. } => {}
            ProgressEvent::FileWritten(pair) => {
                debug!("Saved {}", pair.processed_path.display())
            }
            ProgressEvent::Failed(failure) => {
                debug!("Recorded failure for {}", failure.source_path.display())
            }
            ProgressEvent::Completed(_) => {}
        }
    });

    println!(
        "{} succeeded, {} failed -> {}",
        report.succeeded(),
        report.failed(),
        run_dir.display()
    );
    for failure in &report.failures {
        println!("  failed: {}: {}", failure.source_path.display(), failure.error);
    }

    if let Some(path) = args.report.as_ref() {
        let summary = RunSummary::new(&args.name, &token, &run_dir, config.size, &report);
        write_report(path, &summary)?;
        info!("Wrote run report to {}", path.display());
    }

    if report.succeeded() == 0 && report.failed() > 0 {
        anyhow::bail!("none of the {} photo(s) could be processed", report.failed());
    }
    Ok(())
}
