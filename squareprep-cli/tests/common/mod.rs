//! Shared helpers for CLI integration tests.
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use image::{Rgba, RgbaImage};

/// Save a solid-color photo of the given size.
pub fn write_photo(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_pixel(width, height, Rgba([120, 90, 60, 255]))
        .save(&path)
        .expect("save photo");
    path
}

/// Run the squareprep binary from `cwd` so no ambient settings file is picked up.
pub fn run_squareprep(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_squareprep"))
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("run squareprep")
}

/// The single run folder created under `root`.
#[allow(dead_code)]
pub fn single_run_dir(root: &Path, token: &str) -> PathBuf {
    let dirs: Vec<PathBuf> = fs::read_dir(root)
        .expect("read output root")
        .map(|e| e.expect("entry").path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&format!("{token}_")))
        })
        .collect();
    assert_eq!(dirs.len(), 1, "expected one run folder, found {dirs:?}");
    dirs.into_iter().next().expect("run folder")
}

#[allow(dead_code)]
pub fn sorted_file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
