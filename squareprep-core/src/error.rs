use std::path::PathBuf;

use thiserror::Error;

/// Problems that abort a run before any file is written.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input folder does not exist: {}", .0.display())]
    MissingFolder(PathBuf),
    #[error("input path is not a folder: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("no supported images found in {}", .0.display())]
    NoImages(PathBuf),
    #[error("cannot create output folder {}: {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
