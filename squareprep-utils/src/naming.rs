//! Output naming: the filesystem-safe name token, run directories and sequence file names.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Token used when the display name normalizes to nothing.
pub const FALLBACK_TOKEN: &str = "SUBJECT";

/// Normalize a display name into an uppercase, filesystem-safe token.
///
/// Only `[A-Z0-9 _-]` survive; runs of whitespace collapse to a single `_` and
/// leading/trailing underscores are trimmed.
pub fn normalize_name_token(display_name: &str) -> String {
    let upper = display_name.to_uppercase();
    let mut token = String::with_capacity(upper.len());
    let mut in_space = false;
    for ch in upper.chars() {
        if ch.is_whitespace() {
            in_space = true;
            continue;
        }
        if !(ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_' || ch == '-') {
            continue;
        }
        if in_space {
            token.push('_');
            in_space = false;
        }
        token.push(ch);
    }

    let trimmed = token.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_TOKEN.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `01_TOKEN.png`, `02_TOKEN.png`, ... for 1-based sequence numbers.
pub fn output_file_name(sequence: usize, token: &str) -> String {
    format!("{sequence:02}_{token}.png")
}

/// `TOKEN_YYYYMMDD-HHMMSS` for the given timestamp.
pub fn run_directory_name(token: &str, timestamp: DateTime<Local>) -> String {
    format!("{token}_{}", timestamp.format("%Y%m%d-%H%M%S"))
}

/// Pick a run directory under `root` that does not exist yet, appending `_2`, `_3`, ...
pub fn unique_run_directory(root: &Path, token: &str, timestamp: DateTime<Local>) -> PathBuf {
    let base = run_directory_name(token, timestamp);
    let mut candidate = root.join(&base);
    let mut suffix = 2;
    while candidate.exists() {
        candidate = root.join(format!("{base}_{suffix}"));
        suffix += 1;
    }
    candidate
}
