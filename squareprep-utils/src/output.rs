//! Lossless, metadata-free PNG export.
//!
//! The encoder writes only the critical PNG chunks (IHDR/IDAT/IEND); no EXIF,
//! text, color profile or timestamp chunks from the source photo are carried over.

use anyhow::{Context, Result};
use image::{
    ExtendedColorType, ImageEncoder, RgbaImage,
    codecs::png::{CompressionType, FilterType, PngEncoder},
};
use log::{debug, warn};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

/// Simplified PNG compression strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PngCompression {
    Fast,
    #[default]
    Default,
    Best,
}

impl PngCompression {
    /// Parse compression string/level into a compression strategy.
    pub fn parse(input: &str) -> Self {
        let normalized = input.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "fast" => Self::Fast,
            "best" => Self::Best,
            "default" => Self::Default,
            _ => match normalized.parse::<u8>() {
                Ok(0..=3) => Self::Fast,
                Ok(7..=9) => Self::Best,
                Ok(_) => Self::Default,
                Err(_) => {
                    warn!("Unknown PNG compression '{input}', falling back to default strategy");
                    Self::Default
                }
            },
        }
    }

    fn into_image(self) -> CompressionType {
        match self {
            Self::Fast => CompressionType::Fast,
            Self::Default => CompressionType::Default,
            Self::Best => CompressionType::Best,
        }
    }
}

/// Encode an RGBA buffer as PNG bytes without any ancillary metadata.
pub fn encode_png(image: &RgbaImage, compression: PngCompression) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buffer, compression.into_image(), FilterType::Adaptive);
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .context("failed to encode PNG")?;
    Ok(buffer)
}

/// Encode `image` and write it to `destination`, creating parent directories as needed.
pub fn save_png(image: &RgbaImage, destination: &Path, compression: PngCompression) -> Result<()> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty() && !p.exists()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let encoded = encode_png(image, compression)?;
    debug!(
        "Writing {}x{} PNG ({} bytes) to {}",
        image.width(),
        image.height(),
        encoded.len(),
        destination.display()
    );
    let file = File::create(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&encoded)
        .and_then(|_| writer.flush())
        .with_context(|| format!("failed to write {}", destination.display()))?;
    Ok(())
}
