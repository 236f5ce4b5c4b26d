use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{
    DynamicImage, GrayImage, ImageBuffer, ImageDecoder, ImageReader, Luma, RgbImage, RgbaImage,
    imageops::FilterType, metadata::Orientation,
};
use log::{debug, warn};
use ndarray::Array3;

/// Single-channel floating point image, used for depth/disparity maps.
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A decoded photo that has been rotated/flipped upright according to its EXIF orientation.
#[derive(Debug, Clone)]
pub struct OrientedImage {
    /// Upright RGBA pixels, origin at the top-left.
    pub image: RgbaImage,
    /// EXIF orientation code (1-8) found in the source file.
    pub exif_orientation: u8,
}

/// Decode an image file and apply its embedded orientation.
///
/// # Arguments
///
/// * `path` - The path to the image file.
pub fn load_oriented_image<P: AsRef<Path>>(path: P) -> Result<OrientedImage> {
    let path = path.as_ref();
    let (image, orientation) = decode_with_orientation(path)?;
    let rgba = image.to_rgba8();
    anyhow::ensure!(
        rgba.width() > 0 && rgba.height() > 0,
        "image has zero dimensions: {}",
        path.display()
    );
    Ok(OrientedImage {
        image: rgba,
        exif_orientation: orientation.to_exif(),
    })
}

fn decode_with_orientation(path: &Path) -> Result<(DynamicImage, Orientation)> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to sniff image format of {}", path.display()))?;
    let mut decoder = reader
        .into_decoder()
        .with_context(|| format!("unsupported or corrupt image {}", path.display()))?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)
        .with_context(|| format!("failed to decode image {}", path.display()))?;
    image.apply_orientation(orientation);
    Ok((image, orientation))
}

/// Optional per-photo side channels stored next to the photo.
///
/// For `portrait.jpg` the loader looks for `portrait.matte.png` (portrait matte alpha)
/// and `portrait.depth.png` (normalized disparity, brighter = closer).
#[derive(Debug, Clone, Default)]
pub struct SidecarSignals {
    pub matte: Option<GrayImage>,
    pub depth: Option<DepthImage>,
}

/// Suffixes that mark a file as a sidecar rather than a photo.
pub const SIDECAR_SUFFIXES: [&str; 2] = [".matte", ".depth"];

/// Returns true when `path` names a sidecar file (e.g. `x.matte.png`).
pub fn is_sidecar_path(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| {
            let lower = stem.to_ascii_lowercase();
            SIDECAR_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
        })
        .unwrap_or(false)
}

/// Path of the sidecar with `suffix` (".matte" / ".depth") for `photo`.
pub fn sidecar_path(photo: &Path, suffix: &str) -> Option<PathBuf> {
    let stem = photo.file_stem()?.to_str()?;
    Some(photo.with_file_name(format!("{stem}{suffix}.png")))
}

/// Load any sidecar signals for `photo`, applying the photo's EXIF orientation.
///
/// Missing sidecars are silent; unreadable ones are logged and skipped.
pub fn load_sidecars(photo: &Path, exif_orientation: u8) -> SidecarSignals {
    let orientation = Orientation::from_exif(exif_orientation).unwrap_or(Orientation::NoTransforms);
    let load = |suffix: &str| -> Option<DynamicImage> {
        let path = sidecar_path(photo, suffix).filter(|p| p.is_file())?;
        match image::open(&path) {
            Ok(mut image) => {
                image.apply_orientation(orientation);
                debug!("Loaded sidecar {}", path.display());
                Some(image)
            }
            Err(err) => {
                warn!("Ignoring unreadable sidecar {}: {err}", path.display());
                None
            }
        }
    };

    SidecarSignals {
        matte: load(".matte").map(|image| image.to_luma8()),
        depth: load(".depth").map(|image| image.to_luma32f()),
    }
}

/// Resize an image to the requested resolution using the provided filter.
pub fn resize_image(image: &DynamicImage, width: u32, height: u32, filter: FilterType) -> RgbImage {
    image.resize_exact(width, height, filter).to_rgb8()
}

/// Convert an RGB image into a BGR CHW array with values matching OpenCV's `blobFromImage`.
pub fn rgb_to_bgr_chw(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut array = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (xi, yi) = (x as usize, y as usize);
        array[(0, yi, xi)] = pixel[2] as f32;
        array[(1, yi, xi)] = pixel[1] as f32;
        array[(2, yi, xi)] = pixel[0] as f32;
    }
    array
}

/// Scale factors that map model-space coordinates back to the original image.
pub fn compute_resize_scales(original: (u32, u32), target: (u32, u32)) -> Result<(f32, f32)> {
    let (orig_w, orig_h) = original;
    let (target_w, target_h) = target;
    anyhow::ensure!(
        target_w > 0 && target_h > 0,
        "target dimensions must be non-zero"
    );
    anyhow::ensure!(
        orig_w > 0 && orig_h > 0,
        "original dimensions must be non-zero"
    );
    Ok((
        orig_w as f32 / target_w as f32,
        orig_h as f32 / target_h as f32,
    ))
}
