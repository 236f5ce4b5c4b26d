//! Rectangles, affine transforms and the square-canvas image operations.
//!
//! Coordinates are pixel units with the origin at the top-left corner and `y`
//! growing downwards. Image operations never mutate their input; each returns a
//! new buffer.

use anyhow::Result;
use image::{Rgba, RgbaImage, imageops};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use serde::{Deserialize, Serialize};

/// Below this magnitude (degrees) a rotation is treated as the identity.
pub const ROTATION_EPSILON_DEG: f32 = 1e-4;
/// Tolerance used by the scaling and padding no-op checks.
pub const SIZE_EPSILON: f32 = 0.001;
/// Width of each border band sampled for the edge-average color, as a fraction of the short side.
pub const EDGE_BAND_FRACTION: f32 = 0.04;

/// Axis-aligned rectangle, `(x, y)` being the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Full extent of an image with the given dimensions.
    pub fn from_dimensions((width, height): (u32, u32)) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Rect spanning two corner points in any order.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self::new(x0.min(x1), y0.min(y1), (x1 - x0).abs(), (y1 - y0).abs())
    }

    /// Returns an equivalent rect with non-negative width and height.
    pub fn standardized(self) -> Self {
        Self::from_corners(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Overlapping region of two rects; zero-sized when they are disjoint.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let a = self.standardized();
        let b = other.standardized();
        let x0 = a.x.max(b.x);
        let y0 = a.y.max(b.y);
        let x1 = a.max_x().min(b.max_x());
        let y1 = a.max_y().min(b.max_y());
        Rect::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }

    /// Returns `true` when `other` lies inside `self`, allowing `tolerance` pixels of slack.
    pub fn contains(&self, other: &Rect, tolerance: f32) -> bool {
        other.x >= self.x - tolerance
            && other.y >= self.y - tolerance
            && other.max_x() <= self.max_x() + tolerance
            && other.max_y() <= self.max_y() + tolerance
    }

    pub fn iou(&self, other: &Rect) -> f32 {
        intersection_over_union(self, other)
    }
}

/// Intersection over union of two rects in `[0, 1]`.
///
/// Degenerate, disjoint or zero-area inputs yield `0.0`.
pub fn intersection_over_union(a: &Rect, b: &Rect) -> f32 {
    let a = a.standardized();
    let b = b.standardized();
    let intersection = a.intersection(&b).area();
    if intersection <= 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 || !union.is_finite() {
        0.0
    } else {
        (intersection / union).clamp(0.0, 1.0)
    }
}

/// 2D affine transform mapping `(x, y)` to `(a·x + b·y + tx, c·x + d·y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub const fn translation(tx: f32, ty: f32) -> Self {
        Self {
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    /// Rotation about the origin. Positive angles turn clockwise on screen.
    pub fn rotation_degrees(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            a: cos,
            b: -sin,
            c: sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Transform that applies `self` first and `next` afterwards.
    pub fn then(&self, next: &Affine) -> Affine {
        Affine {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }

    /// Inverse transform, or `None` for a singular matrix.
    pub fn inverse(&self) -> Option<Affine> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() <= f32::EPSILON || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.d * inv;
        let b = -self.b * inv;
        let c = -self.c * inv;
        let d = self.a * inv;
        Some(Affine {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.b * y + self.tx,
            self.c * x + self.d * y + self.ty,
        )
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Row-major 3x3 matrix as used by `imageproc` projections.
    pub fn to_matrix(&self) -> [f32; 9] {
        [self.a, self.b, self.tx, self.c, self.d, self.ty, 0.0, 0.0, 1.0]
    }
}

/// Map all four corners of `rect` and return their axis-aligned bounding box.
pub fn transform_rect(rect: &Rect, transform: &Affine) -> Rect {
    let rect = rect.standardized();
    let corners = [
        transform.apply(rect.x, rect.y),
        transform.apply(rect.max_x(), rect.y),
        transform.apply(rect.x, rect.max_y()),
        transform.apply(rect.max_x(), rect.max_y()),
    ];
    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for (x, y) in corners {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    Rect::from_corners(min_x, min_y, max_x, max_y)
}

/// Rotate `image` about its center by `degrees`, growing the canvas to hold the result.
///
/// Returns the rotated image and the forward transform mapping source pixels to
/// rotated pixels (rotation followed by the shift that moves the new origin to `(0, 0)`).
/// Uncovered corners are transparent.
pub fn rotated_image(image: &RgbaImage, degrees: f32) -> Result<(RgbaImage, Affine)> {
    if degrees.abs() < ROTATION_EPSILON_DEG {
        return Ok((image.clone(), Affine::IDENTITY));
    }

    let extent = Rect::from_dimensions(image.dimensions());
    let (cx, cy) = extent.center();
    let rotation = Affine::translation(-cx, -cy)
        .then(&Affine::rotation_degrees(degrees))
        .then(&Affine::translation(cx, cy));
    let bounds = transform_rect(&extent, &rotation);
    let forward = rotation.then(&Affine::translation(-bounds.x, -bounds.y));

    let out_w = (bounds.width - SIZE_EPSILON).ceil().max(1.0) as u32;
    let out_h = (bounds.height - SIZE_EPSILON).ceil().max(1.0) as u32;
    let projection = Projection::from_matrix(forward.to_matrix())
        .ok_or_else(|| anyhow::anyhow!("rotation by {degrees} degrees is not invertible"))?;
    let mut rotated = RgbaImage::new(out_w, out_h);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
        &mut rotated,
    );
    Ok((rotated, forward))
}

/// Square of side `max(w, h) * margin` centered on `subject`, kept inside `extent`.
///
/// The side is first clamped to `[min(W, H) / 2, max(W, H) * 1.10]`. The square is
/// shifted to fit the image and only shrinks when the image is smaller than the side.
pub fn clamp_square_around(subject: &Rect, extent: &Rect, margin: f32) -> Rect {
    let subject = subject.standardized();
    let extent = extent.standardized();
    let short = extent.width.min(extent.height);
    let long = extent.width.max(extent.height);

    let requested = subject.width.max(subject.height) * margin;
    let mut side = requested.max(short * 0.5).min(long * 1.10);
    let (cx, cy) = subject.center();
    let mut x = shift_into(cx - side * 0.5, side, extent.x, extent.max_x());
    let mut y = shift_into(cy - side * 0.5, side, extent.y, extent.max_y());

    if side > extent.width + SIZE_EPSILON || side > extent.height + SIZE_EPSILON {
        side = short;
        x = shift_into(cx - side * 0.5, side, extent.x, extent.max_x());
        y = shift_into(cy - side * 0.5, side, extent.y, extent.max_y());
    }
    Rect::new(x, y, side, side)
}

fn shift_into(start: f32, len: f32, min: f32, max: f32) -> f32 {
    let mut start = start;
    if start + len > max {
        start = max - len;
    }
    start.max(min)
}

/// Dimensions after a uniform scale by `factor`, never collapsing to zero.
pub fn scaled_dimensions((width, height): (u32, u32), factor: f32) -> (u32, u32) {
    (
        ((width as f32 * factor).round() as u32).max(1),
        ((height as f32 * factor).round() as u32).max(1),
    )
}

fn resize_to(image: &RgbaImage, dims: (u32, u32)) -> RgbaImage {
    if image.dimensions() == dims {
        return image.clone();
    }
    imageops::resize(image, dims.0, dims.1, imageops::FilterType::Lanczos3)
}

/// Uniformly scale so the long side equals `target`. Never upscales.
pub fn scale_long_side(image: &RgbaImage, target: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let long = w.max(h) as f32;
    if long <= target as f32 + SIZE_EPSILON {
        return image.clone();
    }
    let factor = target as f32 / long;
    let mut dims = scaled_dimensions((w, h), factor);
    if w >= h {
        dims.0 = target;
    } else {
        dims.1 = target;
    }
    resize_to(image, dims)
}

/// Uniformly scale (up or down) so the short side equals `target`.
pub fn scale_short_side(image: &RgbaImage, target: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let short = w.min(h) as f32;
    if (short - target as f32).abs() <= SIZE_EPSILON {
        return image.clone();
    }
    let factor = target as f32 / short;
    let mut dims = scaled_dimensions((w, h), factor);
    if w <= h {
        dims.0 = target;
    } else {
        dims.1 = target;
    }
    resize_to(image, dims)
}

/// The `size × size` window centered on an image of `dims`, intersected with the image.
pub fn center_square_window((width, height): (u32, u32), size: u32) -> (u32, u32, u32, u32) {
    let crop_w = size.min(width);
    let crop_h = size.min(height);
    ((width - crop_w) / 2, (height - crop_h) / 2, crop_w, crop_h)
}

/// Crop a `size × size` square around the image center.
pub fn center_crop_square(image: &RgbaImage, size: u32) -> RgbaImage {
    let (x, y, w, h) = center_square_window(image.dimensions(), size);
    if (x, y, w, h) == (0, 0, image.width(), image.height()) {
        return image.clone();
    }
    imageops::crop_imm(image, x, y, w, h).to_image()
}

/// Offset at which an image of `dims` is placed when centered on a `size × size` canvas.
///
/// Returns `None` when the image does not fit, in which case padding is skipped.
pub fn pad_offsets((width, height): (u32, u32), size: u32) -> Option<(u32, u32)> {
    if width > size || height > size {
        return None;
    }
    Some(((size - width) / 2, (size - height) / 2))
}

/// Center `image` on a `size × size` canvas filled with `fill`.
pub fn pad_to_square(image: &RgbaImage, size: u32, fill: Rgba<u8>) -> RgbaImage {
    if image.dimensions() == (size, size) {
        return image.clone();
    }
    match pad_offsets(image.dimensions(), size) {
        None => image.clone(),
        Some((x, y)) => {
            let mut canvas = RgbaImage::from_pixel(size, size, fill);
            imageops::replace(&mut canvas, image, i64::from(x), i64::from(y));
            canvas
        }
    }
}

/// Grow the canvas by the given per-side margins, filling new pixels with `fill`.
pub fn pad_sides(
    image: &RgbaImage,
    (left, top, right, bottom): (u32, u32, u32, u32),
    fill: Rgba<u8>,
) -> RgbaImage {
    if left == 0 && top == 0 && right == 0 && bottom == 0 {
        return image.clone();
    }
    let mut canvas = RgbaImage::from_pixel(
        image.width() + left + right,
        image.height() + top + bottom,
        fill,
    );
    imageops::replace(&mut canvas, image, i64::from(left), i64::from(top));
    canvas
}

/// Opaque mean color of the four border bands.
///
/// Each band is `max(1, round(min(W, H) * 0.04))` pixels wide. The four band means
/// are averaged with equal weight regardless of how many pixels each band holds.
pub fn edge_average_color(image: &RgbaImage) -> Rgba<u8> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Rgba([0, 0, 0, 255]);
    }
    let band = ((w.min(h) as f32 * EDGE_BAND_FRACTION).round() as u32)
        .max(1)
        .min(w.min(h));

    let bands = [
        band_mean(image, 0, 0, w, band),
        band_mean(image, 0, h - band, w, band),
        band_mean(image, 0, 0, band, h),
        band_mean(image, w - band, 0, band, h),
    ];
    let mut rgb = [0f64; 3];
    for mean in bands {
        for (acc, value) in rgb.iter_mut().zip(mean) {
            *acc += value / bands.len() as f64;
        }
    }
    Rgba([
        rgb[0].round().clamp(0.0, 255.0) as u8,
        rgb[1].round().clamp(0.0, 255.0) as u8,
        rgb[2].round().clamp(0.0, 255.0) as u8,
        255,
    ])
}

fn band_mean(image: &RgbaImage, x0: u32, y0: u32, width: u32, height: u32) -> [f64; 3] {
    let mut sum = [0f64; 3];
    for y in y0..y0 + height {
        for x in x0..x0 + width {
            let pixel = image.get_pixel(x, y);
            sum[0] += f64::from(pixel[0]);
            sum[1] += f64::from(pixel[1]);
            sum[2] += f64::from(pixel[2]);
        }
    }
    let count = f64::from(width * height).max(1.0);
    [sum[0] / count, sum[1] / count, sum[2] / count]
}
