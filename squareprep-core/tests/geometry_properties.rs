use image::{Rgba, RgbaImage};
use squareprep_core::{
    AuxiliaryAssets, CanvasComposer, Oracles, PipelineConfig, Rect, clamp_square_around,
    cluster_rects, intersection_over_union, pad_to_square, rotated_image, transform_rect,
};
use squareprep_utils::{FitPreference, PadColorPolicy};

/// Small deterministic generator so failures are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 40) as f32) / (1u64 << 24) as f32
    }

    fn range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * self.next_f32()
    }

    fn rect(&mut self, max: f32) -> Rect {
        Rect::new(
            self.range(0.0, max),
            self.range(0.0, max),
            self.range(0.0, max / 2.0),
            self.range(0.0, max / 2.0),
        )
    }
}

#[test]
fn iou_is_symmetric_and_bounded() {
    let mut rng = Lcg(7);
    for _ in 0..500 {
        let a = rng.rect(100.0);
        let b = rng.rect(100.0);
        let ab = intersection_over_union(&a, &b);
        let ba = intersection_over_union(&b, &a);
        assert!((ab - ba).abs() < 1e-6, "{a:?} {b:?}");
        assert!((0.0..=1.0).contains(&ab));
        if a.area() > 0.0 {
            assert!((intersection_over_union(&a, &a) - 1.0).abs() < 1e-5);
        }
    }
    let a = Rect::new(0.0, 0.0, 10.0, 10.0);
    let b = Rect::new(20.0, 20.0, 10.0, 10.0);
    assert_eq!(intersection_over_union(&a, &b), 0.0);
}

fn red_bounds(image: &RgbaImage) -> Option<Rect> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in image.enumerate_pixels() {
        if p[0] > 128 && p[3] > 128 {
            let b = bounds.get_or_insert((x, y, x, y));
            *b = (b.0.min(x), b.1.min(y), b.2.max(x), b.3.max(y));
        }
    }
    bounds.map(|(x0, y0, x1, y1)| {
        Rect::from_corners(x0 as f32, y0 as f32, (x1 + 1) as f32, (y1 + 1) as f32)
    })
}

#[test]
fn rotation_round_trip_recovers_region() {
    let mut image = RgbaImage::from_pixel(240, 160, Rgba([0, 0, 0, 255]));
    let region = Rect::new(60.0, 40.0, 50.0, 40.0);
    for y in 40..80 {
        for x in 60..110 {
            image.put_pixel(x, y, Rgba([255, 0, 0, 255]));
        }
    }
    let extent = Rect::from_dimensions(image.dimensions());

    for angle in [-15.0f32, 0.0, 15.0] {
        let (rotated, forward) = rotated_image(&image, angle).unwrap();
        let seen = red_bounds(&rotated).expect("region visible after rotation");
        let inverse = forward.inverse().unwrap();
        let recovered = transform_rect(&seen, &inverse).intersection(&extent);

        assert!(recovered.contains(&region, 3.0), "{angle}°: {recovered:?}");
        let (rx, ry) = recovered.center();
        let (ox, oy) = region.center();
        assert!((rx - ox).abs() < 3.0 && (ry - oy).abs() < 3.0, "{angle}°");
        if angle == 0.0 {
            assert!(intersection_over_union(&recovered, &region) > 0.99);
        } else {
            assert!(intersection_over_union(&recovered, &region) > 0.35);
        }
    }
}

#[test]
fn clustering_is_deterministic() {
    let mut rng = Lcg(42);
    let detections: Vec<Rect> = (0..60)
        .map(|_| {
            let base = Rect::new(
                [20.0, 120.0, 220.0][(rng.next_f32() * 2.999) as usize],
                50.0,
                60.0,
                60.0,
            );
            Rect::new(
                base.x + rng.range(-8.0, 8.0),
                base.y + rng.range(-8.0, 8.0),
                base.width + rng.range(-6.0, 6.0),
                base.height + rng.range(-6.0, 6.0),
            )
        })
        .collect();

    let summarize = || {
        cluster_rects(&detections, 0.35)
            .iter()
            .map(|c| (c.count(), c.representative()))
            .collect::<Vec<_>>()
    };
    let first = summarize();
    for _ in 0..5 {
        assert_eq!(summarize(), first);
    }
    assert_eq!(first.iter().map(|(n, _)| n).sum::<usize>(), detections.len());
}

#[test]
fn clamped_square_stays_in_bounds() {
    let mut rng = Lcg(3);
    for _ in 0..500 {
        let (w, h) = (rng.range(50.0, 2000.0).round(), rng.range(50.0, 2000.0).round());
        let extent = Rect::new(0.0, 0.0, w, h);
        let subject = Rect::new(
            rng.range(0.0, w),
            rng.range(0.0, h),
            rng.range(1.0, w / 2.0),
            rng.range(1.0, h / 2.0),
        );
        let margin = rng.range(0.5, 5.0);
        let square = clamp_square_around(&subject, &extent, margin);

        assert!((square.width - square.height).abs() < 1e-3);
        assert!(square.width <= w.max(h) * 1.10 + 1e-3);
        assert!(square.width >= (w.min(h) / 2.0).min(w.min(h)) - 1e-3);
        assert!(extent.contains(&square, 1e-2), "{square:?} in {w}x{h}");
    }
}

#[test]
fn padding_is_idempotent() {
    let fill = Rgba([9, 8, 7, 255]);
    for (w, h) in [(10, 30), (30, 10), (30, 30), (1, 29)] {
        let image = RgbaImage::from_pixel(w, h, Rgba([200, 100, 50, 255]));
        let once = pad_to_square(&image, 30, fill);
        let twice = pad_to_square(&once, 30, fill);
        assert_eq!(once, twice);
        assert_eq!(once.dimensions(), (30, 30));
    }
}

#[test]
fn composition_always_hits_target_size() {
    let dims = [(1000, 500), (500, 1000), (640, 640), (64, 200), (301, 300), (299, 300), (20, 20)];
    let subjects = [None, Some((0.2, 0.3, 0.2)), Some((0.7, 0.6, 0.1))];
    let oracles = Oracles::default();

    for fit in [FitPreference::Pad, FitPreference::Crop] {
        for maximize in [false, true] {
            let config = PipelineConfig {
                size: 300,
                fit,
                maximize_subject_fill: maximize,
                pad_color: PadColorPolicy::Transparent,
                detect_faces: false,
                ..PipelineConfig::default()
            };
            let composer = CanvasComposer::new(&config, &oracles);
            for (w, h) in dims {
                for subject in subjects {
                    let image = RgbaImage::from_pixel(w, h, Rgba([1, 2, 3, 255]));
                    let subject = subject.map(|(fx, fy, fs): (f32, f32, f32)| {
                        let side = w.min(h) as f32 * fs;
                        Rect::new(w as f32 * fx, h as f32 * fy, side, side)
                    });
                    let composition = composer
                        .compose(image, subject, &AuxiliaryAssets::default())
                        .unwrap();
                    assert_eq!(
                        composition.image.dimensions(),
                        (300, 300),
                        "{w}x{h} {fit:?} maximize={maximize} subject={subject:?}"
                    );
                    // The photo's own pixels always cover the canvas center.
                    assert_eq!(composition.image.get_pixel(150, 150)[3], 255);
                }
            }
        }
    }
}
