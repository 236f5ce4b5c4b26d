use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use squareprep_core::{
    FaceDetector, MatteOnlySegmenter, Oracles, PersonSegmenter, PipelineConfig, ProgressEvent,
    Rect, SegmentationOutcome, collect_inputs, create_output_directory, run_batch,
};
use squareprep_utils::{PadColorPolicy, RgbaColor, SegmentationEngine};
use tempfile::tempdir;

const BACKGROUND: Rgba<u8> = Rgba([60, 60, 60, 255]);
const FACE: Rgba<u8> = Rgba([230, 20, 20, 255]);

/// Reports the bounding box of strongly red, opaque pixels as a single face.
struct RedBlobDetector;

fn is_face_pixel(pixel: &Rgba<u8>) -> bool {
    pixel[0] > 200 && pixel[1] < 80 && pixel[2] < 80 && pixel[3] == 255
}

impl FaceDetector for RedBlobDetector {
    fn detect(&self, image: &RgbaImage) -> Result<Vec<Rect>> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, pixel) in image.enumerate_pixels() {
            if is_face_pixel(pixel) {
                let b = bounds.get_or_insert((x, y, x, y));
                b.0 = b.0.min(x);
                b.1 = b.1.min(y);
                b.2 = b.2.max(x);
                b.3 = b.3.max(y);
            }
        }
        Ok(bounds
            .map(|(x0, y0, x1, y1)| {
                vec![Rect::from_corners(
                    x0 as f32,
                    y0 as f32,
                    (x1 + 1) as f32,
                    (y1 + 1) as f32,
                )]
            })
            .unwrap_or_default())
    }
}

struct FailingSegmenter;

impl PersonSegmenter for FailingSegmenter {
    fn engine(&self) -> SegmentationEngine {
        SegmentationEngine::Person
    }

    fn segment(&self, _image: &RgbaImage) -> Result<SegmentationOutcome> {
        anyhow::bail!("segmentation model crashed")
    }
}

/// 2000×2000 photo with one face-sized blob (about 15% of the area) left of center.
fn portrait_photo(dir: &Path, name: &str) -> PathBuf {
    let mut image = RgbaImage::from_pixel(2000, 2000, BACKGROUND);
    let side = 775;
    let (x0, y0) = (700 - side / 2, 1000 - side / 2);
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            image.put_pixel(x, y, FACE);
        }
    }
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

fn face_centroid(image: &RgbaImage) -> Option<(f32, f32)> {
    let (mut sx, mut sy, mut n) = (0f64, 0f64, 0f64);
    for (x, y, pixel) in image.enumerate_pixels() {
        if is_face_pixel(pixel) {
            sx += f64::from(x) + 0.5;
            sy += f64::from(y) + 0.5;
            n += 1.0;
        }
    }
    (n > 0.0).then(|| ((sx / n) as f32, (sy / n) as f32))
}

fn config(size: u32) -> PipelineConfig {
    PipelineConfig {
        size,
        ..PipelineConfig::default()
    }
}

#[test]
fn single_face_is_recentered() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in");
    fs::create_dir(&input).unwrap();
    portrait_photo(&input, "portrait.png");
    let out = dir.path().join("out");
    create_output_directory(&out).unwrap();

    let inputs = collect_inputs(&input).unwrap();
    let oracles = Oracles::default().with_detector(RedBlobDetector);
    let mut faces = Vec::new();
    let report = run_batch(&inputs, &out, "JANE_DOE", &config(256), &oracles, |event| {
        if let ProgressEvent::FaceDetectionResult { face, .. } = event {
            faces.push(*face);
        }
    });

    assert_eq!(report.failed(), 0);
    assert_eq!(faces.len(), 1);
    let face = faces[0].expect("face detected");
    let (cx, cy) = face.center();
    assert!((cx - 700.0).abs() < 4.0 && (cy - 1000.0).abs() < 4.0, "({cx}, {cy})");

    let written = image::open(out.join("01_JANE_DOE.png")).unwrap().to_rgba8();
    assert_eq!(written.dimensions(), (256, 256));
    let (fx, fy) = face_centroid(&written).expect("face pixels survive");
    assert!((fx - 128.0).abs() <= 3.0, "face x {fx}");
    assert!((fy - 128.0).abs() <= 3.0, "face y {fy}");
    assert!(written.pixels().all(|p| p[3] == 255));
}

#[test]
fn landscape_without_face_is_padded_top_and_bottom() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in");
    fs::create_dir(&input).unwrap();
    let content = Rgba([20, 40, 200, 255]);
    RgbaImage::from_pixel(3000, 1500, content)
        .save(input.join("landscape.png"))
        .unwrap();
    let out = dir.path().join("out");
    create_output_directory(&out).unwrap();

    let pad = RgbaColor::opaque(250, 250, 250);
    let config = PipelineConfig {
        pad_color: PadColorPolicy::Solid(pad),
        ..config(300)
    };
    let oracles = Oracles::default().with_detector(RedBlobDetector);
    let mut faces = Vec::new();
    let report = run_batch(
        &collect_inputs(&input).unwrap(),
        &out,
        "SCENE",
        &config,
        &oracles,
        |event| {
            if let ProgressEvent::FaceDetectionResult { face, .. } = event {
                faces.push(*face);
            }
        },
    );

    assert_eq!(report.succeeded(), 1);
    assert_eq!(faces, vec![None]);
    let written = image::open(out.join("01_SCENE.png")).unwrap().to_rgba8();
    assert_eq!(written.dimensions(), (300, 300));
    // 3000x1500 scales to 300x150, centered on rows 75..225.
    for x in 0..300 {
        for y in [0, 74, 225, 299] {
            assert_eq!(*written.get_pixel(x, y), pad.to_pixel(), "pad at ({x}, {y})");
        }
        for y in [75, 150, 224] {
            assert_eq!(*written.get_pixel(x, y), content, "content at ({x}, {y})");
        }
    }
    for y in 75..225 {
        assert_eq!(*written.get_pixel(0, y), content, "left edge at row {y}");
        assert_eq!(*written.get_pixel(299, y), content, "right edge at row {y}");
    }
}

struct PanickingDetector;

impl FaceDetector for PanickingDetector {
    fn detect(&self, _image: &RgbaImage) -> Result<Vec<Rect>> {
        panic!("detector state corrupted");
    }
}

#[test]
fn panicking_detector_is_recorded_per_photo() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in");
    fs::create_dir(&input).unwrap();
    portrait_photo(&input, "a.png");
    portrait_photo(&input, "b.png");
    let out = dir.path().join("out");
    create_output_directory(&out).unwrap();

    let oracles = Oracles::default().with_detector(PanickingDetector);
    let mut completed = false;
    let mut failed_events = 0;
    let report = run_batch(
        &collect_inputs(&input).unwrap(),
        &out,
        "P",
        &config(64),
        &oracles,
        |event| match event {
            ProgressEvent::Failed(_) => failed_events += 1,
            ProgressEvent::Completed(_) => completed = true,
            _ => {}
        },
    );

    assert!(completed);
    assert_eq!(failed_events, 2);
    assert_eq!(report.succeeded(), 0);
    assert_eq!(report.failed(), 2);
    assert!(report.failures[0].source_path.ends_with("a.png"));
    assert!(report.failures[1].source_path.ends_with("b.png"));
    assert!(
        report.failures[0].error.contains("detector state corrupted"),
        "{}",
        report.failures[0].error
    );
}

#[test]
fn unavailable_segmentation_keeps_output_opaque() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in");
    fs::create_dir(&input).unwrap();
    portrait_photo(&input, "a.png");
    portrait_photo(&input, "b.png");
    let inputs = collect_inputs(&input).unwrap();
    let config = PipelineConfig {
        remove_background: true,
        ..config(128)
    };

    let segmenters: Vec<Box<dyn PersonSegmenter>> =
        vec![Box::new(MatteOnlySegmenter), Box::new(FailingSegmenter)];
    for (i, segmenter) in segmenters.into_iter().enumerate() {
        let out = dir.path().join(format!("out{i}"));
        create_output_directory(&out).unwrap();
        let oracles = Oracles {
            detector: Some(Box::new(RedBlobDetector)),
            segmenter: Some(segmenter),
            upscaler: None,
        };
        let report = run_batch(&inputs, &out, "X", &config, &oracles, |_| {});
        assert_eq!(report.failed(), 0);
        assert_eq!(report.succeeded(), 2);
        for name in ["01_X.png", "02_X.png"] {
            let written = image::open(out.join(name)).unwrap().to_rgba8();
            assert_eq!(written.dimensions(), (128, 128));
            assert!(written.pixels().all(|p| p[3] == 255), "{name} has transparency");
        }
    }
}

#[test]
fn corrupt_file_is_isolated_and_numbering_has_no_gap() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in");
    fs::create_dir(&input).unwrap();
    for (i, name) in ["a.png", "b.png", "d.png", "e.png", "f.png"].iter().enumerate() {
        RgbaImage::from_pixel(90 + i as u32 * 10, 60, BACKGROUND)
            .save(input.join(name))
            .unwrap();
    }
    fs::write(input.join("c.jpg"), b"\xFF\xD8\xFF definitely not a jpeg").unwrap();
    let out = dir.path().join("out");
    create_output_directory(&out).unwrap();

    let config = PipelineConfig {
        detect_faces: false,
        ..config(64)
    };
    let report = run_batch(
        &collect_inputs(&input).unwrap(),
        &out,
        "BATCH",
        &config,
        &Oracles::default(),
        |_| {},
    );

    assert_eq!(report.succeeded(), 5);
    assert_eq!(report.failed(), 1);
    assert!(report.failures[0].source_path.ends_with("c.jpg"));
    assert!(report.failures[0].error.contains("c.jpg"));

    let mut written: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    written.sort();
    assert_eq!(
        written,
        vec!["01_BATCH.png", "02_BATCH.png", "03_BATCH.png", "04_BATCH.png", "05_BATCH.png"]
    );
    assert!(report.processed[2].original_path.ends_with("d.png"));
}

#[test]
fn portrait_matte_sidecar_removes_background() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in");
    fs::create_dir(&input).unwrap();
    RgbaImage::from_pixel(200, 200, BACKGROUND)
        .save(input.join("photo.png"))
        .unwrap();
    GrayImage::from_fn(100, 100, |x, _| Luma([if x < 50 { 255 } else { 0 }]))
        .save(input.join("photo.matte.png"))
        .unwrap();
    let out = dir.path().join("out");
    create_output_directory(&out).unwrap();

    let inputs = collect_inputs(&input).unwrap();
    assert_eq!(inputs.len(), 1);
    let config = PipelineConfig {
        detect_faces: false,
        remove_background: true,
        ..config(100)
    };
    let oracles = Oracles::default().with_segmenter(MatteOnlySegmenter);
    let report = run_batch(&inputs, &out, "M", &config, &oracles, |_| {});
    assert_eq!(report.succeeded(), 1);

    let written = image::open(out.join("01_M.png")).unwrap().to_rgba8();
    assert_eq!(written.get_pixel(20, 50)[3], 255);
    assert_eq!(written.get_pixel(80, 50)[3], 0);
}
