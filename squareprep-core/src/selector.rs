//! Picks one subject box out of the clustered face candidates.
//!
//! Selection is an ordered list of stages; each stage only runs when the previous
//! one produced nothing:
//!
//! 1. candidates with `support >= 2` that pass the plausibility filter,
//! 2. all candidates that pass the plausibility filter,
//! 3. the prioritized (or full) set ranked by `(support, area)`.
//!
//! The single-pass detector fallback for an empty candidate list lives in
//! [`crate::detector::MultiAngleDetector::detect_largest_face`].

use std::cmp::Ordering;

use serde::Serialize;

use crate::geometry::Rect;

/// Minimum support for a candidate to be part of the prioritized set.
pub const MIN_PRIORITY_SUPPORT: usize = 2;
/// Allowed face area as a fraction of the image area (inclusive).
pub const AREA_FRACTION_RANGE: (f32, f32) = (0.06, 0.60);
/// Allowed face center as a fraction of each image axis (exclusive).
pub const CENTER_FRACTION_RANGE: (f32, f32) = (0.04, 0.96);

/// A consensus face box and the number of raw detections behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceCandidate {
    pub rect: Rect,
    pub support: usize,
}

/// Which rule produced the selected box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStage {
    /// Corroborated candidate passing the plausibility filter.
    SupportedFiltered,
    /// Any candidate passing the plausibility filter.
    AllFiltered,
    /// Nothing plausible; best `(support, area)`.
    RankedBySupport,
    /// No candidates; largest box of a single unrotated pass.
    SinglePass,
}

impl SelectionStage {
    pub fn as_label(self) -> &'static str {
        match self {
            SelectionStage::SupportedFiltered => "supported+filtered",
            SelectionStage::AllFiltered => "filtered",
            SelectionStage::RankedBySupport => "ranked by support",
            SelectionStage::SinglePass => "single pass",
        }
    }
}

/// Outcome of face selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FaceSelection {
    Found { rect: Rect, stage: SelectionStage },
    NoFace,
}

impl FaceSelection {
    pub fn rect(&self) -> Option<Rect> {
        match self {
            FaceSelection::Found { rect, .. } => Some(*rect),
            FaceSelection::NoFace => None,
        }
    }
}

/// Returns `true` when a box has a plausible size and does not hug the image border.
pub fn is_plausible(rect: &Rect, extent: &Rect) -> bool {
    let image_area = extent.area();
    if image_area <= 0.0 || extent.width <= 0.0 || extent.height <= 0.0 {
        return false;
    }
    let fraction = rect.area() / image_area;
    if fraction < AREA_FRACTION_RANGE.0 || fraction > AREA_FRACTION_RANGE.1 {
        return false;
    }
    let (cx, cy) = rect.center();
    let fx = (cx - extent.x) / extent.width;
    let fy = (cy - extent.y) / extent.height;
    let (lo, hi) = CENTER_FRACTION_RANGE;
    fx > lo && fx < hi && fy > lo && fy < hi
}

/// Run the staged selection over clustered candidates.
///
/// Returns [`FaceSelection::NoFace`] for an empty candidate list; the caller decides
/// whether a single-pass fallback applies.
pub fn select_face(candidates: &[FaceCandidate], extent: &Rect) -> FaceSelection {
    if candidates.is_empty() {
        return FaceSelection::NoFace;
    }

    let prioritized: Vec<FaceCandidate> = candidates
        .iter()
        .copied()
        .filter(|c| c.support >= MIN_PRIORITY_SUPPORT)
        .collect();

    let stages: [(SelectionStage, &[FaceCandidate]); 2] = [
        (SelectionStage::SupportedFiltered, &prioritized),
        (SelectionStage::AllFiltered, candidates),
    ];
    for (stage, pool) in stages {
        let plausible = pool.iter().filter(|c| is_plausible(&c.rect, extent));
        if let Some(best) = plausible.max_by(|a, b| compare_area(&a.rect, &b.rect)) {
            return FaceSelection::Found {
                rect: best.rect,
                stage,
            };
        }
    }

    let pool: &[FaceCandidate] = if prioritized.is_empty() {
        candidates
    } else {
        &prioritized
    };
    pool.iter()
        .max_by(|a, b| {
            a.support
                .cmp(&b.support)
                .then_with(|| compare_area(&a.rect, &b.rect))
        })
        .map(|best| FaceSelection::Found {
            rect: best.rect,
            stage: SelectionStage::RankedBySupport,
        })
        .unwrap_or(FaceSelection::NoFace)
}

/// Largest box by area, used by the single-pass fallback.
pub fn largest_rect(rects: &[Rect]) -> Option<Rect> {
    rects.iter().copied().max_by(compare_area)
}

fn compare_area(a: &Rect, b: &Rect) -> Ordering {
    a.area().partial_cmp(&b.area()).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: Rect = Rect::new(0.0, 0.0, 1000.0, 1000.0);

    fn candidate(x: f32, y: f32, side: f32, support: usize) -> FaceCandidate {
        FaceCandidate {
            rect: Rect::new(x, y, side, side),
            support,
        }
    }

    #[test]
    fn plausibility_bounds() {
        // 6% of a 1000x1000 image is a ~245px square.
        assert!(is_plausible(&Rect::new(400.0, 400.0, 250.0, 250.0), &EXTENT));
        assert!(!is_plausible(&Rect::new(400.0, 400.0, 200.0, 200.0), &EXTENT));
        assert!(!is_plausible(&Rect::new(0.0, 0.0, 800.0, 800.0), &EXTENT));
        // Center at 3% of the width hugs the border.
        assert!(!is_plausible(&Rect::new(-120.0, 400.0, 300.0, 300.0), &EXTENT));
    }

    #[test]
    fn corroborated_plausible_candidate_wins() {
        let candidates = [
            candidate(100.0, 100.0, 400.0, 1),
            candidate(500.0, 500.0, 300.0, 3),
        ];
        let selection = select_face(&candidates, &EXTENT);
        assert_eq!(
            selection,
            FaceSelection::Found {
                rect: candidates[1].rect,
                stage: SelectionStage::SupportedFiltered
            }
        );
    }

    #[test]
    fn relaxes_support_gate_when_prioritized_set_is_implausible() {
        let candidates = [
            candidate(0.0, 0.0, 50.0, 3),
            candidate(300.0, 300.0, 300.0, 1),
        ];
        let selection = select_face(&candidates, &EXTENT);
        assert_eq!(
            selection,
            FaceSelection::Found {
                rect: candidates[1].rect,
                stage: SelectionStage::AllFiltered
            }
        );
    }

    #[test]
    fn falls_back_to_support_then_area_ranking() {
        let candidates = [
            candidate(10.0, 10.0, 100.0, 1),
            candidate(10.0, 600.0, 60.0, 2),
            candidate(600.0, 10.0, 80.0, 2),
        ];
        let selection = select_face(&candidates, &EXTENT);
        assert_eq!(
            selection,
            FaceSelection::Found {
                rect: candidates[2].rect,
                stage: SelectionStage::RankedBySupport
            }
        );
    }

    #[test]
    fn ranking_uses_full_set_without_corroboration() {
        let candidates = [candidate(0.0, 0.0, 20.0, 1), candidate(0.0, 900.0, 40.0, 1)];
        let selection = select_face(&candidates, &EXTENT);
        assert_eq!(selection.rect(), Some(candidates[1].rect));
    }

    #[test]
    fn empty_candidates_report_no_face() {
        assert_eq!(select_face(&[], &EXTENT), FaceSelection::NoFace);
        assert_eq!(largest_rect(&[]), None);
    }
}
