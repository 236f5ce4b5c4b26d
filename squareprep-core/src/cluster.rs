//! Greedy clustering of per-rotation face detections.

use crate::geometry::{Rect, intersection_over_union};

/// IoU needed to merge a detection into an existing cluster.
pub const DEFAULT_CLUSTER_IOU: f32 = 0.35;

/// Running average of the boxes merged so far.
#[derive(Debug, Clone, PartialEq)]
pub struct RectCluster {
    sum_min_x: f64,
    sum_min_y: f64,
    sum_max_x: f64,
    sum_max_y: f64,
    count: usize,
}

impl RectCluster {
    pub fn new(seed: &Rect) -> Self {
        let mut cluster = Self {
            sum_min_x: 0.0,
            sum_min_y: 0.0,
            sum_max_x: 0.0,
            sum_max_y: 0.0,
            count: 0,
        };
        cluster.add(seed);
        cluster
    }

    pub fn add(&mut self, rect: &Rect) {
        let rect = rect.standardized();
        self.sum_min_x += f64::from(rect.x);
        self.sum_min_y += f64::from(rect.y);
        self.sum_max_x += f64::from(rect.max_x());
        self.sum_max_y += f64::from(rect.max_y());
        self.count += 1;
    }

    /// Number of detections merged into this cluster.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The average box of all merged detections.
    pub fn representative(&self) -> Rect {
        let n = self.count.max(1) as f64;
        let min_x = self.sum_min_x / n;
        let min_y = self.sum_min_y / n;
        let max_x = self.sum_max_x / n;
        let max_y = self.sum_max_y / n;
        Rect::new(
            min_x as f32,
            min_y as f32,
            (max_x - min_x) as f32,
            (max_y - min_y) as f32,
        )
    }
}

/// Cluster detections in input order.
///
/// Each detection joins the first cluster whose *current* representative overlaps
/// it with IoU ≥ `iou_threshold`; otherwise it opens a new cluster. The result is
/// order-dependent but fully deterministic for a given input sequence.
pub fn cluster_rects(detections: &[Rect], iou_threshold: f32) -> Vec<RectCluster> {
    let mut clusters: Vec<RectCluster> = Vec::new();
    for detection in detections {
        let matched = clusters.iter_mut().find(|cluster| {
            intersection_over_union(&cluster.representative(), detection) >= iou_threshold
        });
        match matched {
            Some(cluster) => cluster.add(detection),
            None => clusters.push(RectCluster::new(detection)),
        }
    }
    clusters
}
