//! Detection records and duplicate suppression
//!
//! The inference stage sits behind the `Detector` trait; this module owns the
//! geometry helpers and the per-class IoU deduplication that collapses
//! redundant detections of the same physical target.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::frame::Frame;

/// A 2D point in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    /// Tightest axis-aligned box around a set of points
    pub fn from_points(points: &[Point]) -> Self {
        let mut bbox = Self {
            x_min: f32::MAX,
            y_min: f32::MAX,
            x_max: f32::MIN,
            y_max: f32::MIN,
        };
        for p in points {
            bbox.x_min = bbox.x_min.min(p.x);
            bbox.y_min = bbox.y_min.min(p.y);
            bbox.x_max = bbox.x_max.max(p.x);
            bbox.y_max = bbox.y_max.max(p.y);
        }
        bbox
    }

    pub fn area(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0) * (self.y_max - self.y_min).max(0.0)
    }

    /// Intersection-over-union with another box
    ///
    /// A pair of zero-area boxes has IoU 0, never a division by zero.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x_min.max(other.x_min);
        let y1 = self.y_min.max(other.y_min);
        let x2 = self.x_max.min(other.x_max);
        let y2 = self.y_max.min(other.y_max);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// One candidate target reported by the inference stage for one frame
///
/// Corners are ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone)]
pub struct Detection {
    pub corners: [Point; 4],
    pub class_id: u32,
    /// Confidence score in [0, 1]
    pub confidence: f32,
    /// Capture time of the frame this detection came from
    pub timestamp: Instant,
}

impl Detection {
    pub fn new(corners: [Point; 4], class_id: u32, confidence: f32, timestamp: Instant) -> Self {
        Self {
            corners,
            class_id,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp,
        }
    }

    /// All-zero corners denote an unfilled detection that must never reach
    /// the deduplicator
    pub fn is_filled(&self) -> bool {
        self.corners.iter().any(|p| !p.is_zero())
    }

    /// Center of the four corner points
    pub fn center(&self) -> Point {
        let sum_x: f32 = self.corners.iter().map(|p| p.x).sum();
        let sum_y: f32 = self.corners.iter().map(|p| p.y).sum();
        Point::new(sum_x / 4.0, sum_y / 4.0)
    }

    /// Width measured between the left and right edge midpoints
    pub fn width(&self) -> f32 {
        let [tl, tr, br, bl] = self.corners;
        let left = Point::new((tl.x + bl.x) / 2.0, (tl.y + bl.y) / 2.0);
        let right = Point::new((tr.x + br.x) / 2.0, (tr.y + br.y) / 2.0);
        ((right.x - left.x).powi(2) + (right.y - left.y).powi(2)).sqrt()
    }

    /// Height of the shorter side edge
    pub fn height(&self) -> f32 {
        let [tl, tr, br, bl] = self.corners;
        let left = ((tl.x - bl.x).powi(2) + (tl.y - bl.y).powi(2)).sqrt();
        let right = ((tr.x - br.x).powi(2) + (tr.y - br.y).powi(2)).sqrt();
        left.min(right)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(&self.corners)
    }
}

/// The neural inference collaborator
///
/// Implementations run the forward pass and fill detections from its output;
/// unfilled (all-zero corner) candidates must be filtered before returning.
pub trait Detector: Send + Sync {
    fn predict(&self, frame: &Frame) -> Vec<Detection>;
}

/// Collapses duplicate detections of the same physical target
///
/// Greedy per-class non-maximum suppression over axis-aligned boxes.
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    iou_threshold: f32,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self { iou_threshold: 0.9 }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.iou_threshold
    }

    /// Reduce a detection set to at most one entry per physical target
    ///
    /// Within each class, detections are taken in descending confidence order
    /// (ties keep their input order); every remaining same-class detection
    /// whose box overlaps the accepted one with IoU strictly above the
    /// threshold is suppressed. Deterministic for identical input ordering.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        if detections.is_empty() {
            return detections;
        }
        debug_assert!(detections.iter().all(Detection::is_filled));

        let mut by_class: BTreeMap<u32, Vec<Detection>> = BTreeMap::new();
        for detection in detections {
            by_class.entry(detection.class_id).or_default().push(detection);
        }

        let mut survivors = Vec::new();
        for (_, mut group) in by_class {
            // Stable sort keeps the original order for equal confidences.
            group.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(Ordering::Equal)
            });

            let boxes: Vec<BoundingBox> = group.iter().map(Detection::bounding_box).collect();
            let mut suppressed = vec![false; group.len()];
            for i in 0..group.len() {
                if suppressed[i] {
                    continue;
                }
                for j in (i + 1)..group.len() {
                    if suppressed[j] {
                        continue;
                    }
                    if boxes[i].iou(&boxes[j]) > self.iou_threshold {
                        suppressed[j] = true;
                    }
                }
            }

            for (detection, dead) in group.into_iter().zip(suppressed) {
                if !dead {
                    survivors.push(detection);
                }
            }
        }
        survivors
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class_id: u32, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(
            [
                Point::new(x, y),
                Point::new(x + w, y),
                Point::new(x + w, y + h),
                Point::new(x, y + h),
            ],
            class_id,
            confidence,
            Instant::now(),
        )
    }

    #[test]
    fn test_iou_of_identical_boxes() {
        let a = detection(0, 0.9, 10.0, 10.0, 20.0, 20.0).bounding_box();
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_of_disjoint_boxes() {
        let a = detection(0, 0.9, 0.0, 0.0, 10.0, 10.0).bounding_box();
        let b = detection(0, 0.9, 100.0, 100.0, 10.0, 10.0).bounding_box();
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_zero_area_boxes_have_iou_zero() {
        let a = BoundingBox::from_points(&[Point::new(5.0, 5.0)]);
        let b = BoundingBox::from_points(&[Point::new(5.0, 5.0)]);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_center_is_corner_average() {
        let d = detection(0, 0.9, 10.0, 20.0, 4.0, 6.0);
        let c = d.center();
        assert!((c.x - 12.0).abs() < 1e-6);
        assert!((c.y - 23.0).abs() < 1e-6);
    }

    #[test]
    fn test_unfilled_detection_detected() {
        let d = Detection::new([Point::default(); 4], 0, 0.5, Instant::now());
        assert!(!d.is_filled());
    }

    #[test]
    fn test_confidence_clamped() {
        let d = detection(0, 1.5, 0.0, 0.0, 1.0, 1.0);
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn test_empty_input_empty_output() {
        let dedup = Deduplicator::new();
        assert!(dedup.apply(Vec::new()).is_empty());
    }

    #[test]
    fn test_singleton_survives() {
        let dedup = Deduplicator::new();
        let out = dedup.apply(vec![detection(3, 0.4, 0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 3);
    }

    #[test]
    fn test_disjoint_boxes_all_survive() {
        let dedup = Deduplicator::new().with_threshold(0.5);
        let input = vec![
            detection(1, 0.9, 0.0, 0.0, 10.0, 10.0),
            detection(1, 0.8, 50.0, 0.0, 10.0, 10.0),
            detection(1, 0.7, 0.0, 50.0, 10.0, 10.0),
        ];
        assert_eq!(dedup.apply(input).len(), 3);
    }

    #[test]
    fn test_high_overlap_keeps_highest_confidence() {
        // Two near-coincident boxes, confidences 0.9 and 0.95; only the
        // stronger one survives a 0.9 threshold.
        let dedup = Deduplicator::new().with_threshold(0.9);
        let weak = detection(2, 0.9, 10.0, 10.0, 100.0, 100.0);
        let strong = detection(2, 0.95, 10.0, 11.0, 100.0, 100.0);
        let out = dedup.apply(vec![weak, strong]);
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_different_classes_never_suppress_each_other() {
        let dedup = Deduplicator::new().with_threshold(0.1);
        let input = vec![
            detection(1, 0.9, 0.0, 0.0, 10.0, 10.0),
            detection(2, 0.8, 0.0, 0.0, 10.0, 10.0),
        ];
        assert_eq!(dedup.apply(input).len(), 2);
    }

    #[test]
    fn test_idempotent() {
        let dedup = Deduplicator::new().with_threshold(0.5);
        let input = vec![
            detection(1, 0.9, 0.0, 0.0, 10.0, 10.0),
            detection(1, 0.85, 1.0, 1.0, 10.0, 10.0),
            detection(1, 0.7, 50.0, 50.0, 10.0, 10.0),
            detection(2, 0.6, 0.0, 0.0, 10.0, 10.0),
        ];
        let once = dedup.apply(input);
        let twice = dedup.apply(once.clone());
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.class_id, b.class_id);
            assert_eq!(a.confidence, b.confidence);
            assert_eq!(a.corners, b.corners);
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        // IoU exactly at the threshold is NOT suppressed.
        let dedup = Deduplicator::new().with_threshold(1.0);
        let input = vec![
            detection(1, 0.9, 0.0, 0.0, 10.0, 10.0),
            detection(1, 0.8, 0.0, 0.0, 10.0, 10.0),
        ];
        // Identical boxes have IoU 1.0, which is not strictly greater.
        assert_eq!(dedup.apply(input).len(), 2);
    }

    #[test]
    fn test_chain_suppression_is_greedy() {
        // A suppresses B; C overlaps B but not A, so C survives because B
        // was already gone when its turn came.
        let dedup = Deduplicator::new().with_threshold(0.3);
        let a = detection(1, 0.9, 0.0, 0.0, 10.0, 10.0);
        let b = detection(1, 0.8, 4.0, 0.0, 10.0, 10.0);
        let c = detection(1, 0.7, 9.0, 0.0, 10.0, 10.0);
        let out = dedup.apply(vec![a, b, c]);
        let confidences: Vec<f32> = out.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }
}
