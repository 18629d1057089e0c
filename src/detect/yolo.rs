//! YOLOv8-style output decoding.
//!
//! The head emits `[1, 4 + C, N]`: for each of `N` anchors a center box
//! `(cx, cy, w, h)` in model input pixels followed by `C` class scores.

use anyhow::{anyhow, Result};
use std::cmp::Ordering;

use crate::detect::result::Detection;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

#[derive(Clone, Copy, Debug)]
pub struct YoloParams {
    pub class_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            class_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// Decode a raw head output.
///
/// `scale` maps model input pixels back to frame pixels (`[sx, sy]`);
/// `frame_size` clamps the resulting boxes.
pub fn decode(
    output: &[f32],
    anchors: usize,
    params: &YoloParams,
    scale: [f32; 2],
    frame_size: [u32; 2],
) -> Result<Vec<Detection>> {
    if anchors == 0 || output.len() % anchors != 0 {
        return Err(anyhow!(
            "output length {} is not a multiple of {} anchors",
            output.len(),
            anchors
        ));
    }
    let rows = output.len() / anchors;
    if rows <= 4 {
        return Err(anyhow!("output has {} rows, expected 4 box rows plus classes", rows));
    }
    let classes = rows - 4;
    let max_x = frame_size[0] as f32;
    let max_y = frame_size[1] as f32;

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let mut best_score = 0.0f32;
        let mut best_class = 0usize;
        for c in 0..classes {
            let score = output[anchors * (4 + c) + i];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score < params.class_threshold {
            continue;
        }

        let cx = output[i];
        let cy = output[anchors + i];
        let w = output[anchors * 2 + i];
        let h = output[anchors * 3 + i];
        let bbox = [
            ((cx - w / 2.0) * scale[0]).clamp(0.0, max_x),
            ((cy - h / 2.0) * scale[1]).clamp(0.0, max_y),
            ((cx + w / 2.0) * scale[0]).clamp(0.0, max_x),
            ((cy + h / 2.0) * scale[1]).clamp(0.0, max_y),
        ];
        let label = COCO_CLASSES
            .get(best_class)
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("class {}", best_class));
        candidates.push(Detection::new(label, best_score, bbox));
    }

    let mut kept = nms(candidates, params.iou_threshold);
    kept.truncate(params.max_detections);
    Ok(kept)
}

/// Per-class non-maximum suppression, highest confidence first.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|k| k.label == det.label && iou(&k.bbox, &det.bbox) >= iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a `[4 + classes, anchors]` buffer from per-anchor rows.
    fn head(classes: usize, anchors: &[([f32; 4], Vec<(usize, f32)>)]) -> Vec<f32> {
        let n = anchors.len();
        let mut out = vec![0.0; (4 + classes) * n];
        for (i, (bx, scores)) in anchors.iter().enumerate() {
            for (r, v) in bx.iter().enumerate() {
                out[r * n + i] = *v;
            }
            for &(c, s) in scores {
                out[(4 + c) * n + i] = s;
            }
        }
        out
    }

    #[test]
    fn decodes_best_class_and_scales_boxes() -> Result<()> {
        let out = head(3, &[([100.0, 100.0, 40.0, 80.0], vec![(0, 0.9), (2, 0.3)])]);
        let dets = decode(&out, 1, &YoloParams::default(), [2.0, 0.5], [1000, 1000])?;

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "person");
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(dets[0].bbox, [160.0, 30.0, 240.0, 70.0]);
        Ok(())
    }

    #[test]
    fn low_scores_are_dropped() -> Result<()> {
        let out = head(2, &[([10.0, 10.0, 4.0, 4.0], vec![(1, 0.1)])]);
        assert!(decode(&out, 1, &YoloParams::default(), [1.0, 1.0], [64, 64])?.is_empty());
        Ok(())
    }

    #[test]
    fn nms_suppresses_overlapping_boxes_of_same_class_only() {
        let dets = vec![
            Detection::new("person", 0.6, [0.0, 0.0, 10.0, 10.0]),
            Detection::new("person", 0.9, [1.0, 1.0, 11.0, 11.0]),
            Detection::new("dog", 0.5, [0.0, 0.0, 10.0, 10.0]),
        ];
        let kept = nms(dets, 0.45);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].label, "dog");
    }

    #[test]
    fn mismatched_output_length_is_rejected() {
        assert!(decode(&[0.0; 10], 3, &YoloParams::default(), [1.0, 1.0], [8, 8]).is_err());
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
        assert!((iou(&[0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
