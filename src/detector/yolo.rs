//! Decoding of YOLO-style detection heads.
//!
//! The raw output is one `[4 + num_classes, num_anchors]` tensor per image,
//! channel-major: box center x, center y, width, height, then one score per
//! class. Boxes are in model input pixels.

use std::cmp::Ordering;

use crate::detector::RawDetection;

/// IoU above which a lower-scoring box of the same class is suppressed
pub const NMS_IOU: f32 = 0.7;

/// Upper bound on detections returned per image
pub const MAX_DETECTIONS: usize = 300;

/// Decode a channel-major output tensor into thresholded candidates.
///
/// Returns an error message if the buffer does not match the declared shape.
pub fn decode(
    output: &[f32],
    num_channels: usize,
    num_anchors: usize,
    confidence: f32,
) -> Result<Vec<RawDetection>, String> {
    if num_channels < 5 {
        return Err(format!(
            "detector output requires at least 5 channels (box + 1 class), got {}",
            num_channels
        ));
    }
    if output.len() != num_channels * num_anchors {
        return Err(format!(
            "unexpected detector output size: got {} values, expected {}x{}",
            output.len(),
            num_channels,
            num_anchors
        ));
    }

    let at = |channel: usize, anchor: usize| output[channel * num_anchors + anchor];
    let mut candidates = Vec::new();

    for anchor in 0..num_anchors {
        let (class_id, score) = (4..num_channels)
            .map(|c| (c - 4, at(c, anchor)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .unwrap_or((0, 0.0));

        if score.is_nan() || score < confidence {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        candidates.push(RawDetection {
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            confidence: score,
            class_id,
        });
    }

    Ok(candidates)
}

/// Intersection over union of two `[x1, y1, x2, y2]` boxes
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Class-wise non-maximum suppression; result is sorted by descending confidence
pub fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32, max_det: usize) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

    let mut kept: Vec<RawDetection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_det {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a channel-major buffer from per-anchor rows
    fn channel_major(rows: &[Vec<f32>]) -> Vec<f32> {
        let channels = rows[0].len();
        let mut out = Vec::with_capacity(channels * rows.len());
        for c in 0..channels {
            for row in rows {
                out.push(row[c]);
            }
        }
        out
    }

    #[test]
    fn test_decode_picks_best_class_and_converts_box() {
        let rows = vec![
            vec![30.0, 35.0, 40.0, 50.0, 0.2, 0.95],
            vec![100.0, 100.0, 10.0, 10.0, 0.1, 0.3],
        ];
        let dets = decode(&channel_major(&rows), 6, 2, 0.5).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        assert_eq!(dets[0].confidence, 0.95);
        assert_eq!(dets[0].bbox, [10.0, 10.0, 50.0, 60.0]);
    }

    #[test]
    fn test_decode_threshold_is_inclusive() {
        let rows = vec![vec![5.0, 5.0, 2.0, 2.0, 0.5]];
        assert_eq!(decode(&channel_major(&rows), 5, 1, 0.5).unwrap().len(), 1);
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        assert!(decode(&[0.0; 8], 4, 2, 0.5).is_err());
        assert!(decode(&[0.0; 9], 5, 2, 0.5).is_err());
    }

    #[test]
    fn test_decode_skips_nan_scores() {
        let rows = vec![vec![5.0, 5.0, 2.0, 2.0, f32::NAN]];
        assert!(decode(&channel_major(&rows), 5, 1, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        let half = iou(&a, &[0.0, 0.0, 10.0, 5.0]);
        assert!((half - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_nms_is_class_wise() {
        let det = |bbox: [f32; 4], confidence: f32, class_id: usize| RawDetection { bbox, confidence, class_id };
        let candidates = vec![
            det([0.0, 0.0, 10.0, 10.0], 0.6, 0),
            det([0.0, 0.0, 10.0, 10.5], 0.9, 0),
            det([0.0, 0.0, 10.0, 10.0], 0.8, 1),
            det([50.0, 50.0, 60.0, 60.0], 0.7, 0),
        ];
        let kept = non_max_suppression(candidates, NMS_IOU, MAX_DETECTIONS);
        let scores: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.7]);
    }

    #[test]
    fn test_nms_caps_detections() {
        let candidates = (0..10)
            .map(|i| RawDetection {
                bbox: [i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0],
                confidence: 0.5 + i as f32 * 0.01,
                class_id: 0,
            })
            .collect();
        assert_eq!(non_max_suppression(candidates, NMS_IOU, 3).len(), 3);
    }
}
