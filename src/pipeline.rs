//! Inference pipeline
//!
//! Stages the uploaded bytes in a scoped temporary file, runs the model on
//! it and normalizes the raw detections into the response schema. The
//! temporary file is removed on every exit path.

use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::INPUT_SIZE;
use crate::detector::{ClassLabels, DetectOptions, RawDetection};
use crate::error::PipelineError;
use crate::registry::Model;
use crate::validate::InferenceRequest;

/// Bounding box in original image pixels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub width: f64,
    pub height: f64,
}

/// One detection in a `/predict` response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Position in this response, not stable across calls
    pub id: usize,
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// Successful `/predict` response body
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResponse {
    pub success: bool,
    pub model_used: String,
    pub threshold: f64,
    pub image_filename: String,
    pub detections_count: usize,
    pub detections: Vec<Detection>,
}

/// A temporary file bound to one request.
///
/// [`ScopedArtifact::release`] removes it and reports failures; dropping it
/// without releasing (early return, panic) still removes it.
pub struct ScopedArtifact {
    file: NamedTempFile,
}

impl ScopedArtifact {
    /// Write `bytes` to a uniquely named file in `dir` ending in `extension`
    pub fn create(dir: &Path, extension: &str, bytes: &[u8]) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(extension)
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file now
    pub fn release(self) -> io::Result<()> {
        self.file.close()
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Convert raw engine output into response detections.
///
/// Anything below `threshold` is dropped; ids are assigned in engine order.
/// The comparison happens at engine precision, the same cut the engine made.
pub fn normalize(raw: &[RawDetection], labels: &ClassLabels, threshold: f64) -> Result<Vec<Detection>, PipelineError> {
    let cut = threshold as f32;
    raw.iter()
        .filter(|d| d.confidence >= cut)
        .enumerate()
        .map(|(id, d)| -> Result<Detection, PipelineError> {
            let class_name = labels
                .get(&d.class_id)
                .cloned()
                .ok_or(PipelineError::UnknownClass { class_id: d.class_id })?;
            let [x1, y1, x2, y2] = d.bbox.map(f64::from);
            Ok(Detection {
                id,
                class_id: d.class_id,
                class_name,
                confidence: round_to(f64::from(d.confidence), 4),
                bbox: BoundingBox {
                    x1: round_to(x1, 2),
                    y1: round_to(y1, 2),
                    x2: round_to(x2, 2),
                    y2: round_to(y2, 2),
                    width: round_to(x2 - x1, 2),
                    height: round_to(y2 - y1, 2),
                },
            })
        })
        .collect()
}

fn detect_and_normalize(request: &InferenceRequest, model: &Model, image: &Path) -> Result<InferenceResponse, PipelineError> {
    let options = DetectOptions {
        confidence: request.threshold as f32,
        image_size: INPUT_SIZE,
    };
    let raw = model.detect(image, &options)?;
    debug!("Model '{}' returned {} raw detections", model.name(), raw.len());

    let detections = normalize(&raw, model.labels(), request.threshold)?;
    Ok(InferenceResponse {
        success: true,
        model_used: request.model_name.clone(),
        threshold: request.threshold,
        image_filename: request.filename.clone(),
        detections_count: detections.len(),
        detections,
    })
}

/// Run one validated request against `model`, staging the image in `upload_dir`.
///
/// Blocking for the duration of the detection call.
pub fn run(request: &InferenceRequest, model: &Model, upload_dir: &Path) -> Result<InferenceResponse, PipelineError> {
    let artifact = ScopedArtifact::create(upload_dir, &request.extension, &request.image)?;
    let outcome = detect_and_normalize(request, model, artifact.path());

    if let Err(e) = artifact.release() {
        warn!("Failed to remove temporary upload: {}", e);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use crate::error::DetectorError;
    use std::sync::{Arc, Mutex};

    /// Returns canned detections and records what it was called with
    struct ScriptedDetector {
        labels: ClassLabels,
        output: Result<Vec<RawDetection>, String>,
        seen: Mutex<Option<(std::path::PathBuf, bool, DetectOptions)>>,
    }

    impl ScriptedDetector {
        fn new(output: Result<Vec<RawDetection>, String>) -> Self {
            Self {
                labels: ClassLabels::from([(0, "ripe".to_string()), (1, "unripe".to_string())]),
                output,
                seen: Mutex::new(None),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, image: &Path, options: &DetectOptions) -> Result<Vec<RawDetection>, DetectorError> {
            *self.seen.lock().unwrap() = Some((image.to_path_buf(), image.exists(), *options));
            self.output.clone().map_err(DetectorError::Engine)
        }

        fn labels(&self) -> &ClassLabels {
            &self.labels
        }
    }

    fn request(threshold: f64) -> InferenceRequest {
        InferenceRequest {
            image: b"fake image bytes".to_vec(),
            filename: "field.png".to_string(),
            extension: ".png".to_string(),
            model_name: "lettuce".to_string(),
            threshold,
        }
    }

    fn raw(bbox: [f32; 4], confidence: f32, class_id: usize) -> RawDetection {
        RawDetection { bbox, confidence, class_id }
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_single_detection() {
        let upload_dir = tempfile::tempdir().unwrap();
        let detector = Arc::new(ScriptedDetector::new(Ok(vec![raw([10.0, 10.0, 50.0, 60.0], 0.95, 0)])));
        let model = Model::new("lettuce", "models/lettuce/best.pt", detector.clone());

        let response = run(&request(0.9), &model, upload_dir.path()).unwrap();

        assert!(response.success);
        assert_eq!(response.threshold, 0.9);
        assert_eq!(response.model_used, "lettuce");
        assert_eq!(response.image_filename, "field.png");
        assert_eq!(response.detections_count, 1);
        let det = &response.detections[0];
        assert_eq!(det.class_name, "ripe");
        assert_eq!(det.confidence, 0.95);
        assert_eq!(
            det.bbox,
            BoundingBox { x1: 10.0, y1: 10.0, x2: 50.0, y2: 60.0, width: 40.0, height: 50.0 }
        );

        let (path, existed, options) = detector.seen.lock().unwrap().clone().unwrap();
        assert!(existed);
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(options.image_size, INPUT_SIZE);
        assert_eq!(options.confidence, 0.9);
        assert!(!path.exists());
        assert!(dir_is_empty(upload_dir.path()));
    }

    #[test]
    fn test_detection_failure_still_cleans_up() {
        let upload_dir = tempfile::tempdir().unwrap();
        let detector = Arc::new(ScriptedDetector::new(Err("cannot identify image file".to_string())));
        let model = Model::new("lettuce", "best.pt", detector);

        let err = run(&request(0.5), &model, upload_dir.path()).unwrap_err();

        assert!(err.to_string().contains("cannot identify image file"));
        assert!(dir_is_empty(upload_dir.path()));
    }

    #[test]
    fn test_unknown_class_still_cleans_up() {
        let upload_dir = tempfile::tempdir().unwrap();
        let detector = Arc::new(ScriptedDetector::new(Ok(vec![raw([0.0, 0.0, 1.0, 1.0], 0.8, 9)])));
        let model = Model::new("lettuce", "best.pt", detector);

        let err = run(&request(0.5), &model, upload_dir.path()).unwrap_err();

        assert!(matches!(err, PipelineError::UnknownClass { class_id: 9 }));
        assert!(dir_is_empty(upload_dir.path()));
    }

    #[test]
    fn test_missing_upload_dir_is_artifact_error() {
        let upload_dir = tempfile::tempdir().unwrap();
        let detector = Arc::new(ScriptedDetector::new(Ok(Vec::new())));
        let model = Model::new("lettuce", "best.pt", detector.clone());

        let err = run(&request(0.5), &model, &upload_dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, PipelineError::Artifact(_)));
        assert!(detector.seen.lock().unwrap().is_none());
    }

    #[test]
    fn test_no_boxes_is_empty_not_error() {
        let upload_dir = tempfile::tempdir().unwrap();
        let model = Model::new("lettuce", "best.pt", Arc::new(ScriptedDetector::new(Ok(Vec::new()))));

        let response = run(&request(0.5), &model, upload_dir.path()).unwrap();
        assert_eq!(response.detections_count, 0);
        assert!(response.detections.is_empty());
    }

    #[test]
    fn test_normalize_rounds_and_filters() {
        let labels = ClassLabels::from([(0, "ripe".to_string()), (1, "unripe".to_string())]);
        let raw_dets = vec![
            raw([10.123, 20.456, 30.789, 40.001], 0.876_54, 1),
            raw([0.0, 0.0, 5.0, 5.0], 0.2, 0),
            raw([1.0, 2.0, 3.0, 4.0], 0.7, 0),
        ];

        let dets = normalize(&raw_dets, &labels, 0.5).unwrap();

        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].id, 0);
        assert_eq!(dets[0].class_name, "unripe");
        assert_eq!(dets[0].confidence, 0.8765);
        assert_eq!(dets[0].bbox.x1, 10.12);
        assert_eq!(dets[0].bbox.y1, 20.46);
        assert_eq!(dets[0].bbox.x2, 30.79);
        assert_eq!(dets[0].bbox.width, 20.67);
        assert_eq!(dets[0].bbox.height, 19.55);
        // ids follow the filtered order
        assert_eq!(dets[1].id, 1);
        assert_eq!(dets[1].confidence, 0.7);
    }

    #[test]
    fn test_threshold_cut_matches_engine_precision() {
        let labels = ClassLabels::from([(0, "ripe".to_string())]);
        // 0.9f32 sits just below 0.9f64; the engine kept it, so must we
        let raw_dets = vec![raw([0.0, 0.0, 1.0, 1.0], 0.9, 0)];

        let dets = normalize(&raw_dets, &labels, 0.9).unwrap();
        assert_eq!(dets.len(), 1);
    }

    #[test]
    fn test_artifact_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let artifact = ScopedArtifact::create(dir.path(), ".jpg", b"abc").unwrap();
            assert_eq!(std::fs::read(artifact.path()).unwrap(), b"abc");
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
