//! Detection engine interface
//!
//! The pipeline only sees [`Detector`]; the registry only sees
//! [`ModelLoader`]. Concrete engines live in submodules.

pub mod letterbox;
#[cfg(feature = "with-tch")]
pub mod torchscript;
pub mod yolo;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::DevicePreference;
use crate::error::{DetectorError, LoadError};

/// Class id to label mapping, ordered by id
pub type ClassLabels = BTreeMap<usize, String>;

/// Sidecar file holding class labels, next to the weights file
pub const LABELS_FILE: &str = "classes.json";

/// One detection as reported by the engine, in original image pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

/// Per-call detection parameters
#[derive(Debug, Clone, Copy)]
pub struct DetectOptions {
    /// Minimum confidence for a detection to be returned
    pub confidence: f32,
    /// Long-side size the image is resized to before inference
    pub image_size: u32,
}

/// A loaded detection model.
///
/// `detect` blocks for the whole inference; callers run it off the async
/// workers.
pub trait Detector: Send + Sync {
    /// Run detection on the image stored at `image`
    fn detect(&self, image: &Path, options: &DetectOptions) -> Result<Vec<RawDetection>, DetectorError>;

    /// Class labels for this model
    fn labels(&self) -> &ClassLabels;
}

/// Turns a weights artifact into a [`Detector`].
pub trait ModelLoader: Send + Sync {
    fn load(&self, name: &str, weights: &Path) -> Result<Arc<dyn Detector>, LoadError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelsFile {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

/// Parse class labels from a JSON array or an object keyed by class id
pub fn parse_class_labels(json: &str) -> Result<ClassLabels, String> {
    let parsed: LabelsFile = serde_json::from_str(json).map_err(|e| e.to_string())?;
    let labels = match parsed {
        LabelsFile::List(names) => names.into_iter().enumerate().collect(),
        LabelsFile::Map(entries) => entries
            .into_iter()
            .map(|(id, name)| {
                id.trim()
                    .parse::<usize>()
                    .map(|id| (id, name))
                    .map_err(|_| format!("class id '{}' is not a non-negative integer", id))
            })
            .collect::<Result<ClassLabels, String>>()?,
    };

    if labels.is_empty() {
        return Err("no class labels defined".to_string());
    }
    Ok(labels)
}

/// Read the labels sidecar from a model directory
pub fn read_class_labels(model_dir: &Path) -> Result<ClassLabels, LoadError> {
    let path = model_dir.join(LABELS_FILE);
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| LoadError::Labels(path.clone(), e.to_string()))?;
    parse_class_labels(&contents).map_err(|msg| LoadError::Labels(path, msg))
}

/// Loader used when the crate is built without any detection backend.
pub struct UnavailableBackend;

impl ModelLoader for UnavailableBackend {
    fn load(&self, _name: &str, _weights: &Path) -> Result<Arc<dyn Detector>, LoadError> {
        Err(LoadError::BackendUnavailable)
    }
}

/// The loader for the backend compiled into this build
#[cfg(feature = "with-tch")]
pub fn default_loader(device: DevicePreference) -> Arc<dyn ModelLoader> {
    Arc::new(torchscript::TorchScriptLoader::new(device))
}

/// The loader for the backend compiled into this build
#[cfg(not(feature = "with-tch"))]
pub fn default_loader(device: DevicePreference) -> Arc<dyn ModelLoader> {
    tracing::warn!(
        "Built without a detection backend; device '{}' is ignored and no model will load",
        device
    );
    Arc::new(UnavailableBackend)
}
