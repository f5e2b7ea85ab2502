//! Model registry
//!
//! Owns the mapping from model name to loaded model. The mapping is held as
//! an immutable [`RegistrySnapshot`] behind an `Arc`; a reload builds a new
//! snapshot off to the side and publishes it with a single pointer swap, so
//! readers see either the old or the new set of models, never a mix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::detector::{ClassLabels, DetectOptions, Detector, ModelLoader, RawDetection};
use crate::error::{DetectorError, RegistryError};

/// A named, loaded detection model
pub struct Model {
    name: String,
    weights: PathBuf,
    detector: Arc<dyn Detector>,
}

impl Model {
    pub fn new(name: impl Into<String>, weights: impl Into<PathBuf>, detector: Arc<dyn Detector>) -> Self {
        Self {
            name: name.into(),
            weights: weights.into(),
            detector,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weights(&self) -> &Path {
        &self.weights
    }

    pub fn labels(&self) -> &ClassLabels {
        self.detector.labels()
    }

    /// Run the underlying detector
    pub fn detect(&self, image: &Path, options: &DetectOptions) -> Result<Vec<RawDetection>, DetectorError> {
        self.detector.detect(image, options)
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("weights", &self.weights)
            .field("classes", &self.labels().len())
            .finish()
    }
}

/// Why a model directory was skipped during a load pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadWarningKind {
    MissingWeights,
    LoadFailed,
}

/// A non-fatal, per-model problem recorded during a load pass
#[derive(Clone, Debug, Serialize)]
pub struct LoadWarning {
    pub model: String,
    pub kind: LoadWarningKind,
    pub message: String,
}

/// Model name and its class labels, for introspection
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSummary {
    pub name: String,
    pub classes: Vec<String>,
}

/// The complete set of models at one point in time
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    models: BTreeMap<String, Arc<Model>>,
    warnings: Vec<LoadWarning>,
    loaded_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<Arc<Model>> {
        self.models.get(name).cloned()
    }

    /// Model names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    /// Directories skipped during the pass that built this snapshot
    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    /// When this snapshot was built; `None` before the first load
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

/// Registry of models discovered under a root directory
pub struct ModelRegistry {
    root: PathBuf,
    weights_file: String,
    loader: Arc<dyn ModelLoader>,
    current: RwLock<Arc<RegistrySnapshot>>,
    /// Serializes load passes
    reload_lock: Mutex<()>,
}

impl ModelRegistry {
    /// Create an empty registry; call [`ModelRegistry::load`] to populate it
    pub fn new(root: impl Into<PathBuf>, weights_file: impl Into<String>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            root: root.into(),
            weights_file: weights_file.into(),
            loader,
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            reload_lock: Mutex::new(()),
        }
    }

    /// The currently published snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Look a model up by name in the current snapshot
    pub fn lookup(&self, name: &str) -> Option<Arc<Model>> {
        self.snapshot().get(name)
    }

    /// Names and class labels of every loaded model, sorted by name
    pub fn list(&self) -> Vec<ModelSummary> {
        self.snapshot()
            .models()
            .map(|model| ModelSummary {
                name: model.name().to_string(),
                classes: model.labels().values().cloned().collect(),
            })
            .collect()
    }

    /// Scan the root directory and publish a fresh snapshot.
    ///
    /// Blocking; run it on a blocking thread from async code. Directories
    /// that cannot be loaded are recorded as warnings and skipped. A missing
    /// root publishes an empty snapshot.
    pub fn load(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        let _guard = self.reload_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let snapshot = Arc::new(self.scan()?);
        info!("Total models loaded: {}", snapshot.len());

        *self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot.clone();
        Ok(snapshot)
    }

    /// Replace the registry with whatever is on disk now; never merges
    pub fn reload(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        info!("Reloading models from {:?}", self.root);
        self.load()
    }

    fn scan(&self) -> Result<RegistrySnapshot, RegistryError> {
        let mut snapshot = RegistrySnapshot {
            loaded_at: Some(Utc::now()),
            ..RegistrySnapshot::default()
        };

        if !self.root.is_dir() {
            warn!("Models directory {:?} not found", self.root);
            return Ok(snapshot);
        }

        let read_root = |source: std::io::Error| RegistryError::ReadRoot {
            path: self.root.clone(),
            source,
        };
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(read_root)? {
            let path = entry.map_err(read_root)?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();

        for dir in dirs {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                warn!("Skipping model directory with non UTF-8 name: {:?}", dir);
                continue;
            };

            let weights = dir.join(&self.weights_file);
            if !weights.is_file() {
                warn!("No {} found in {}", self.weights_file, name);
                snapshot.warnings.push(LoadWarning {
                    message: format!("No {} found in {}", self.weights_file, name),
                    model: name,
                    kind: LoadWarningKind::MissingWeights,
                });
                continue;
            }

            match self.loader.load(&name, &weights) {
                Ok(detector) => {
                    info!("Loaded model: {} ({} classes)", name, detector.labels().len());
                    let model = Arc::new(Model::new(name.clone(), weights, detector));
                    snapshot.models.insert(name, model);
                }
                Err(e) => {
                    warn!("Failed to load model {}: {}", name, e);
                    snapshot.warnings.push(LoadWarning {
                        message: e.to_string(),
                        model: name,
                        kind: LoadWarningKind::LoadFailed,
                    });
                }
            }
        }

        Ok(snapshot)
    }
}
