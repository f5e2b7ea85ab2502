//! Error types for the inference service.
//!
//! Each component boundary has its own error enum so failure paths show up
//! in the function signatures rather than as catch-alls. HTTP rendering of
//! these errors lives in `routes`.

use std::path::PathBuf;

use thiserror::Error;

/// Caller-fixable problems with an inbound `/predict` request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// No `image` field, or the uploaded file is empty
    #[error("No image file provided")]
    MissingImage,

    /// No `model` field, or it is blank
    #[error("No model specified")]
    MissingModel,

    /// Threshold did not parse as a float in [0.0, 1.0]
    #[error("Threshold must be between 0.0 and 1.0")]
    InvalidThreshold { raw: String },

    /// Model name is not in the current registry snapshot
    #[error("Model '{name}' not found")]
    UnknownModel { name: String, available: Vec<String> },

    /// Filename is empty or its extension is not on the allow-list
    #[error("{}", unsupported_format_message(.filename, .extension))]
    UnsupportedFormat { filename: String, extension: String },
}

fn unsupported_format_message(filename: &str, extension: &str) -> String {
    if filename.is_empty() {
        "No image file selected".to_string()
    } else {
        format!("Unsupported file format: {}", extension)
    }
}

/// Failures raised by a detection engine.
#[derive(Error, Debug)]
pub enum DetectorError {
    /// The image could not be read or decoded
    #[error("Failed to decode image '{0}': {1}")]
    Decode(PathBuf, String),

    /// The engine itself failed
    #[error("Inference error: {0}")]
    Engine(String),
}

/// Per-model failures while loading weights.
#[derive(Error, Debug)]
pub enum LoadError {
    /// IO error while reading model files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The class-label sidecar is missing or malformed
    #[error("Invalid class labels in '{0}': {1}")]
    Labels(PathBuf, String),

    /// The backend rejected the weights artifact
    #[error("Failed to load weights '{0}': {1}")]
    Weights(PathBuf, String),

    /// No detection backend was compiled in
    #[error("No detection backend available (rebuild with the `with-tch` feature)")]
    BackendUnavailable,
}

/// Registry-level failures that abort a load pass.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The models root exists but could not be listed
    #[error("Failed to read models directory '{path}': {source}")]
    ReadRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures inside the inference pipeline, after validation succeeded.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The uploaded bytes could not be staged on disk
    #[error("Failed to stage uploaded image: {0}")]
    Artifact(#[from] std::io::Error),

    /// The detection call failed
    #[error(transparent)]
    Detection(#[from] DetectorError),

    /// The engine returned a class id missing from the model's labels
    #[error("Model returned unknown class id {class_id}")]
    UnknownClass { class_id: usize },

    /// The blocking worker running the pipeline did not complete
    #[error("Inference worker failed: {0}")]
    Worker(String),
}
