//! Request validation for `/predict`.
//!
//! Pure checks over already-buffered form fields and a registry snapshot;
//! runs before any file is written or any model is invoked.

use std::path::Path;
use std::sync::Arc;

use crate::config::{DEFAULT_THRESHOLD, SUPPORTED_FORMATS};
use crate::error::ValidationError;
use crate::registry::{Model, RegistrySnapshot};

/// An uploaded file as received in the multipart body
#[derive(Debug, Clone, Default)]
pub struct UploadedImage {
    /// Client-declared filename, empty if none was sent
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Raw `/predict` form fields
#[derive(Debug, Clone, Default)]
pub struct PredictForm {
    pub image: Option<UploadedImage>,
    pub model: Option<String>,
    pub threshold: Option<String>,
}

/// A fully validated inference request
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub image: Vec<u8>,
    pub filename: String,
    /// Lowercase dotted extension, e.g. `.jpg`
    pub extension: String,
    pub model_name: String,
    pub threshold: f64,
}

/// Lowercase dotted extension of a filename, or empty if it has none
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Parse a threshold field; absent means [`DEFAULT_THRESHOLD`].
///
/// The range check runs at full precision so values just past 1.0 do not
/// round into range.
pub fn parse_threshold(raw: Option<&str>) -> Result<f64, ValidationError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_THRESHOLD);
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if (0.0..=1.0).contains(&value) => Ok(value),
        _ => Err(ValidationError::InvalidThreshold { raw: raw.to_string() }),
    }
}

/// Validate a form against a registry snapshot.
///
/// Checks run in a fixed order and stop at the first failure: image, model
/// name, threshold, model lookup, file format.
pub fn validate(form: PredictForm, registry: &RegistrySnapshot) -> Result<(InferenceRequest, Arc<Model>), ValidationError> {
    let image = match form.image {
        Some(image) if !image.bytes.is_empty() => image,
        _ => return Err(ValidationError::MissingImage),
    };

    // looked up verbatim; only a blank name counts as missing
    let model_name = match form.model {
        Some(name) if !name.trim().is_empty() => name,
        _ => return Err(ValidationError::MissingModel),
    };

    let threshold = parse_threshold(form.threshold.as_deref())?;

    let model = registry.get(&model_name).ok_or_else(|| ValidationError::UnknownModel {
        name: model_name.clone(),
        available: registry.names(),
    })?;

    let extension = file_extension(&image.filename);
    if image.filename.trim().is_empty() || !SUPPORTED_FORMATS.contains(&extension.as_str()) {
        return Err(ValidationError::UnsupportedFormat {
            filename: image.filename,
            extension,
        });
    }

    Ok((
        InferenceRequest {
            image: image.bytes,
            filename: image.filename,
            extension,
            model_name,
            threshold,
        },
        model,
    ))
}
