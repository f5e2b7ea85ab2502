//! Prediction endpoint

use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::config::SUPPORTED_FORMATS;
use crate::error::{PipelineError, ValidationError};
use crate::pipeline;
use crate::routes::failure;
use crate::state::SharedState;
use crate::validate::{validate, PredictForm, UploadedImage};

/// Body for validation errors, returned with HTTP 200
#[derive(Debug, Serialize)]
pub struct ValidationErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_formats: Option<Vec<&'static str>>,
}

impl From<&ValidationError> for ValidationErrorBody {
    fn from(err: &ValidationError) -> Self {
        let mut body = ValidationErrorBody {
            error: err.to_string(),
            available_models: None,
            supported_formats: None,
        };
        match err {
            ValidationError::UnknownModel { available, .. } => body.available_models = Some(available.clone()),
            ValidationError::UnsupportedFormat { .. } => body.supported_formats = Some(SUPPORTED_FORMATS.to_vec()),
            _ => {}
        }
        body
    }
}

/// Buffer the multipart fields the validator looks at; the first occurrence of each wins
async fn read_form(mut multipart: Multipart) -> Result<PredictForm, MultipartError> {
    let mut form = PredictForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") if form.image.is_none() => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                form.image = Some(UploadedImage {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            Some("model") if form.model.is_none() => form.model = Some(field.text().await?),
            Some("threshold") if form.threshold.is_none() => form.threshold = Some(field.text().await?),
            other => debug!("Ignoring form field {:?}", other),
        }
    }

    Ok(form)
}

/// POST /predict - Run a model on an uploaded image
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    handle_predict(state, multipart)
        .instrument(info_span!("predict", %request_id))
        .await
}

async fn handle_predict(state: SharedState, multipart: Result<Multipart, MultipartRejection>) -> Response {
    let form = match multipart {
        Ok(multipart) => match read_form(multipart).await {
            Ok(form) => form,
            Err(e) => {
                // truncated streams and oversized bodies alike
                error!("Failed to read multipart body ({}): {}", e.status(), e);
                return failure(StatusCode::INTERNAL_SERVER_ERROR, e.body_text());
            }
        },
        Err(rejection) => {
            // not a multipart request at all: nothing was uploaded
            debug!("No multipart body: {}", rejection.body_text());
            PredictForm::default()
        }
    };

    let snapshot = state.registry.snapshot();
    let (request, model) = match validate(form, &snapshot) {
        Ok(validated) => validated,
        Err(e) => {
            info!("Rejected prediction request: {}", e);
            return (StatusCode::OK, Json(ValidationErrorBody::from(&e))).into_response();
        }
    };

    info!(
        "Running '{}' on {} ({} bytes, threshold {:.2})",
        request.model_name,
        request.filename,
        request.image.len(),
        request.threshold
    );

    let upload_dir = state.config.upload_dir();
    let span = Span::current();
    let outcome = tokio::task::spawn_blocking(move || span.in_scope(|| pipeline::run(&request, &model, &upload_dir)))
        .await
        .unwrap_or_else(|e| Err(PipelineError::Worker(e.to_string())));

    match outcome {
        Ok(response) => {
            info!("Prediction finished with {} detections", response.detections_count);
            Json(response).into_response()
        }
        Err(e) => {
            error!("Prediction error: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_body() {
        let err = ValidationError::UnknownModel {
            name: "unknown".to_string(),
            available: vec!["lettuce".to_string()],
        };
        let body = serde_json::to_value(ValidationErrorBody::from(&err)).unwrap();
        assert_eq!(body["error"], "Model 'unknown' not found");
        assert_eq!(body["available_models"], serde_json::json!(["lettuce"]));
        assert!(body.get("supported_formats").is_none());
    }

    #[test]
    fn test_unsupported_format_body() {
        let err = ValidationError::UnsupportedFormat {
            filename: "x.gif".to_string(),
            extension: ".gif".to_string(),
        };
        let body = serde_json::to_value(ValidationErrorBody::from(&err)).unwrap();
        assert_eq!(body["supported_formats"].as_array().unwrap().len(), SUPPORTED_FORMATS.len());
    }

    #[test]
    fn test_plain_error_body() {
        let body = serde_json::to_value(ValidationErrorBody::from(&ValidationError::MissingModel)).unwrap();
        assert_eq!(body, serde_json::json!({"error": "No model specified"}));
    }
}
