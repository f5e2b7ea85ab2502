//! Model listing and reload endpoints

use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info};

use crate::registry::LoadWarning;
use crate::routes::failure;
use crate::state::SharedState;

/// Classes of one model
#[derive(Serialize)]
pub struct ModelInfo {
    pub classes: Vec<String>,
    pub class_count: usize,
}

/// Response for listing models
#[derive(Serialize)]
pub struct ModelsResponse {
    pub available_models: BTreeMap<String, ModelInfo>,
    pub total_models: usize,
}

/// Response after a successful reload
#[derive(Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub message: String,
    pub loaded_models: Vec<String>,
    pub total_models: usize,
    /// Directories skipped during the reload
    pub warnings: Vec<LoadWarning>,
}

/// GET /models - List loaded models and their classes
pub async fn list_models(State(state): State<SharedState>) -> Json<ModelsResponse> {
    let available_models: BTreeMap<String, ModelInfo> = state
        .registry
        .list()
        .into_iter()
        .map(|summary| {
            let info = ModelInfo {
                class_count: summary.classes.len(),
                classes: summary.classes,
            };
            (summary.name, info)
        })
        .collect();

    Json(ModelsResponse {
        total_models: available_models.len(),
        available_models,
    })
}

/// POST /reload-models - Rescan the models directory
pub async fn reload_models(State(state): State<SharedState>) -> Response {
    let reload_state = state.clone();
    let result = tokio::task::spawn_blocking(move || reload_state.registry.reload()).await;

    match result {
        Ok(Ok(snapshot)) => {
            info!("Reload finished with {} models", snapshot.len());
            Json(ReloadResponse {
                success: true,
                message: "Models reloaded successfully".to_string(),
                loaded_models: snapshot.names(),
                total_models: snapshot.len(),
                warnings: snapshot.warnings().to_vec(),
            })
            .into_response()
        }
        Ok(Err(e)) => {
            error!("Model reload failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!("Model reload task failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, format!("Reload task failed: {}", e))
        }
    }
}
