//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub available_models: Vec<String>,
    pub total_models: usize,
    pub uptime_seconds: u64,
    pub version: String,
    /// RFC 3339 time of the last load pass
    pub last_reload: Option<String>,
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let snapshot = state.registry.snapshot();
    Json(HealthResponse {
        status: "healthy".to_string(),
        available_models: snapshot.names(),
        total_models: snapshot.len(),
        uptime_seconds: state.uptime_seconds(),
        version: crate::VERSION.to_string(),
        last_reload: snapshot.loaded_at().map(|t| t.to_rfc3339()),
    })
}
