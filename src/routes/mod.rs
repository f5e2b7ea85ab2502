//! HTTP routes

pub mod health;
pub mod models;
pub mod predict;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Body for server-side failures
#[derive(Debug, Serialize)]
pub struct FailureBody {
    pub success: bool,
    pub error: String,
}

/// Render a failure as `{success: false, error}` with the given status
pub(crate) fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(FailureBody {
            success: false,
            error: error.into(),
        }),
    )
        .into_response()
}

/// Build the application router
pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health::health_check))
        .route("/predict", post(predict::predict))
        .route("/models", get(models::list_models))
        .route("/reload-models", post(models::reload_models))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
