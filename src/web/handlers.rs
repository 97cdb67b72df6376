//! HTTP handlers
//!
//! Handlers stay thin and delegate to [`crate::services::ManifestService`].

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;

use super::responses::{handle_error, ErrorResponse, HealthResponse};
use super::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse::healthy())
}

/// Every other path is a filter path ending in a manifest name
pub async fn serve_manifest(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(ErrorResponse::new("Method", format!("{method} is not supported"))),
        )
            .into_response();
    }

    debug!(path = uri.path(), "manifest request");
    match state.manifests.rewrite(uri.path()).await {
        Ok(manifest) => manifest.into_response(),
        Err(error) => handle_error(error),
    }
}
