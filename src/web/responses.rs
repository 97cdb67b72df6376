//! HTTP response types and error mapping
//!
//! Every failure is rendered as the same JSON envelope; the status code is
//! derived from the error kind so clients can branch on it.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, DashError, HlsError};
use crate::services::RewrittenManifest;

/// Error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    /// Filter key for parse errors, error kind otherwise
    pub error: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorResponse {
    pub fn new<E: Into<String>, M: Into<String>>(error: E, message: M) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
        }
    }
}

fn hls_status(error: &HlsError) -> StatusCode {
    match error {
        HlsError::NoSegmentsInRange { .. } => StatusCode::NOT_FOUND,
        HlsError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        HlsError::Decode { .. }
        | HlsError::InvalidUri { .. }
        | HlsError::Deweave { .. }
        | HlsError::LastModified { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn dash_status(error: &DashError) -> StatusCode {
    match error {
        DashError::Encode { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        DashError::Decode { .. } | DashError::MissingRoot | DashError::InvalidUri { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

/// Convert AppError to appropriate HTTP response
pub fn handle_error(error: AppError) -> Response {
    let (status, kind, message) = match &error {
        AppError::Parse(e) => (StatusCode::BAD_REQUEST, e.key.clone(), e.message.clone()),
        AppError::Fetch(e) => (StatusCode::BAD_GATEWAY, "Fetch".to_string(), e.to_string()),
        AppError::Origin { .. } => (StatusCode::BAD_GATEWAY, "Origin".to_string(), error.to_string()),
        AppError::Hls(e) => (hls_status(e), "HLS".to_string(), e.to_string()),
        AppError::Dash(e) => (dash_status(e), "DASH".to_string(), e.to_string()),
        AppError::Configuration { .. } | AppError::Internal { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal".to_string(),
            error.to_string(),
        ),
    };

    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %error, "request failed");
    } else {
        tracing::debug!(status = status.as_u16(), error = %error, "request rejected");
    }

    (status, Json(ErrorResponse::new(kind, message))).into_response()
}

impl IntoResponse for RewrittenManifest {
    fn into_response(self) -> Response {
        let mut response = (
            StatusCode::OK,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response();

        if let Some(value) = self
            .max_age
            .and_then(|age| HeaderValue::from_str(&format!("max-age={age}")).ok())
        {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{FetchError, ParseError};

    #[test]
    fn maps_error_kinds_to_statuses() {
        let cases = [
            (AppError::from(ParseError::new("Bitrate", "bad")), StatusCode::BAD_REQUEST),
            (AppError::from(FetchError::timeout("http://o.test")), StatusCode::BAD_GATEWAY),
            (AppError::origin(404, "http://o.test/a.m3u8"), StatusCode::BAD_GATEWAY),
            (
                AppError::from(HlsError::NoSegmentsInRange {
                    empty_playlist: "#EXTM3U\n".to_string(),
                }),
                StatusCode::NOT_FOUND,
            ),
            (AppError::from(HlsError::decode("x")), StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::from(DashError::MissingRoot), StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(handle_error(error).status(), status);
        }
    }

    #[test]
    fn manifests_carry_cache_hint() {
        let response = RewrittenManifest {
            body: "#EXTM3U\n".to_string(),
            content_type: "application/vnd.apple.mpegurl",
            max_age: Some("3".to_string()),
        }
        .into_response();

        assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=3");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/vnd.apple.mpegurl"
        );
    }
}
