//! Error types for session startup and HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::PathBuf;

/// Reasons a receive session could not be started.
///
/// Every variant is surfaced to the front-end as a single `error` string.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("No usable network connection found. Connect to Wi-Fi first.")]
    NoNetwork,

    #[error("No free port available (tried {attempts} port(s) starting at {port})")]
    PortUnavailable { port: u16, attempts: u32 },

    #[error("Upload directory {} is not usable: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Failed to start server: {0}")]
    Server(String),

    #[error("Failed to build pairing code: {0}")]
    Pairing(String),
}

/// Handler-level failures returned to the uploading device.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        (
            status,
            Json(json!({
                "success": false,
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}
