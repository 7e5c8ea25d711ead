//! HTTP handlers for phone uploads and the local status endpoint.

use std::net::SocketAddr;
use std::time::SystemTime;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{ConnectInfo, Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::AppError;
use crate::receive::state::ReceiveAppState;
use crate::receive::storage::{StoredFile, UploadSink};
use crate::receive::store::{StatusSnapshot, UploadRecord};
use crate::utils::security;

/// One file written during an upload request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedFile {
    pub name: String,
    pub stored_as: String,
    pub size: u64,
    pub sha256: String,
}

/// One file that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub name: String,
    pub error: String,
}

/// Per-file outcome of `POST /upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub files: Vec<SavedFile>,
    pub failed: Vec<FailedFile>,
}

enum FieldError {
    /// Disk side failed; only this file is affected.
    Write(anyhow::Error),
    /// The request body broke off or is malformed.
    Stream(MultipartError),
    Cancelled,
}

fn shutting_down() -> AppError {
    AppError::Unavailable("Server is shutting down".to_string())
}

fn malformed(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge(format!("Upload too large: {}", e.body_text()));
    }
    AppError::BadRequest(format!("Malformed upload: {}", e.body_text()))
}

/// Stream every file field of a multipart request into the upload directory.
pub async fn upload_handler(
    State(state): State<ReceiveAppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut saved: Vec<SavedFile> = Vec::new();
    let mut failed: Vec<FailedFile> = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => return Err(shutting_down()),
            next = multipart.next_field() => next,
        };
        let Some(mut field) = next.map_err(malformed)? else {
            break;
        };

        // Unread field data is skipped by the next `next_field` call.
        let Some(client_name) = field.file_name().map(str::to_owned) else {
            tracing::debug!(field = ?field.name(), "Skipping non-file form field");
            continue;
        };

        let name = security::sanitize_filename(&client_name)
            .unwrap_or_else(|| format!("file_{}", Uuid::new_v4()));

        match receive_file(&state, &name, &mut field).await {
            Ok(stored) => {
                let stored_as = stored
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone());

                saved.push(SavedFile {
                    name: client_name.clone(),
                    stored_as,
                    size: stored.size,
                    sha256: stored.sha256.clone(),
                });
                state.store.record(UploadRecord {
                    original_name: client_name,
                    stored_path: stored.path,
                    size: stored.size,
                    received_at: SystemTime::now(),
                    sha256: stored.sha256,
                });
            }
            Err(FieldError::Write(e)) => {
                let error = format!("{e:#}");
                tracing::warn!(name = %client_name, %error, "Upload failed, file discarded");
                failed.push(FailedFile {
                    name: client_name,
                    error,
                });
            }
            Err(FieldError::Stream(e)) => {
                tracing::info!(name = %client_name, error = %e, "Upload stream interrupted, file discarded");
                return Err(malformed(e));
            }
            Err(FieldError::Cancelled) => {
                tracing::info!(name = %client_name, "Upload cancelled by shutdown");
                return Err(shutting_down());
            }
        }
    }

    if saved.is_empty() && failed.is_empty() {
        return Err(AppError::BadRequest("No files in upload".to_string()));
    }

    let total = saved.len() + failed.len();
    let (status, message) = if failed.is_empty() {
        (StatusCode::OK, format!("Received {} file(s)", saved.len()))
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Received {} of {} file(s)", saved.len(), total),
        )
    };

    Ok((
        status,
        Json(UploadResponse {
            success: failed.is_empty(),
            message,
            files: saved,
            failed,
        }),
    ))
}

/// Write one field to disk chunk by chunk. Any failure removes the partial file.
async fn receive_file(
    state: &ReceiveAppState,
    name: &str,
    field: &mut Field<'_>,
) -> Result<StoredFile, FieldError> {
    let mut sink = UploadSink::create(state.upload_dir(), name, state.config.chunk_size)
        .await
        .map_err(FieldError::Write)?;
    let _tracked = state.track(sink.path().to_path_buf());

    loop {
        let chunk = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => {
                discard(&mut sink).await;
                return Err(FieldError::Cancelled);
            }
            chunk = field.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                if let Err(e) = sink.write_chunk(&bytes).await {
                    discard(&mut sink).await;
                    return Err(FieldError::Write(e));
                }
            }
            Ok(None) => break,
            Err(e) => {
                discard(&mut sink).await;
                return Err(FieldError::Stream(e));
            }
        }
    }

    match sink.finalize().await {
        Ok(stored) => Ok(stored),
        Err(e) => {
            discard(&mut sink).await;
            Err(FieldError::Write(e))
        }
    }
}

async fn discard(sink: &mut UploadSink) {
    if let Err(e) = sink.discard().await {
        tracing::warn!(path = %sink.path().display(), error = %e, "Failed to remove partial upload");
    }
}

/// Counters for the local front-end. Refused for anything but loopback peers.
pub async fn status_handler(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<ReceiveAppState>,
) -> Result<Json<StatusSnapshot>, AppError> {
    if !peer.ip().is_loopback() {
        tracing::debug!(%peer, "Status request from remote peer refused");
        return Err(AppError::Forbidden(
            "Status is only available on this machine".to_string(),
        ));
    }

    Ok(Json(state.store.snapshot()))
}
