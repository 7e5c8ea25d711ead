//! Router definitions for the phone-facing server.

use crate::{
    receive::{self, ReceiveAppState},
    ui::web,
};
use axum::{extract::DefaultBodyLimit, routing::*, Router};

/// Build the router phones talk to: upload page, upload sink, local status.
pub fn create_upload_router(state: &ReceiveAppState) -> Router {
    Router::new()
        .route("/", get(|| async { web::serve_upload_page() }))
        .route("/upload", post(receive::handlers::upload_handler))
        .route("/status", get(receive::handlers::status_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(state.clone())
        .layer(body_limit(state.config.max_request_bytes))
}

// Uploads stream to disk, so the default 2MB extractor cap would only get in the way.
fn body_limit(max_request_bytes: Option<u64>) -> DefaultBodyLimit {
    match max_request_bytes {
        Some(limit) => DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX)),
        None => DefaultBodyLimit::disable(),
    }
}
