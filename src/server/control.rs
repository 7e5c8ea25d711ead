//! Loopback RPC surface a desktop front-end drives the supervisor through.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::common::StartError;
use crate::pairing::PairingInfo;
use crate::receive::StatusSnapshot;
use crate::server::ServerSupervisor;

/// Reply to `start_server`. Either the pairing fields or `error` are set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "qrCode", default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartResponse {
    pub fn started(info: &PairingInfo) -> Self {
        Self {
            success: true,
            url: Some(info.url.clone()),
            qr_code: Some(info.qr_code.clone()),
            ip: Some(info.ip.to_string()),
            port: Some(info.port),
            error: None,
        }
    }

    pub fn failed(err: &StartError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            ..Self::default()
        }
    }
}

pub fn create_control_router(supervisor: Arc<ServerSupervisor>) -> Router {
    Router::new()
        .route("/start_server", post(start_server))
        .route("/stop_server", post(stop_server))
        .route("/get_server_status", get(get_server_status))
        .route("/health", get(|| async { "OK" }))
        .with_state(supervisor)
}

async fn start_server(State(supervisor): State<Arc<ServerSupervisor>>) -> Json<StartResponse> {
    Json(supervisor.start().await)
}

async fn stop_server(State(supervisor): State<Arc<ServerSupervisor>>) -> Json<()> {
    supervisor.stop().await;
    Json(())
}

async fn get_server_status(State(supervisor): State<Arc<ServerSupervisor>>) -> Json<StatusSnapshot> {
    Json(supervisor.status())
}

/// Serve the control API on loopback until `shutdown` resolves, then stop
/// any running transfer server.
pub async fn serve_control<F>(supervisor: Arc<ServerSupervisor>, port: u16, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = std::net::TcpListener::bind(addr)
        .with_context(|| format!("Failed to bind control API on {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("Failed to configure control listener")?;

    let app = create_control_router(supervisor.clone());
    let handle = axum_server::Handle::new();

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        signal_handle.graceful_shutdown(Some(Duration::from_secs(1)));
    });

    tracing::info!(%addr, "Control API listening");
    axum_server::from_tcp(listener)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .context("Control API failed")?;

    supervisor.stop().await;
    tracing::info!("Control API stopped");
    Ok(())
}
