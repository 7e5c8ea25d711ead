//! Runtime lifecycle: spawn the accept loop, drain uploads, and shut down.

use crate::common::StartError;
use crate::receive::ReceiveAppState;
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const FORCE_TIMEOUT: Duration = Duration::from_secs(2);
const DRAIN_POLL: Duration = Duration::from_millis(250);

/// Lifecycle of one transfer server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownResult {
    Completed,
    Forced { abandoned: usize },
}

/// A spawned server plus everything needed to stop it.
pub struct RunningServer {
    handle: axum_server::Handle,
    task: Option<JoinHandle<()>>,
    state: ReceiveAppState,
    phase: watch::Sender<ServerPhase>,
    local_addr: SocketAddr,
}

/// Spawns the accept loop on an already bound listener and waits until it
/// is accepting. The listener is closed if the server never comes up.
pub async fn start_local_server(
    app: Router,
    listener: std::net::TcpListener,
    state: ReceiveAppState,
) -> Result<RunningServer, StartError> {
    let (phase, _) = watch::channel(ServerPhase::Starting);
    let local_addr = listener.local_addr().map_err(StartError::Bind)?;

    // Spawn HTTP server in background
    let handle = axum_server::Handle::new();
    let server_handle = handle.clone();

    let task = tokio::spawn(async move {
        if let Err(e) = axum_server::from_tcp(listener)
            .handle(server_handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
        {
            tracing::error!(error = %e, "Server error");
        }
    });

    match tokio::time::timeout(READY_TIMEOUT, handle.listening()).await {
        Ok(Some(addr)) => tracing::debug!(%addr, "Accept loop running"),
        Ok(None) | Err(_) => {
            handle.shutdown();
            task.abort();
            return Err(StartError::Server(
                "server did not start listening".to_string(),
            ));
        }
    }

    phase.send_replace(ServerPhase::Running);

    Ok(RunningServer {
        handle,
        task: Some(task),
        state,
        phase,
        local_addr,
    })
}

impl RunningServer {
    pub fn phase(&self) -> ServerPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ServerPhase> {
        self.phase.subscribe()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &ReceiveAppState {
        &self.state
    }

    /// Stop accepting, give in-flight uploads `grace` to finish, then cancel
    /// whatever is left and close every connection. Never waits longer than
    /// `grace` plus a short fixed bound.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownResult {
        self.phase.send_replace(ServerPhase::Stopping);

        // Stop accepting new connections; idle keep-alive connections close now
        self.handle.graceful_shutdown(None);
        tracing::info!("Server stopped accepting new connections");

        let Some(mut task) = self.task.take() else {
            self.phase.send_replace(ServerPhase::Stopped);
            return ShutdownResult::Completed;
        };

        let result = wait_for_transfers(&mut task, &self.state, grace).await;

        match result {
            ShutdownResult::Completed => {
                tracing::info!("All uploads completed");
            }
            ShutdownResult::Forced { abandoned } => {
                tracing::warn!("Forced shutdown with {} upload(s) in progress", abandoned);
                self.state.cancel.cancel();
                self.handle.shutdown();

                if tokio::time::timeout(FORCE_TIMEOUT, &mut task).await.is_err() {
                    tracing::error!("Server task did not exit, aborting");
                    task.abort();
                }
            }
        }

        // Partial files of uploads that never unregistered
        self.state.cleanup().await;

        self.phase.send_replace(ServerPhase::Stopped);
        tracing::info!("Server shutdown complete");
        result
    }
}

/// Wait for the drained server task to exit, or give up after `grace`.
async fn wait_for_transfers(
    task: &mut JoinHandle<()>,
    state: &ReceiveAppState,
    grace: Duration,
) -> ShutdownResult {
    let deadline = tokio::time::Instant::now() + grace;
    let mut last_count = state.transfer_count();

    loop {
        tokio::select! {
            joined = &mut *task => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Server task failed");
                }
                return ShutdownResult::Completed;
            }

            _ = tokio::time::sleep_until(deadline) => {
                return ShutdownResult::Forced {
                    abandoned: state.transfer_count(),
                };
            }

            // Poll transfer status
            _ = tokio::time::sleep(DRAIN_POLL) => {
                let current_count = state.transfer_count();
                if current_count != last_count {
                    tracing::info!("{} upload(s) remaining...", current_count);
                    last_count = current_count;
                }
            }
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if self.task.is_some() {
            tracing::debug!("Server dropped without shutdown, closing connections");
            self.state.cancel.cancel();
            self.handle.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TransferSettings;
    use crate::network::{bind_listener, BindScope};
    use crate::receive::UploadStore;
    use axum::routing::get;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn make_state(dir: &TempDir) -> ReceiveAppState {
        ReceiveAppState::new(
            Arc::new(UploadStore::new(dir.path().to_path_buf())),
            TransferSettings::default(),
        )
    }

    async fn spawn(app: Router, state: ReceiveAppState) -> RunningServer {
        let listener = bind_listener(BindScope::Loopback, 0, 0).expect("bind");
        start_local_server(app, listener, state)
            .await
            .expect("server should start")
    }

    #[tokio::test]
    async fn started_server_is_running() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let server = spawn(Router::new(), state).await;

        assert_eq!(server.phase(), ServerPhase::Running);
        assert_ne!(server.local_addr().port(), 0);
        server.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn shutdown_completes_when_no_uploads_remain() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let server = spawn(Router::new(), state).await;
        let addr = server.local_addr();
        let mut phase = server.subscribe_phase();

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            server.shutdown(Duration::from_secs(5)),
        )
        .await
        .expect("shutdown should not wait for the grace period");

        assert_eq!(result, ShutdownResult::Completed);
        assert_eq!(*phase.borrow_and_update(), ServerPhase::Stopped);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_forces_stuck_uploads_after_grace() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let route_state = state.clone();
        let route_path = dir.path().join("stuck.bin");
        let app = Router::new().route(
            "/hang",
            get(move || {
                let state = route_state.clone();
                let path = route_path.clone();
                async move {
                    let _tracked = state.track(path);
                    std::future::pending::<&'static str>().await
                }
            }),
        );
        let server = spawn(app, state.clone()).await;

        let mut client = tokio::net::TcpStream::connect(server.local_addr())
            .await
            .unwrap();
        client
            .write_all(b"GET /hang HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        for _ in 0..50 {
            if state.transfer_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state.transfer_count(), 1);

        let started = std::time::Instant::now();
        let result = server.shutdown(Duration::from_millis(200)).await;

        assert_eq!(result, ShutdownResult::Forced { abandoned: 1 });
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(state.cancel.is_cancelled());
        assert_eq!(state.transfer_count(), 0);
    }
}
