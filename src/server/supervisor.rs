//! Owns at most one running transfer server and its session.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tokio::sync::Mutex;

use crate::common::{AppConfig, StartError};
use crate::network::{bind_listener, AddressResolver, FixedResolver, SystemResolver};
use crate::pairing::{build_pairing_info, PairingInfo};
use crate::receive::{prepare_upload_dir, ReceiveAppState, StatusSnapshot, UploadStore};
use crate::server::control::StartResponse;
use crate::server::routes;
use crate::server::runtime::{start_local_server, RunningServer, ServerPhase, ShutdownResult};

/// A live server together with the pairing info it was started with.
pub struct ServerSession {
    pub info: PairingInfo,
    pub started_at: SystemTime,
    pub store: Arc<UploadStore>,
    server: RunningServer,
}

impl ServerSession {
    pub fn phase(&self) -> ServerPhase {
        self.server.phase()
    }
}

pub struct ServerSupervisor {
    config: AppConfig,
    resolver: Arc<dyn AddressResolver>,
    // Serializes start and stop
    session: Mutex<Option<ServerSession>>,
    // Read by status without waiting on a start or stop in progress
    active_store: RwLock<Option<Arc<UploadStore>>>,
}

impl ServerSupervisor {
    pub fn new(config: AppConfig) -> Self {
        let resolver: Arc<dyn AddressResolver> = match config.advertise_ip {
            Some(ip) => Arc::new(FixedResolver(Some(ip))),
            None => Arc::new(SystemResolver),
        };
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(config: AppConfig, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            config,
            resolver,
            session: Mutex::new(None),
            active_store: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start a server, or report the one already running.
    pub async fn start(&self) -> StartResponse {
        match self.try_start().await {
            Ok(info) => StartResponse::started(&info),
            Err(e) => {
                tracing::error!(error = %e, "Failed to start receive server");
                StartResponse::failed(&e)
            }
        }
    }

    pub async fn try_start(&self) -> Result<PairingInfo, StartError> {
        let mut current = self.session.lock().await;

        if let Some(session) = current.as_ref() {
            tracing::debug!(url = %session.info.url, "Server already running");
            return Ok(session.info.clone());
        }

        let session = self.open_session().await?;
        let info = session.info.clone();

        self.set_active_store(Some(session.store.clone()));
        *current = Some(session);

        tracing::info!(url = %info.url, "Receive server started");
        Ok(info)
    }

    async fn open_session(&self) -> Result<ServerSession, StartError> {
        let ip = self.resolver.resolve()?;
        let upload_dir = self.config.upload_dir();
        let prepared = prepare_upload_dir(&upload_dir)?;

        match self.launch(ip, upload_dir).await {
            Ok(session) => Ok(session),
            Err(e) => {
                prepared.rollback();
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        ip: std::net::Ipv4Addr,
        upload_dir: PathBuf,
    ) -> Result<ServerSession, StartError> {
        let listener = bind_listener(self.config.bind, self.config.port, self.config.port_retries)?;
        let port = listener.local_addr().map_err(StartError::Bind)?.port();

        let info = build_pairing_info(ip, port)?;

        let store = Arc::new(UploadStore::new(upload_dir));
        let state = ReceiveAppState::new(store.clone(), self.config.transfer);
        let app = routes::create_upload_router(&state);

        let server = start_local_server(app, listener, state).await?;

        Ok(ServerSession {
            info,
            started_at: SystemTime::now(),
            store,
            server,
        })
    }

    /// Stop the running server. A no-op when nothing is running.
    pub async fn stop(&self) {
        let mut current = self.session.lock().await;

        let Some(session) = current.take() else {
            tracing::debug!("Stop requested with no server running");
            return;
        };
        self.set_active_store(None);

        let ServerSession {
            info,
            started_at,
            store,
            server,
        } = session;

        tracing::info!(url = %info.url, "Stopping receive server");
        if let ShutdownResult::Forced { abandoned } =
            server.shutdown(self.config.grace_period()).await
        {
            tracing::warn!("Abandoned {} upload(s) on stop", abandoned);
        }

        let snapshot = store.snapshot();
        let uptime = started_at.elapsed().unwrap_or_default();
        tracing::info!(
            received = snapshot.received_count,
            bytes = snapshot.total_size,
            uptime_secs = uptime.as_secs(),
            "Receive server stopped"
        );
    }

    /// Counters of the current session, zeroed while stopped.
    pub fn status(&self) -> StatusSnapshot {
        match self.active_store() {
            Some(store) => store.snapshot(),
            None => StatusSnapshot::idle(&self.config.upload_dir()),
        }
    }

    pub async fn session_info(&self) -> Option<PairingInfo> {
        self.session.lock().await.as_ref().map(|s| s.info.clone())
    }

    pub async fn phase(&self) -> ServerPhase {
        self.session
            .lock()
            .await
            .as_ref()
            .map(ServerSession::phase)
            .unwrap_or(ServerPhase::Stopped)
    }

    fn active_store(&self) -> Option<Arc<UploadStore>> {
        match self.active_store.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_active_store(&self, store: Option<Arc<UploadStore>>) {
        match self.active_store.write() {
            Ok(mut guard) => *guard = store,
            Err(poisoned) => *poisoned.into_inner() = store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::BindScope;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AppConfig {
        AppConfig {
            port: 0,
            bind: BindScope::Loopback,
            upload_dir: Some(dir.path().join("inbox")),
            grace_period_secs: 1,
            ..AppConfig::default()
        }
    }

    fn supervisor(dir: &TempDir) -> ServerSupervisor {
        ServerSupervisor::with_resolver(
            config(dir),
            Arc::new(FixedResolver(Some(Ipv4Addr::LOCALHOST))),
        )
    }

    #[tokio::test]
    async fn status_is_idle_before_start() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);

        let status = sup.status();
        assert_eq!(status.received_count, 0);
        assert_eq!(status.total_size, 0);
        assert_eq!(
            status.upload_dir,
            dir.path().join("inbox").display().to_string()
        );
        assert_eq!(sup.phase().await, ServerPhase::Stopped);
    }

    #[tokio::test]
    async fn start_twice_returns_same_session() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);

        let first = sup.try_start().await.unwrap();
        let second = sup.try_start().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(sup.phase().await, ServerPhase::Running);
        assert!(dir.path().join("inbox").is_dir());

        sup.stop().await;
        assert_eq!(sup.phase().await, ServerPhase::Stopped);
        assert!(sup.session_info().await.is_none());
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);

        sup.stop().await;
        sup.stop().await;

        assert_eq!(sup.status().received_count, 0);
    }

    #[tokio::test]
    async fn missing_network_fails_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let sup = ServerSupervisor::with_resolver(config(&dir), Arc::new(FixedResolver(None)));

        let response = sup.start().await;

        assert!(!response.success);
        assert!(response.error.unwrap().contains("No usable network"));
        assert!(response.url.is_none());
        assert!(!dir.path().join("inbox").exists());
        assert_eq!(sup.phase().await, ServerPhase::Stopped);
    }
}
