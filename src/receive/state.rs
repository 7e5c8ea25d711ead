use crate::common::TransferSettings;
use crate::receive::store::UploadStore;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Receive-side application state shared by every connection of a session.
#[derive(Clone)]
pub struct ReceiveAppState {
    pub store: Arc<UploadStore>,
    pub config: TransferSettings,
    /// Files currently being written, keyed per upload, valued by partial path.
    pub in_flight: Arc<DashMap<Uuid, PathBuf>>,
    /// Cancelled when a stopping server gives up waiting on uploads.
    pub cancel: CancellationToken,
}

impl ReceiveAppState {
    pub fn new(store: Arc<UploadStore>, config: TransferSettings) -> Self {
        Self {
            store,
            config,
            in_flight: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        self.store.upload_dir()
    }

    pub fn transfer_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Register a partial file. The entry disappears when the guard drops.
    pub fn track(&self, path: PathBuf) -> InFlightGuard {
        let id = Uuid::new_v4();
        self.in_flight.insert(id, path);
        InFlightGuard {
            id,
            in_flight: self.in_flight.clone(),
        }
    }

    /// Delete partial files whose uploads never unregistered.
    pub async fn cleanup(&self) {
        let count = self.in_flight.len();
        if count == 0 {
            return;
        }
        tracing::debug!("Cleaning up {} abandoned upload(s)", count);

        let keys: Vec<Uuid> = self.in_flight.iter().map(|entry| *entry.key()).collect();

        let cleanup_tasks: Vec<_> = keys
            .into_iter()
            .filter_map(|key| self.in_flight.remove(&key))
            .map(|(_id, path)| {
                tokio::spawn(async move {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => tracing::debug!(path = %path.display(), "Removed abandoned upload"),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => tracing::error!(
                            path = %path.display(),
                            error = %e,
                            "Error during upload cleanup"
                        ),
                    }
                })
            })
            .collect();

        futures::future::join_all(cleanup_tasks).await;
    }
}

/// Removes its in-flight entry on drop, including when the handler future
/// is dropped mid-stream.
pub struct InFlightGuard {
    id: Uuid,
    in_flight: Arc<DashMap<Uuid, PathBuf>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}
