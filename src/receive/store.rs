//! In-memory ledger of files received during one session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

/// One received file. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub original_name: String,
    pub stored_path: PathBuf,
    pub size: u64,
    pub received_at: SystemTime,
    pub sha256: String,
}

/// Read-only view polled by the front-end.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub received_count: u64,
    pub total_size: u64,
    pub upload_dir: String,
}

impl StatusSnapshot {
    /// Counters for a stopped supervisor.
    pub fn idle(upload_dir: &Path) -> Self {
        Self {
            received_count: 0,
            total_size: 0,
            upload_dir: upload_dir.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Default)]
struct Ledger {
    records: Vec<UploadRecord>,
    total_size: u64,
}

/// Ledger plus aggregate counters, guarded by a single mutex so a snapshot
/// never mixes the before and after of one append.
pub struct UploadStore {
    upload_dir: PathBuf,
    ledger: Mutex<Ledger>,
}

impl UploadStore {
    pub fn new(upload_dir: PathBuf) -> Self {
        Self {
            upload_dir,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Upload ledger lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Append a completed upload and bump the counters.
    pub fn record(&self, record: UploadRecord) {
        let mut ledger = self.lock();
        ledger.total_size = ledger.total_size.saturating_add(record.size);
        tracing::info!(
            name = %record.original_name,
            stored = %record.stored_path.display(),
            size = record.size,
            "File received"
        );
        ledger.records.push(record);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let ledger = self.lock();
        StatusSnapshot {
            received_count: ledger.records.len() as u64,
            total_size: ledger.total_size,
            upload_dir: self.upload_dir.to_string_lossy().into_owned(),
        }
    }

    pub fn records(&self) -> Vec<UploadRecord> {
        self.lock().records.clone()
    }
}
