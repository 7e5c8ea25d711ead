//! Streams uploads to disk with collision-safe naming and RAII cleanup.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::common::StartError;

/// Upper bound on suffix attempts when racing other uploads for a name.
const MAX_NAME_ATTEMPTS: u32 = 1000;
const WRITE_CHECK_PREFIX: &str = ".localdrop-write-check-";

/// Finds an available path by appending ` (N)` suffix if the target already exists.
/// Returns the original path unchanged if no collision.
/// Does not create any files. Fails when the directory cannot be inspected
/// or no free name turns up within `MAX_NAME_ATTEMPTS` candidates.
pub async fn find_available_path(path: PathBuf) -> Result<PathBuf> {
    if !path_exists(&path).await? {
        return Ok(path);
    }

    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();

    let parent_dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let (base_name, all_extensions) = split_extensions(&filename);

    // A counter already at u32::MAX is kept as part of the stem.
    let (name_without_number, mut counter) = match parse_counter(&base_name) {
        Some((stem, num)) => match num.checked_add(1) {
            Some(next) => (stem.to_string(), next),
            None => (base_name.clone(), 1),
        },
        None => (base_name.clone(), 1),
    };

    for _ in 0..MAX_NAME_ATTEMPTS {
        let candidate =
            parent_dir.join(format!("{name_without_number} ({counter}){all_extensions}"));
        if !path_exists(&candidate).await? {
            return Ok(candidate);
        }
        match counter.checked_add(1) {
            Some(next) => counter = next,
            None => break,
        }
    }

    Err(anyhow::anyhow!(
        "Could not find a free name for {filename} after {MAX_NAME_ATTEMPTS} attempts"
    ))
}

async fn path_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("Failed to inspect {}", path.display()))
}

// "archive.tar.gz" -> ("archive", ".tar.gz"); dotfiles keep their whole name.
fn split_extensions(filename: &str) -> (String, String) {
    match filename.find('.') {
        Some(dot_pos) if dot_pos > 0 => (
            filename[..dot_pos].to_string(),
            filename[dot_pos..].to_string(),
        ),
        _ => (filename.to_string(), String::new()),
    }
}

// "report (3)" -> ("report", 3)
fn parse_counter(base_name: &str) -> Option<(&str, u32)> {
    let paren_pos = base_name.rfind(" (")?;
    if !base_name.ends_with(')') {
        return None;
    }
    let number = base_name[paren_pos + 2..base_name.len() - 1]
        .parse::<u32>()
        .ok()?;
    Some((&base_name[..paren_pos], number))
}

/// Result of a fully written upload.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// One file being written from an upload stream.
///
/// RAII: `disarmed=false` → Drop deletes file. Set `true` after finalization.
pub struct UploadSink {
    writer: BufWriter<File>,
    path: PathBuf,
    hasher: Sha256,
    bytes_written: u64,
    disarmed: bool,
}

impl UploadSink {
    /// Create a new file named `file_name` inside `dir`, suffixing on collision.
    ///
    /// Files are opened with `create_new`, so two uploads racing for the same
    /// name never end up sharing a file.
    pub async fn create(dir: &Path, file_name: &str, buffer_size: usize) -> Result<Self> {
        let mut dest_path = dir.join(file_name);

        for _ in 0..MAX_NAME_ATTEMPTS {
            dest_path = find_available_path(dest_path).await?;

            let result = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&dest_path)
                .await;

            match result {
                Ok(file) => {
                    tracing::debug!(path = %dest_path.display(), "Upload file created");
                    return Ok(Self {
                        writer: BufWriter::with_capacity(buffer_size, file),
                        path: dest_path,
                        hasher: Sha256::new(),
                        bytes_written: 0,
                        disarmed: false,
                    });
                }
                // Lost a race with a concurrent upload; resolve again.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!(
                        "Failed to create upload file: {}",
                        dest_path.display()
                    )));
                }
            }
        }

        Err(anyhow::anyhow!(
            "Could not find a free name for {file_name} after {MAX_NAME_ATTEMPTS} attempts"
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one chunk of the upload stream.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .await
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flush to disk and keep the file.
    ///
    /// # Returns
    ///
    /// Final path, size and hex-encoded SHA-256 of the content.
    pub async fn finalize(&mut self) -> Result<StoredFile> {
        self.writer.flush().await.context("Failed to flush upload")?;
        self.writer
            .get_ref()
            .sync_all()
            .await
            .context("Failed to sync upload to disk")?;

        self.disarmed = true; // mark success

        let hasher = std::mem::take(&mut self.hasher);
        Ok(StoredFile {
            path: self.path.clone(),
            size: self.bytes_written,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    /// Remove incomplete output and disarm drop cleanup.
    pub async fn discard(&mut self) -> Result<()> {
        if !self.disarmed {
            self.disarmed = true; // prevent Drop
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("Failed to remove incomplete file"),
            }
        }

        Ok(())
    }
}

/// RAII cleanup guard: Deletes incomplete files unless disarmed by finalization.
///
/// Covers handler futures dropped mid-stream (client disconnect, forced shutdown).
impl Drop for UploadSink {
    fn drop(&mut self) {
        if !self.disarmed {
            match std::fs::remove_file(&self.path) {
                Ok(()) => {
                    tracing::debug!(path = %self.path.display(), "Removed partial upload");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Failed to clean up partial upload"
                    );
                }
            }
        }
    }
}

/// Upload directory prepared for a session.
#[derive(Debug)]
pub struct PreparedDir {
    path: PathBuf,
    // Directories this call created, deepest first.
    created: Vec<PathBuf>,
}

impl PreparedDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Undo directory creation after a failed start. Only removes what was
    /// created and is still empty.
    pub fn rollback(self) {
        for dir in &self.created {
            if let Err(e) = std::fs::remove_dir(dir) {
                tracing::debug!(path = %dir.display(), error = %e, "Left directory in place");
                break;
            }
        }
    }
}

/// Make sure `path` exists and accepts new files.
pub fn prepare_upload_dir(path: &Path) -> Result<PreparedDir, StartError> {
    let dir_error = |source| StartError::Directory {
        path: path.to_path_buf(),
        source,
    };

    let created: Vec<PathBuf> = path
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .map(Path::to_path_buf)
        .collect();

    std::fs::create_dir_all(path).map_err(dir_error)?;

    let prepared = PreparedDir {
        path: path.to_path_buf(),
        created,
    };

    if !path.is_dir() {
        prepared.rollback();
        return Err(dir_error(std::io::Error::new(
            ErrorKind::Other,
            "path exists but is not a directory",
        )));
    }

    let check_file = path.join(format!("{WRITE_CHECK_PREFIX}{}", uuid::Uuid::new_v4()));
    let write_check = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&check_file)
        .and_then(|_| std::fs::remove_file(&check_file));

    if let Err(e) = write_check {
        prepared.rollback();
        return Err(dir_error(e));
    }

    Ok(prepared)
}
