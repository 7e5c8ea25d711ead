#![allow(dead_code)]

pub mod config_test_utils;
pub mod upload_http;

use localdrop::common::TransferSettings;
use tempfile::TempDir;

pub const CHUNK_SIZE: usize = 16 * 1024;

pub fn default_config() -> TransferSettings {
    TransferSettings {
        chunk_size: CHUNK_SIZE,
        max_request_bytes: None,
    }
}

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

pub fn create_test_data(pattern: u8, size: usize) -> Vec<u8> {
    vec![pattern; size]
}

/// Files in `dir`, sorted by name.
pub fn list_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read upload dir")
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
