//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment < CLI
use anyhow::{ensure, Context, Result};
use directories::{ProjectDirs, UserDirs};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::network::BindScope;

/// Port LocalSend-style receivers conventionally listen on.
pub const DEFAULT_PORT: u16 = 53317;
pub const DEFAULT_CONTROL_PORT: u16 = 53318;
pub const UPLOAD_FOLDER_NAME: &str = "LocalSend";

pub const MAX_CHUNK_SIZE_BYTES: usize = 8 * 1024 * 1024;
const MAX_PORT_RETRIES: u16 = 100;
const MAX_GRACE_PERIOD_SECS: u64 = 300;

pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "localdrop")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("localdrop.toml"))
}

/// `<Downloads>/LocalSend`, or the temp dir when the platform has no downloads folder.
pub fn default_upload_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .unwrap_or_else(std::env::temp_dir)
        .join(UPLOAD_FOLDER_NAME)
}

/// Per-upload streaming parameters handed to the receive handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Write buffer size in bytes; bounds per-file memory.
    pub chunk_size: usize,
    /// Optional cap on a whole upload request. `None` disables the limit.
    pub max_request_bytes: Option<u64>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_request_bytes: None,
        }
    }
}

/// Fully resolved application configuration after all layers merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Preferred listen port. 0 asks the OS for an ephemeral port.
    pub port: u16,
    /// Extra ports tried after `port` when it is already taken.
    pub port_retries: u16,
    pub bind: BindScope,
    /// Skip interface discovery and advertise this address instead.
    pub advertise_ip: Option<Ipv4Addr>,
    pub upload_dir: Option<PathBuf>,
    pub grace_period_secs: u64,
    pub control_port: u16,
    #[serde(flatten)]
    pub transfer: TransferSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            port_retries: 10,
            bind: BindScope::AllInterfaces,
            advertise_ip: None,
            upload_dir: None,
            grace_period_secs: 5,
            control_port: DEFAULT_CONTROL_PORT,
            transfer: TransferSettings::default(),
        }
    }
}

impl AppConfig {
    /// Upload directory for new sessions.
    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir.clone().unwrap_or_else(default_upload_dir)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Validates bounds and rejects unsafe values.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.transfer.chunk_size > 0,
            "Invalid config: chunk_size must be > 0"
        );
        ensure!(
            self.transfer.chunk_size <= MAX_CHUNK_SIZE_BYTES,
            "Invalid config: chunk_size must be <= {MAX_CHUNK_SIZE_BYTES}"
        );
        ensure!(
            self.port_retries <= MAX_PORT_RETRIES,
            "Invalid config: port_retries must be <= {MAX_PORT_RETRIES}"
        );
        ensure!(
            self.grace_period_secs >= 1,
            "Invalid config: grace_period_secs must be >= 1"
        );
        ensure!(
            self.grace_period_secs <= MAX_GRACE_PERIOD_SECS,
            "Invalid config: grace_period_secs must be <= {MAX_GRACE_PERIOD_SECS}"
        );
        if let Some(limit) = self.transfer.max_request_bytes {
            ensure!(limit > 0, "Invalid config: max_request_bytes must be > 0");
        }
        if let Some(dir) = &self.upload_dir {
            ensure!(
                !dir.as_os_str().is_empty(),
                "Invalid config: upload_dir must not be empty"
            );
        }
        Ok(())
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_ip: Option<Ipv4Addr>,
}

/// Loads config from defaults/file/env, then applies CLI overrides.
pub fn load_config(overrides: &ConfigOverrides) -> Result<AppConfig> {
    load_config_from(&config_path(), overrides)
}

/// Same as [`load_config`] with an explicit config file location.
pub fn load_config_from(path: &Path, overrides: &ConfigOverrides) -> Result<AppConfig> {
    let config: AppConfig = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LOCALDROP_"))
        .extract()
        .context("Failed to load configuration")?;

    let config = apply_overrides(config, overrides);
    config.validate()?;

    tracing::debug!(path = %path.display(), ?config, "configuration loaded");
    Ok(config)
}

/// Applies runtime overrides to a loaded config.
pub fn apply_overrides(mut config: AppConfig, overrides: &ConfigOverrides) -> AppConfig {
    if let Some(port) = overrides.port {
        config.port = port;
    }
    if let Some(dir) = &overrides.upload_dir {
        config.upload_dir = Some(dir.clone());
    }
    if let Some(ip) = overrides.advertise_ip {
        config.advertise_ip = Some(ip);
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn default_upload_dir_ends_in_localsend() {
        let dir = default_upload_dir();
        assert_eq!(dir.file_name().unwrap(), UPLOAD_FOLDER_NAME);
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let overrides = ConfigOverrides {
            port: Some(9000),
            ..Default::default()
        };
        let config = apply_overrides(AppConfig::default(), &overrides);
        assert_eq!(config.port, 9000);
        assert!(config.upload_dir.is_none());
        assert_eq!(config.control_port, DEFAULT_CONTROL_PORT);
    }
}
