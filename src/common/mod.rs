pub mod config;
pub mod errors;

pub use config::{AppConfig, ConfigOverrides, TransferSettings};
pub use errors::{AppError, StartError};
