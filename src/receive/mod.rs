pub mod handlers;
mod state;
pub mod storage;
pub mod store;

pub use state::{InFlightGuard, ReceiveAppState};
pub use storage::{prepare_upload_dir, UploadSink};
pub use store::{StatusSnapshot, UploadRecord, UploadStore};
