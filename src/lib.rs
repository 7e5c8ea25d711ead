pub mod common;
pub mod network;
pub mod pairing;
pub mod receive;
pub mod server;
pub mod ui;
pub mod utils;

pub use server::{ServerSupervisor, StartResponse};
