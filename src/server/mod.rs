mod control;
pub mod routes;
pub mod runtime;
mod supervisor;

pub use control::{create_control_router, serve_control, StartResponse};
pub use runtime::{start_local_server, RunningServer, ServerPhase, ShutdownResult};
pub use supervisor::{ServerSession, ServerSupervisor};
