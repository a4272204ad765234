//! The session/pane server: event loop, daemonization, and per-pane shell
//! spawning (§4.E).

pub mod core;
pub mod daemon;
pub mod spawn;

pub use core::ServerState;
pub use daemon::ensure_server_running;
