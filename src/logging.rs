//! Structured logging setup, replacing the ad hoc per-process debug file
//! the teacher wired by hand. One `tracing_subscriber` layer per role: the
//! daemon (whose stdio is redirected to `/dev/null`, §4.E) logs to a file
//! next to its socket; the client logs to stderr.

use std::path::Path;

use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("MUXKIT_LOG")
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a stderr-backed subscriber for the client process.
pub fn init_client_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Install a file-backed subscriber for the daemon process, since its
/// stdio is closed and redirected to `/dev/null` before the event loop
/// starts.
pub fn init_server_logging(log_dir: &Path) {
    let _ = std::fs::create_dir_all(log_dir);
    let log_path = log_dir.join("server.log");
    if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(log_path) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::sync::Mutex::new(file))
            .try_init();
    }
}
