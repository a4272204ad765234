//! Listener bootstrap and daemonization (§4.E "Daemonization", §5 lockfile).
//!
//! Adapted from the teacher's `spawn_new_detached_with_name` double-fork
//! sequence in `pty/spawn.rs`, generalized from "one session per process" to
//! "one daemon, many sessions" and from a per-session socket to the single
//! per-user socket §6 specifies.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use nix::fcntl::{flock, FlockArg};
use nix::unistd::{fork, setsid, ForkResult};

use crate::error::{MuxError, Result};
use crate::paths;
use crate::server::core::ServerState;

/// Acquire the startup lock so two racing clients don't both spawn a
/// daemon (§5 "a lockfile next to the socket... `flock` exclusive,
/// non-blocking; losing party waits, then retries connect").
fn try_lock_startup() -> Result<Option<std::fs::File>> {
    let lock_path = paths::lock_path()?;
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .map_err(MuxError::Io)?;
    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(Some(file)),
        Err(nix::Error::EWOULDBLOCK) => Ok(None),
        Err(e) => Err(MuxError::Io(e.into())),
    }
}

fn redirect_stdio_to_dev_null() {
    unsafe {
        let dev_null = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR);
        if dev_null >= 0 {
            libc::dup2(dev_null, 0);
            libc::dup2(dev_null, 1);
            libc::dup2(dev_null, 2);
            if dev_null > 2 {
                libc::close(dev_null);
            }
        }
    }
}

/// Ensure a daemon is listening on the per-user socket, starting one if
/// necessary, then return a connected stream to it — this connection
/// becomes the caller's first client connection (§4.E).
///
/// If a server is already listening, connects directly. Otherwise takes
/// the startup lock, opens the listening socket in this (caller's) process
/// so bind failures are reported synchronously, then double-forks: the
/// intermediate child `setsid`s and exits; the grandchild redirects stdio
/// to `/dev/null` and runs the event loop.
pub fn ensure_server_running() -> Result<UnixStream> {
    let socket_path = paths::socket_path()?;

    if let Ok(stream) = UnixStream::connect(&socket_path) {
        return Ok(stream);
    }

    let Some(_lock) = try_lock_startup()? else {
        // Another process is starting the daemon; wait briefly and retry.
        for _ in 0..50 {
            std::thread::sleep(std::time::Duration::from_millis(20));
            if let Ok(stream) = UnixStream::connect(&socket_path) {
                return Ok(stream);
            }
        }
        return Err(MuxError::Socket("timed out waiting for daemon startup".into()));
    };

    // A stale socket file with nothing listening on it must be removed
    // before bind, or EADDRINUSE results.
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path).map_err(MuxError::Io)?;

    match unsafe { fork() }.map_err(|e| MuxError::Fork(e.to_string()))? {
        nix::unistd::ForkResult::Parent { child } => {
            let _ = nix::sys::wait::waitpid(child, None);
            UnixStream::connect(&socket_path).map_err(MuxError::Io)
        }
        ForkResult::Child => {
            setsid().map_err(|e| MuxError::Signal(e.to_string()))?;
            match unsafe { fork() }.map_err(|e| MuxError::Fork(e.to_string()))? {
                ForkResult::Parent { .. } => std::process::exit(0),
                ForkResult::Child => {
                    redirect_stdio_to_dev_null();
                    crate::logging::init_server_logging(socket_path.parent().unwrap_or(Path::new(".")));
                    tracing::info!("muxkit daemon starting, socket {:?}", socket_path);
                    let mut state = ServerState::new(listener);
                    state.run();
                    std::process::exit(0);
                }
            }
        }
    }
}
