//! CLI command handlers (§6 "CLI surface"). `src/main.rs` only parses
//! arguments and dispatches here, matching the teacher's split between
//! `main.rs` and `src/handlers/*`.

use std::os::unix::net::UnixStream;

use crate::client::attach;
use crate::client::Client;
use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::pane::Window;
use crate::protocol::{self, MessageType};
use crate::{logging, paths, server};

fn terminal_size() -> (u16, u16) {
    crossterm::terminal::size().unwrap_or((80, 24))
}

fn read_length_prefixed_reply(stream: &mut UnixStream) -> Result<String> {
    let mut len_buf = [0u8; 8];
    protocol::read_exact_retry(stream, &mut len_buf).map_err(MuxError::Io)?;
    let len = u64::from_ne_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    protocol::read_exact_retry(stream, &mut buf).map_err(MuxError::Io)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn load_client_config() -> Config {
    match paths::keybind_config_path() {
        Ok(path) => Config::load_or_default(&path),
        Err(_) => Config::default(),
    }
}

fn run_client(window: Window, session_id: Option<u32>, stream: UnixStream) -> Result<()> {
    let mut client = Client::new(stream, window, load_client_config(), session_id);
    client.run()
}

/// No-args invocation: refuse if already nested, otherwise start (or find)
/// the daemon, open a new session, and attach immediately (§6).
pub fn handle_default_session() -> Result<()> {
    if let Some(other) = server::spawn::already_nested() {
        return Err(MuxError::Nesting(other));
    }
    logging::init_client_logging();
    let mut stream = server::ensure_server_running()?;
    protocol::check_version_handshake(&mut stream)?;
    protocol::send_version(&mut stream)?;

    let (cols, rows) = terminal_size();
    let window = attach::start_new_session(&mut stream, cols, rows)?;
    run_client(window, None, stream)
}

/// `-s ID` / `-S ID`: attach to a detached session. Per §8 scenario S5, an
/// attach-not-found reply is a normal (not a protocol-level) outcome: print
/// a message and exit cleanly rather than with the 255 error code.
pub fn handle_attach(id: u32) -> Result<()> {
    logging::init_client_logging();
    let mut stream = server::ensure_server_running()?;
    protocol::check_version_handshake(&mut stream)?;
    protocol::send_version(&mut stream)?;

    let (cols, rows) = terminal_size();
    match attach::attach_session(&mut stream, id, cols, rows) {
        Ok(window) => run_client(window, Some(id), stream),
        Err(MuxError::SessionNotFound(_)) => {
            println!("attach failed: no such session {id}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// `-l` / `-L`: print the server's session listing and exit.
pub fn handle_list() -> Result<()> {
    let mut stream = server::ensure_server_running()?;
    protocol::check_version_handshake(&mut stream)?;
    protocol::send_version(&mut stream)?;

    protocol::send_message(&mut stream, MessageType::ListSessions, &[])?;
    let text = read_length_prefixed_reply(&mut stream)?;
    println!("{text}");
    Ok(())
}

/// `-k ID` / `-K ID`: kill a session by id.
pub fn handle_kill(id: u32) -> Result<()> {
    let mut stream = server::ensure_server_running()?;
    protocol::check_version_handshake(&mut stream)?;
    protocol::send_version(&mut stream)?;

    protocol::send_message(&mut stream, MessageType::DetachKill, &id.to_ne_bytes())?;
    let text = read_length_prefixed_reply(&mut stream)?;
    println!("{text}");
    Ok(())
}

/// `mux rename ID NAME`: recovered feature (§9 Design Notes / SPEC_FULL §C),
/// delivered as a `COMMAND` verb since the wire catalog is closed.
pub fn handle_rename(id: u32, new_name: &str) -> Result<()> {
    let mut stream = server::ensure_server_running()?;
    protocol::check_version_handshake(&mut stream)?;
    protocol::send_version(&mut stream)?;

    let mut payload = Vec::new();
    payload.extend_from_slice(b"rename\0");
    payload.extend_from_slice(id.to_string().as_bytes());
    payload.push(0);
    payload.extend_from_slice(new_name.as_bytes());
    payload.push(0);
    protocol::send_message(&mut stream, MessageType::Command, &payload)?;
    let text = read_length_prefixed_reply(&mut stream)?;
    println!("{text}");
    Ok(())
}

/// `mux history`: recovered feature, reads the daemon's in-memory session
/// event log.
pub fn handle_history() -> Result<()> {
    let mut stream = server::ensure_server_running()?;
    protocol::check_version_handshake(&mut stream)?;
    protocol::send_version(&mut stream)?;

    protocol::send_message(&mut stream, MessageType::Command, b"history\0")?;
    let text = read_length_prefixed_reply(&mut stream)?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream as StdUnixStream;

    #[test]
    fn reads_length_prefixed_reply_over_socketpair() {
        let (mut a, mut b) = StdUnixStream::pair().unwrap();
        let body = b"hello world";
        a.write_all(&(body.len() as u64).to_ne_bytes()).unwrap();
        a.write_all(body).unwrap();
        let text = read_length_prefixed_reply(&mut b).unwrap();
        assert_eq!(text, "hello world");
    }
}
