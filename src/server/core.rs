//! Single-threaded, readiness-driven server event loop (§4.E).
//!
//! Grounded on the teacher's single-process daemon loop in `pty/spawn.rs`'s
//! `run_detached`/`PtyIoHandler`, generalized from "one session per daemon"
//! to a session registry serving many clients over one listening socket.

use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::select::{select, FdSet};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{MuxError, Result};
use crate::history::{SessionEvent, SessionHistory};
use crate::protocol::{self, MessageType};
use crate::session::SessionRegistry;

const MAX_CLIENTS: usize = 64;
const MAX_PANES_PER_WINDOW: usize = 64;
const HISTORY_CAPACITY: usize = 256;

static SIGCHLD_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigchld(_: libc::c_int) {
    SIGCHLD_PENDING.store(true, Ordering::SeqCst);
}

/// Installs a minimal handler that only flips an atomic flag (§5 "Signals");
/// `SA_RESTART` is intentionally not set so the blocking wait call returns
/// `EINTR` promptly.
fn install_sigchld_handler() -> Result<()> {
    let action = SigAction::new(SigHandler::Handler(on_sigchld), SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(|e| MuxError::Signal(e.to_string()))?;
    Ok(())
}

pub struct ServerState {
    listener: UnixListener,
    clients: Vec<Option<UnixStream>>,
    sessions: SessionRegistry,
    history: SessionHistory,
}

impl ServerState {
    pub fn new(listener: UnixListener) -> Self {
        let _ = listener.set_nonblocking(false);
        ServerState {
            listener,
            clients: (0..MAX_CLIENTS).map(|_| None).collect(),
            sessions: SessionRegistry::new(),
            history: SessionHistory::new(HISTORY_CAPACITY),
        }
    }

    /// Runs until the process is killed. Errors mid-loop are logged and the
    /// offending connection is closed; the daemon itself never exits on its
    /// own (§4.E has no daemon-shutdown event).
    pub fn run(&mut self) {
        if let Err(e) = install_sigchld_handler() {
            tracing::error!("failed to install SIGCHLD handler: {e}");
        }

        loop {
            let listener_fd = self.listener.as_raw_fd();
            let client_fds: Vec<(usize, RawFd)> = self
                .clients
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.as_ref().map(|c| (i, c.as_raw_fd())))
                .collect();

            let mut fds = FdSet::new();
            fds.insert(unsafe { BorrowedFd::borrow_raw(listener_fd) });
            let mut max_fd = listener_fd;
            for &(_, fd) in &client_fds {
                fds.insert(unsafe { BorrowedFd::borrow_raw(fd) });
                max_fd = max_fd.max(fd);
            }

            let ready = select(Some(max_fd + 1), Some(&mut fds), None, None, None);
            match ready {
                Ok(_) => {
                    if fds.contains(unsafe { BorrowedFd::borrow_raw(listener_fd) }) {
                        self.accept_one();
                    }
                    let readable: Vec<usize> = client_fds
                        .iter()
                        .filter_map(|&(i, fd)| fds.contains(unsafe { BorrowedFd::borrow_raw(fd) }).then_some(i))
                        .collect();
                    for slot in readable {
                        if self.server_receive(slot).is_err() {
                            self.clients[slot] = None;
                        }
                    }
                }
                Err(nix::Error::EINTR) => {
                    // Fall through to signal handling below without
                    // touching fd readiness (§5).
                }
                Err(e) => {
                    tracing::error!("select failed: {e}");
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
            }

            self.reclaim_detached_slots();

            if SIGCHLD_PENDING.swap(false, Ordering::SeqCst) {
                self.reap_and_cleanup();
            }
        }
    }

    fn accept_one(&mut self) {
        match self.listener.accept() {
            Ok((mut stream, _addr)) => {
                let Some(slot) = self.clients.iter().position(|c| c.is_none()) else {
                    tracing::warn!("client admission table full, dropping connection");
                    return;
                };
                let _ = stream.set_nonblocking(false);
                if protocol::send_version(&mut stream).is_err() {
                    return;
                }
                if protocol::check_version_handshake(&mut stream).is_err() {
                    return;
                }
                self.clients[slot] = Some(stream);
            }
            Err(e) => tracing::warn!("accept failed: {e}"),
        }
    }

    /// Step 4 of the event loop: a detached session whose client_fd is
    /// still occupying an admission slot gets that slot freed (§4.E).
    fn reclaim_detached_slots(&mut self) {
        for session in self.sessions.iter_mut() {
            if session.detached {
                if let Some(fd) = session.client_fd.take() {
                    if let Some(slot) = self
                        .clients
                        .iter()
                        .position(|c| c.as_ref().map(|s| s.as_raw_fd()) == Some(fd))
                    {
                        self.clients[slot] = None;
                    }
                }
            }
        }
    }

    /// Step 5: reap exited children, close their pane's master fd, mark
    /// fully-exited sessions, and prune them (§4.E).
    fn reap_and_cleanup(&mut self) {
        let reaped = super::spawn::reap_children();
        if reaped.is_empty() {
            return;
        }
        let reaped_raw: Vec<i32> = reaped.iter().map(|p| p.as_raw()).collect();

        for session in self.sessions.iter_mut() {
            let indices: Vec<usize> = session.window.panes.iter_indices().collect();
            for idx in indices {
                let exited = session
                    .window
                    .panes
                    .get(idx)
                    .and_then(|p| p.pid)
                    .map(|pid| reaped_raw.contains(&pid))
                    .unwrap_or(false);
                if exited {
                    if let Some(pane) = session.window.panes.get(idx) {
                        if let Some(fd) = pane.master_fd {
                            let _ = nix::unistd::close(fd);
                        }
                    }
                    session.window.destroy_pane(idx);
                }
            }
            if session.is_fully_exited() {
                self.history.record(session.id, SessionEvent::Crashed);
            }
        }
        self.sessions.retain_live();
    }

    fn server_receive(&mut self, slot: usize) -> Result<()> {
        let fd = self.clients[slot].as_ref().unwrap().as_raw_fd();
        let header = {
            let stream = self.clients[slot].as_mut().unwrap();
            protocol::recv_header(stream)?
        };

        match header.msg_type {
            MessageType::ListSessions => self.handle_list_sessions(slot, header.len),
            MessageType::DetachKill => self.handle_detach_kill(slot, header.len),
            MessageType::Command => self.handle_command(slot, fd, header.len),
            MessageType::Resize => self.handle_resize(slot, header.len),
            MessageType::Detach => self.handle_detach(slot, fd, header.len),
            MessageType::GridSave => self.handle_grid_save(slot, fd, header.len),
            MessageType::Exited => {
                let stream = self.clients[slot].as_mut().unwrap();
                let _ = protocol::recv_payload(stream, header.len)?;
                Err(MuxError::Protocol("client reported EXITED".into()))
            }
            other => Err(MuxError::Protocol(format!("unexpected message type {other:?}"))),
        }
    }

    fn bind_session_if_needed(&mut self, fd: RawFd) {
        if self.sessions.find_by_client_fd_mut(fd).is_none() {
            let session = self.sessions.create(None);
            session.client_fd = Some(fd);
            session.detached = false;
            self.history.record(session.id, SessionEvent::Created);
        }
    }

    fn handle_list_sessions(&mut self, slot: usize, len: u64) -> Result<()> {
        let stream = self.clients[slot].as_mut().unwrap();
        let _ = protocol::recv_payload(stream, len)?;
        let text = self.sessions.list_text("no sessions");
        self.write_length_prefixed_reply(slot, &text)
    }

    fn handle_detach_kill(&mut self, slot: usize, len: u64) -> Result<()> {
        let stream = self.clients[slot].as_mut().unwrap();
        let payload = protocol::recv_payload(stream, len)?;
        if payload.len() < 4 {
            return Err(MuxError::Protocol("DETACHKILL payload too short".into()));
        }
        let id = u32::from_ne_bytes(payload[0..4].try_into().unwrap());
        let status = match self.sessions.get_mut(id) {
            Some(session) => {
                for idx in session.window.panes.iter_indices().collect::<Vec<_>>() {
                    if let Some(pane) = session.window.panes.get(idx) {
                        if let Some(pid) = pane.pid {
                            let _ = nix::sys::signal::kill(
                                nix::unistd::Pid::from_raw(pid),
                                Signal::SIGKILL,
                            );
                        }
                        if let Some(fd) = pane.master_fd {
                            let _ = nix::unistd::close(fd);
                        }
                    }
                }
                self.sessions.remove(id);
                self.history.record(id, SessionEvent::Killed);
                format!("killed session {id}")
            }
            None => format!("session {id} not found"),
        };
        self.write_length_prefixed_reply(slot, &status)
    }

    fn handle_command(&mut self, slot: usize, fd: RawFd, len: u64) -> Result<()> {
        let stream = self.clients[slot].as_mut().unwrap();
        let payload = protocol::recv_payload(stream, len)?;
        let text = std::str::from_utf8(&payload).unwrap_or("");
        let mut parts = text.trim_end_matches('\0').split('\0');
        let verb = parts.next().unwrap_or("");

        if verb == "history" {
            let reply = self.render_history_text();
            return self.write_length_prefixed_reply(slot, &reply);
        }
        if verb == "rename" {
            let reply = self.handle_rename(parts.next(), parts.next());
            return self.write_length_prefixed_reply(slot, &reply);
        }

        self.bind_session_if_needed(fd);
        let (cols, rows) = self
            .sessions
            .find_by_client_fd_mut(fd)
            .map(|s| (s.cols, s.rows))
            .unwrap_or((80, 24));

        let session = self
            .sessions
            .find_by_client_fd_mut(fd)
            .ok_or_else(|| MuxError::SessionNotFound("no session bound to connection".into()))?;

        if session.window.pane_count() >= MAX_PANES_PER_WINDOW {
            return Err(MuxError::Pty("pane table full".into()));
        }

        match verb {
            "new-session" | "pane-split" => {
                let (master_fd, pid) = super::spawn::spawn_shell(cols, rows)?;
                let pane_slot = session.window.create_pane(cols as usize, rows as usize, 0, 0);
                let pane = session.window.panes.get_mut(pane_slot).unwrap();
                pane.set_master_fd(master_fd, pid);

                let stream = self.clients[slot].as_ref().unwrap();
                protocol::send_fd(stream, master_fd)
            }
            other => Err(MuxError::Protocol(format!("unknown COMMAND verb {other:?}"))),
        }
    }

    fn handle_resize(&mut self, slot: usize, len: u64) -> Result<()> {
        let stream = self.clients[slot].as_mut().unwrap();
        let payload = protocol::recv_payload(stream, len)?;
        if payload.len() < 8 {
            return Err(MuxError::Protocol("RESIZE payload too short".into()));
        }
        let rows = u32::from_ne_bytes(payload[0..4].try_into().unwrap());
        let cols = u32::from_ne_bytes(payload[4..8].try_into().unwrap());
        let fd = self.clients[slot].as_ref().unwrap().as_raw_fd();
        self.bind_session_if_needed(fd);
        if let Some(session) = self.sessions.find_by_client_fd_mut(fd) {
            session.rows = rows as u16;
            session.cols = cols as u16;
        }
        Ok(())
    }

    fn handle_detach(&mut self, slot: usize, fd: RawFd, len: u64) -> Result<()> {
        self.bind_session_if_needed(fd);
        let stream = self.clients[slot].as_mut().unwrap();
        let payload = protocol::recv_payload(stream, len)?;

        if payload.is_empty() {
            if let Some(session) = self.sessions.find_by_client_fd_mut(fd) {
                session.detached = true;
                self.history.record(session.id, SessionEvent::Detached);
            }
            return Ok(());
        }

        if payload.len() < 4 {
            return Err(MuxError::Protocol("DETACH attach payload too short".into()));
        }
        let target_id = u32::from_ne_bytes(payload[0..4].try_into().unwrap());
        self.send_attach_reply(slot, fd, target_id)
    }

    fn send_attach_reply(&mut self, slot: usize, fd: RawFd, target_id: u32) -> Result<()> {
        let Some(session) = self.sessions.get_mut(target_id) else {
            let stream = self.clients[slot].as_mut().unwrap();
            return std::io::Write::write_all(stream, &0u32.to_ne_bytes()).map_err(MuxError::Io);
        };

        session.client_fd = Some(fd);
        session.detached = false;
        let pane_slots: Vec<usize> = session.window.panes.iter_indices().collect();
        let pane_count = pane_slots.len() as u32;

        let stream = self.clients[slot].as_mut().unwrap();
        std::io::Write::write_all(stream, &pane_count.to_ne_bytes()).map_err(MuxError::Io)?;

        let mut snapshot_blobs = Vec::new();
        for &pane_slot in &pane_slots {
            let pane = session.window.panes.get(pane_slot).unwrap();
            if let Some(fd_to_pass) = pane.master_fd {
                let stream = self.clients[slot].as_ref().unwrap();
                protocol::send_fd(stream, fd_to_pass)?;
            }
            if let Some(blob) = session.take_snapshot(pane.id) {
                snapshot_blobs.push(blob);
            }
        }

        let stream = self.clients[slot].as_mut().unwrap();
        std::io::Write::write_all(stream, &(snapshot_blobs.len() as u32).to_ne_bytes())
            .map_err(MuxError::Io)?;
        for blob in snapshot_blobs {
            let stream = self.clients[slot].as_mut().unwrap();
            protocol::send_message(stream, MessageType::GridSave, &blob)?;
        }
        self.history.record(target_id, SessionEvent::Attached);
        Ok(())
    }

    fn handle_grid_save(&mut self, slot: usize, fd: RawFd, len: u64) -> Result<()> {
        self.bind_session_if_needed(fd);
        let stream = self.clients[slot].as_mut().unwrap();
        let payload = protocol::recv_payload(stream, len)?;
        if payload.len() < 4 {
            return Err(MuxError::Protocol("GRID_SAVE payload too short".into()));
        }
        let pane_id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
        if let Some(session) = self.sessions.find_by_client_fd_mut(fd) {
            session.store_snapshot(pane_id, payload);
        }
        Ok(())
    }

    /// `mux rename <id> <new_name>`, delivered as a `COMMAND` verb (§9
    /// recovered feature: no new wire message, since the catalog is closed).
    fn handle_rename(&mut self, id: Option<&str>, new_name: Option<&str>) -> String {
        let (Some(id), Some(new_name)) = (id, new_name) else {
            return "rename: missing arguments".to_string();
        };
        let Ok(id) = id.parse::<u32>() else {
            return format!("rename: invalid session id {id:?}");
        };
        if new_name.is_empty() {
            return "rename: new name must not be empty".to_string();
        }
        let Some(session) = self.sessions.get_mut(id) else {
            return format!("session {id} not found");
        };
        let from = session.name.clone();
        session.name = Some(new_name.to_string());
        self.history.record(
            id,
            SessionEvent::Renamed { from, to: new_name.to_string() },
        );
        format!("renamed session {id} to {new_name}")
    }

    fn write_length_prefixed_reply(&mut self, slot: usize, text: &str) -> Result<()> {
        let stream = self.clients[slot].as_mut().unwrap();
        let bytes = text.as_bytes();
        let mut out = Vec::with_capacity(8 + bytes.len());
        out.extend_from_slice(&(bytes.len() as u64).to_ne_bytes());
        out.extend_from_slice(bytes);
        std::io::Write::write_all(stream, &out).map_err(MuxError::Io)
    }

    fn render_history_text(&self) -> String {
        let entries = self.history.recent(50);
        if entries.is_empty() {
            return "no history".to_string();
        }
        entries
            .iter()
            .map(|e| format!("{}\tsession={}\t{:?}", e.timestamp.to_rfc3339(), e.session_id, e.event))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
