//! The client event core: raw-terminal I/O, the FSM driver, and the
//! attach/detach ceremony (§4.F).

pub mod attach;
pub mod fsm;
pub mod keybind;
pub mod layout;

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::select::{select, FdSet};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{tcgetattr, tcsetattr, InputFlags, LocalFlags, SetArg, Termios};

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::pane::Window;
use crate::protocol::{self, MessageType};
use crate::render::Renderer;
use fsm::{Action, Event, State};
use keybind::{Dispatch, PrefixState};

static WINCH_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigwinch(_: libc::c_int) {
    WINCH_PENDING.store(true, Ordering::SeqCst);
}

fn install_sigwinch_handler() -> Result<()> {
    let action = SigAction::new(SigHandler::Handler(on_sigwinch), SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(Signal::SIGWINCH, &action) }.map_err(|e| MuxError::Signal(e.to_string()))?;
    Ok(())
}

fn enable_raw_mode(original: &Termios) -> Termios {
    let mut raw = original.clone();
    raw.input_flags &= !(InputFlags::ICRNL | InputFlags::IXON | InputFlags::BRKINT | InputFlags::INPCK | InputFlags::ISTRIP);
    raw.local_flags &= !(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG);
    raw
}

fn current_terminal_size() -> (u16, u16) {
    crossterm::terminal::size().unwrap_or((80, 24))
}

/// Owns the real terminal, the socket, and the window of attached panes.
pub struct Client {
    stream: UnixStream,
    window: Window,
    config: Config,
    prefix: PrefixState,
    renderer: Renderer,
    sync_input: bool,
    original_termios: Option<Termios>,
    session_id: Option<u32>,
}

impl Client {
    pub fn new(stream: UnixStream, window: Window, config: Config, session_id: Option<u32>) -> Self {
        Client {
            stream,
            window,
            config,
            prefix: PrefixState::default(),
            renderer: Renderer::new(),
            sync_input: false,
            original_termios: None,
            session_id,
        }
    }

    /// Drives `(BOOT, ENABLE_RAW_MODE) -> RUNNING` then the main loop until
    /// an `EXITING` transition is reached.
    pub fn run(&mut self) -> Result<()> {
        let mut state = State::Boot;
        let stdin_fd = std::io::stdin().as_raw_fd();
        let original = tcgetattr(unsafe { BorrowedFd::borrow_raw(stdin_fd) })
            .map_err(|e| MuxError::Pty(e.to_string()))?;
        self.original_termios = Some(original.clone());
        let raw = enable_raw_mode(&original);
        tcsetattr(unsafe { BorrowedFd::borrow_raw(stdin_fd) }, SetArg::TCSANOW, &raw)
            .map_err(|e| MuxError::Pty(e.to_string()))?;
        print!("\x1b[?1049h\x1b[2J");
        let _ = std::io::stdout().flush();

        let (next, action) = fsm::dispatch(state, Event::EnableRawMode);
        state = next;
        self.run_action(action)?;
        install_sigwinch_handler()?;
        self.redraw()?;

        while state != State::Exiting {
            let event = self.wait_for_event(stdin_fd)?;
            let (next, action) = fsm::dispatch(state, event);
            state = next;
            if let Some(override_state) = self.run_action(action)? {
                state = override_state;
            }
        }

        self.restore_terminal(stdin_fd);
        Ok(())
    }

    fn wait_for_event(&mut self, stdin_fd: RawFd) -> Result<Event> {
        let stdin_borrowed = unsafe { BorrowedFd::borrow_raw(stdin_fd) };
        let pane_fds: Vec<RawFd> = self
            .window
            .panes
            .iter_indices()
            .filter_map(|idx| self.window.panes.get(idx).and_then(|p| p.master_fd))
            .collect();

        let mut fds = FdSet::new();
        fds.insert(stdin_borrowed);
        let mut max_fd = stdin_fd;
        for &fd in &pane_fds {
            fds.insert(unsafe { BorrowedFd::borrow_raw(fd) });
            max_fd = max_fd.max(fd);
        }

        match select(Some(max_fd + 1), Some(&mut fds), None, None, None) {
            Ok(_) => {
                if WINCH_PENDING.swap(false, Ordering::SeqCst) {
                    return Ok(Event::Winch);
                }
                if fds.contains(stdin_borrowed) {
                    return Ok(Event::StdinRead);
                }
                let idxs: Vec<usize> = self.window.panes.iter_indices().collect();
                for idx in idxs {
                    if let Some(fd) = self.window.panes.get(idx).and_then(|p| p.master_fd) {
                        if fds.contains(unsafe { BorrowedFd::borrow_raw(fd) }) {
                            self.read_pane_output(idx)?;
                        }
                    }
                }
                Ok(Event::PtyRead)
            }
            Err(nix::Error::EINTR) => {
                if WINCH_PENDING.swap(false, Ordering::SeqCst) {
                    Ok(Event::Winch)
                } else {
                    Ok(Event::PtyRead)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_pane_output(&mut self, pane_slot: usize) -> Result<()> {
        let Some(fd) = self.window.panes.get(pane_slot).and_then(|p| p.master_fd) else {
            return Ok(());
        };
        let mut buf = [0u8; 8192];
        match nix::unistd::read(fd, &mut buf) {
            Ok(0) => {
                if let Some(pane) = self.window.panes.get_mut(pane_slot) {
                    pane.master_fd = None;
                }
                self.window.destroy_pane(pane_slot);
            }
            Ok(n) => {
                if let Some(pane) = self.window.panes.get_mut(pane_slot) {
                    pane.feed_pty_output(&buf[..n]);
                }
                self.redraw_pane(pane_slot)?;
            }
            Err(nix::Error::EAGAIN) | Err(nix::Error::EINTR) => {}
            Err(_) => {
                self.window.destroy_pane(pane_slot);
            }
        }
        Ok(())
    }

    /// Runs an FSM-dispatched action. Returns `Some(state)` when the action
    /// itself computed a state transition that the caller's own FSM lookup
    /// didn't already account for (e.g. a keybind-triggered detach nested
    /// inside `Action::HandleStdinByte`) — the caller must fold this back
    /// into its own state variable rather than discard it.
    fn run_action(&mut self, action: Action) -> Result<Option<State>> {
        match action {
            Action::InstallRawMode | Action::NoOp => Ok(None),
            Action::RecomputeLayoutAndRedraw => self.recompute_layout().map(|_| None),
            Action::RestoreAndExit => Ok(None),
            Action::ReadPtyAndRedraw => Ok(None),
            Action::HandleStdinByte => self.handle_stdin(),
            Action::DetachCeremony => self.detach().map(|_| None),
            Action::SplitPane => self.split_pane().map(|_| None),
            Action::ToggleSyncInput => {
                self.sync_input = !self.sync_input;
                Ok(None)
            }
        }
    }

    fn handle_stdin(&mut self) -> Result<Option<State>> {
        let mut byte = [0u8; 1];
        if std::io::stdin().read_exact(&mut byte).is_err() {
            return Ok(None);
        }
        let byte = byte[0];

        if self.active_pane_scrolled() {
            // Any key exits scrollback mode; the byte itself is swallowed.
            self.reset_active_scroll();
            return self.redraw().map(|_| None);
        }

        match self.prefix.feed(byte, &self.config) {
            Dispatch::Armed => Ok(None),
            Dispatch::Forward(bytes) => self.write_to_active(&bytes).map(|_| None),
            Dispatch::Action(action) => self.run_keybind(action),
        }
    }

    fn active_pane_scrolled(&self) -> bool {
        self.window.active_pane().map(|p| p.grid.scroll_offset() > 0).unwrap_or(false)
    }

    fn reset_active_scroll(&mut self) {
        if let Some(pane) = self.window.active_pane_mut() {
            pane.grid.scroll_down(u64::MAX / 2);
        }
    }

    fn write_to_active(&mut self, bytes: &[u8]) -> Result<()> {
        if self.sync_input {
            for idx in self.window.panes.iter_indices().collect::<Vec<_>>() {
                if let Some(pane) = self.window.panes.get(idx) {
                    pane.write_output(bytes);
                }
            }
            return Ok(());
        }
        if let Some(pane) = self.window.active_pane() {
            pane.write_output(bytes);
        }
        Ok(())
    }

    /// Runs a keybind-triggered action. This is a second, nested entry point
    /// into the FSM table (the first being `run()`'s own top-level
    /// `fsm::dispatch` call) — its computed next-state must be returned, not
    /// just the `Action` it produces, or a `Detach` keybind would run the
    /// detach ceremony without ever telling `run()`'s loop to exit (§8 S6).
    fn run_keybind(&mut self, action: crate::config::KeyAction) -> Result<Option<State>> {
        use crate::config::KeyAction::*;
        match action {
            Detach => {
                let (next, action) = fsm::dispatch(State::Running, Event::Detached);
                self.run_action(action)?;
                Ok(Some(next))
            }
            PaneSplit => {
                let (_, action) = fsm::dispatch(State::Running, Event::PaneSplit);
                self.run_action(action)
            }
            NextPane => {
                self.window.activate_next();
                self.redraw().map(|_| None)
            }
            ScrollUp => {
                let height = self.window.active_pane().map(|p| p.sy as u64).unwrap_or(1);
                if let Some(pane) = self.window.active_pane_mut() {
                    pane.grid.scroll_up(height);
                }
                self.redraw().map(|_| None)
            }
            ScrollDown => {
                let height = self.window.active_pane().map(|p| p.sy as u64).unwrap_or(1);
                if let Some(pane) = self.window.active_pane_mut() {
                    pane.grid.scroll_down(height);
                }
                self.redraw().map(|_| None)
            }
            ToggleSyncInput => {
                let (_, action) = fsm::dispatch(State::Running, Event::SyncInput);
                self.run_action(action)
            }
        }
    }

    fn recompute_layout(&mut self) -> Result<()> {
        let (cols, rows) = current_terminal_size();
        let indices: Vec<usize> = self.window.panes.iter_indices().collect();
        let geometries = layout::compute_layout(cols, rows, indices.len());
        for (idx, geometry) in indices.iter().zip(geometries.iter()) {
            if let Some(pane) = self.window.panes.get_mut(*idx) {
                pane.xoff = geometry.xoff;
                pane.yoff = geometry.yoff;
                pane.resize(geometry.sx, geometry.sy);
                let _ = pane.push_winsize();
            }
        }
        print!("\x1b[2J");
        self.redraw()
    }

    fn split_pane(&mut self) -> Result<()> {
        let (cols, rows) = current_terminal_size();
        protocol::send_message(
            &mut self.stream,
            MessageType::Resize,
            &[(rows as u32).to_ne_bytes(), (cols as u32).to_ne_bytes()].concat(),
        )?;
        protocol::send_message(&mut self.stream, MessageType::Command, b"pane-split\0")?;
        let fd = protocol::recv_fd(&self.stream)?
            .ok_or_else(|| MuxError::Socket("server did not pass a PTY fd".into()))?;

        let indices: Vec<usize> = self.window.panes.iter_indices().collect();
        let n = indices.len() + 1;
        let geometries = layout::compute_layout(cols, rows, n);
        for (idx, geometry) in indices.iter().zip(geometries.iter()) {
            if let Some(pane) = self.window.panes.get_mut(*idx) {
                pane.xoff = geometry.xoff;
                pane.resize(geometry.sx, geometry.sy);
                let _ = pane.push_winsize();
            }
        }
        let last = geometries[n - 1];
        let slot = self.window.create_pane(last.sx, last.sy, last.xoff, last.yoff);
        if let Some(pane) = self.window.panes.get_mut(slot) {
            pane.set_master_fd(fd, -1);
            let _ = pane.push_winsize();
        }
        self.window.set_active(slot);
        print!("\x1b[2J");
        self.redraw()
    }

    /// Serialize every pane's grid, upload each as `GRID_SAVE`, send the
    /// empty-payload `DETACH`, then drop this process's copy of each pane's
    /// PTY master fd — the server keeps the shell alive, but the client's
    /// own handle to it must not outlive the session (§5 "Shared resources",
    /// §9 Design Notes).
    fn detach(&mut self) -> Result<()> {
        for idx in self.window.panes.iter_indices().collect::<Vec<_>>() {
            if let Some(pane) = self.window.panes.get(idx) {
                let blob = pane.grid.serialize(pane.id, pane.cx as u32, pane.cy as u32);
                protocol::send_message(&mut self.stream, MessageType::GridSave, &blob)?;
            }
        }
        protocol::send_message(&mut self.stream, MessageType::Detach, &[])?;
        for idx in self.window.panes.iter_indices().collect::<Vec<_>>() {
            if let Some(pane) = self.window.panes.get_mut(idx) {
                if let Some(fd) = pane.master_fd.take() {
                    let _ = nix::unistd::close(fd);
                }
            }
        }
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let mut out = std::io::stdout();
        for idx in self.window.panes.iter_indices().collect::<Vec<_>>() {
            if let Some(pane) = self.window.panes.get(idx) {
                self.renderer.render_pane(&mut out, pane)?;
            }
        }
        self.renderer.render_borders(&mut out, &self.window)?;
        let (cols, rows) = current_terminal_size();
        let any_scrolled = self.window.panes.iter_indices().any(|i| {
            self.window.panes.get(i).map(|p| p.grid.scroll_offset() > 0).unwrap_or(false)
        });
        let label = match self.session_id {
            Some(id) => format!("#{id} {}", self.window.name),
            None => self.window.name.clone(),
        };
        self.renderer.render_status_bar(
            &mut out,
            rows,
            cols,
            &label,
            any_scrolled,
            "[scroll]",
            env!("CARGO_PKG_VERSION"),
        )?;
        out.flush().map_err(MuxError::Io)
    }

    fn redraw_pane(&mut self, pane_slot: usize) -> Result<()> {
        let mut out = std::io::stdout();
        if let Some(pane) = self.window.panes.get(pane_slot) {
            self.renderer.render_pane(&mut out, pane)?;
        }
        out.flush().map_err(MuxError::Io)
    }

    fn restore_terminal(&mut self, stdin_fd: RawFd) {
        if let Some(original) = &self.original_termios {
            let _ = tcsetattr(unsafe { BorrowedFd::borrow_raw(stdin_fd) }, SetArg::TCSANOW, original);
        }
        print!("\x1b[?1049l");
        let _ = std::io::stdout().flush();
    }
}
