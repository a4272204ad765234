//! Attach/new-session ceremony and the grid-sync-on-reattach replay (§4.F
//! "Attach ceremony", §6 "grid sync on reattach").

use std::os::unix::net::UnixStream;

use crate::client::layout::compute_layout;
use crate::error::{MuxError, Result};
use crate::grid::Grid;
use crate::pane::Window;
use crate::protocol::{self, MessageType};

fn send_resize(stream: &mut UnixStream, cols: u16, rows: u16) -> Result<()> {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&(rows as u32).to_ne_bytes());
    payload.extend_from_slice(&(cols as u32).to_ne_bytes());
    protocol::send_message(stream, MessageType::Resize, &payload)
}

/// `COMMAND=new-session`: the server allocates one PTY/shell and returns its
/// master fd directly (no pane_count/grid sequence — there is nothing to
/// restore for a session that did not exist a moment ago).
pub fn start_new_session(stream: &mut UnixStream, cols: u16, rows: u16) -> Result<Window> {
    send_resize(stream, cols, rows)?;
    protocol::send_message(stream, MessageType::Command, b"new-session\0")?;
    let fd = protocol::recv_fd(stream)?
        .ok_or_else(|| MuxError::Socket("server did not pass a PTY fd".into()))?;

    let mut window = Window::create("muxkit");
    let geometry = compute_layout(cols, rows, 1)[0];
    let slot = window.create_pane(geometry.sx, geometry.sy, geometry.xoff, geometry.yoff);
    let pane = window.panes.get_mut(slot).unwrap();
    pane.set_master_fd(fd, -1);
    let _ = pane.push_winsize();
    Ok(window)
}

/// `DETACH` with a non-empty, 4-byte session id payload: receive every
/// pane's fd and every stored grid snapshot, rebuild the window, and replay
/// each snapshot into its pane's live grid and cursor (§4.F).
pub fn attach_session(stream: &mut UnixStream, session_id: u32, cols: u16, rows: u16) -> Result<Window> {
    send_resize(stream, cols, rows)?;
    let mut payload = Vec::with_capacity(4);
    payload.extend_from_slice(&session_id.to_ne_bytes());
    protocol::send_message(stream, MessageType::Detach, &payload)?;

    let mut count_buf = [0u8; 4];
    protocol::read_exact_retry(stream, &mut count_buf).map_err(MuxError::Io)?;
    let pane_count = u32::from_ne_bytes(count_buf) as usize;
    if pane_count == 0 {
        return Err(MuxError::SessionNotFound(session_id.to_string()));
    }

    let geometries = compute_layout(cols, rows, pane_count);
    let mut window = Window::create(format!("session-{session_id}"));
    let mut pane_slots = Vec::with_capacity(pane_count);
    for geometry in &geometries {
        let fd = protocol::recv_fd(stream)?
            .ok_or_else(|| MuxError::Socket("expected a pane fd during attach".into()))?;
        let slot = window.create_pane(geometry.sx, geometry.sy, geometry.xoff, geometry.yoff);
        let pane = window.panes.get_mut(slot).unwrap();
        pane.set_master_fd(fd, -1);
        let _ = pane.push_winsize();
        pane_slots.push(slot);
    }

    let mut grid_count_buf = [0u8; 4];
    protocol::read_exact_retry(stream, &mut grid_count_buf).map_err(MuxError::Io)?;
    let grid_count = u32::from_ne_bytes(grid_count_buf);

    for _ in 0..grid_count {
        let header = protocol::recv_header(stream)?;
        if header.msg_type != MessageType::GridSave || header.len == 0 {
            return Err(MuxError::Protocol("expected non-empty GRID_SAVE".into()));
        }
        let buf = protocol::recv_payload(stream, header.len)?;
        let (grid, pane_id, cx, cy) = Grid::deserialize(&buf)?;
        if let Some(&slot) = pane_slots
            .iter()
            .find(|&&s| window.panes.get(s).map(|p| p.id) == Some(pane_id))
        {
            let pane = window.panes.get_mut(slot).unwrap();
            pane.grid = grid;
            pane.cx = cx as usize;
            pane.cy = cy as usize;
            sync_vterm_from_grid(pane);
        }
    }

    if let Some(&first) = pane_slots.first() {
        window.set_active(first);
    }
    Ok(window)
}

/// Reset the pane's VT parser to a fresh escape-sequence state machine (any
/// mid-sequence state from before detach is meaningless against a
/// just-restored grid) and line up its carried SGR state with the cell under
/// the restored cursor, so the next PTY byte that doesn't reissue an
/// explicit SGR code keeps rendering with the colors/attributes already on
/// screen instead of reverting to defaults (§6).
fn sync_vterm_from_grid(pane: &mut crate::pane::Pane) {
    pane.parser = vte::Parser::new();
    let cx = pane.cx.min(pane.grid.width.saturating_sub(1));
    let cy = pane.cy.min(pane.grid.height.saturating_sub(1));
    let cell = pane.grid.cell(cx, cy);
    pane.sgr = crate::vtbridge::SgrState {
        fg: cell.fg,
        bg: cell.bg,
        attr: cell.attr,
        flags: cell.flags,
    };
}
