//! Window and pane model: geometry, id allocation, PTY master ownership,
//! and VT-parser binding (§4.C).

use std::os::unix::io::RawFd;

use nix::unistd::write as nix_write;

use crate::error::Result;
use crate::grid::Grid;
use crate::list::IntrusiveList;
use crate::vtbridge::SgrState;

/// A rectangular sub-region of the terminal with its own shell and grid.
pub struct Pane {
    pub id: u32,
    pub grid: Grid,
    pub cx: usize,
    pub cy: usize,
    pub xoff: usize,
    pub yoff: usize,
    pub sx: usize,
    pub sy: usize,
    pub master_fd: Option<RawFd>,
    pub pid: Option<i32>,
    pub(crate) parser: vte::Parser,
    pub(crate) sgr: SgrState,
    /// Per live-row flag: true if that row continues (via auto-wrap) the
    /// row above it, rather than starting a fresh logical line (§4.B).
    pub(crate) row_continuation: Vec<bool>,
}

impl Pane {
    pub fn new(id: u32, sx: usize, sy: usize, xoff: usize, yoff: usize) -> Self {
        Pane {
            id,
            grid: Grid::new(sx, sy),
            cx: 0,
            cy: 0,
            xoff,
            yoff,
            sx,
            sy,
            master_fd: None,
            pid: None,
            parser: vte::Parser::new(),
            sgr: SgrState::default(),
            row_continuation: vec![false; sy],
        }
    }

    /// Attach the PTY master and re-bind the parser's output callback to
    /// write to it (§4.C `pane_set_master_fd`).
    pub fn set_master_fd(&mut self, fd: RawFd, pid: i32) {
        self.master_fd = Some(fd);
        self.pid = Some(pid);
    }

    /// Write parser-generated responses (e.g. a cursor position report)
    /// back to the PTY master, per §6's output-callback contract.
    pub fn write_output(&self, bytes: &[u8]) {
        if let Some(fd) = self.master_fd {
            let mut remaining = bytes;
            while !remaining.is_empty() {
                match nix_write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, remaining) {
                    Ok(0) => break,
                    Ok(n) => remaining = &remaining[n..],
                    Err(nix::Error::EINTR) => continue,
                    Err(_) => break,
                }
            }
        }
    }

    /// Reallocate the grid to new dimensions, copying the top-left overlap
    /// and clamping the cursor. Does not reflow history (§4.C).
    pub fn resize(&mut self, sx: usize, sy: usize) {
        self.grid.resize(sx, sy);
        self.sx = sx;
        self.sy = sy;
        self.cx = self.cx.min(sx.saturating_sub(1));
        self.cy = self.cy.min(sy.saturating_sub(1));
        self.row_continuation.resize(sy, false);
    }

    /// Push the PTY's window size to the kernel so the shell's line
    /// discipline sees the new geometry.
    pub fn push_winsize(&self) -> Result<()> {
        if let Some(fd) = self.master_fd {
            let ws = libc::winsize {
                ws_row: self.sy as libc::c_ushort,
                ws_col: self.sx as libc::c_ushort,
                ws_xpixel: 0,
                ws_ypixel: 0,
            };
            unsafe {
                libc::ioctl(fd, libc::TIOCSWINSZ, &ws);
            }
        }
        Ok(())
    }
}

/// Ordered set of panes sharing screen real estate.
pub struct Window {
    pub id: u32,
    pub name: String,
    pub panes: IntrusiveList<Pane>,
    pub active: Option<usize>,
    next_pane_id: u32,
}

impl Window {
    pub fn create(name: impl Into<String>) -> Self {
        Window {
            id: 0,
            name: name.into(),
            panes: IntrusiveList::new(),
            active: None,
            next_pane_id: 0,
        }
    }

    /// Allocate a pane with the next monotonic id in this window and make
    /// it active if it is the first pane created.
    pub fn create_pane(&mut self, sx: usize, sy: usize, xoff: usize, yoff: usize) -> usize {
        let id = self.next_pane_id;
        self.next_pane_id += 1;
        let pane = Pane::new(id, sx, sy, xoff, yoff);
        let slot = self.panes.insert_tail(pane);
        if self.active.is_none() {
            self.active = Some(slot);
        }
        slot
    }

    pub fn destroy_pane(&mut self, slot: usize) -> Option<Pane> {
        let removed = self.panes.unlink(slot);
        if self.active == Some(slot) {
            self.active = self.panes.front();
        }
        removed
    }

    pub fn active_pane(&self) -> Option<&Pane> {
        self.active.and_then(|slot| self.panes.get(slot))
    }

    pub fn active_pane_mut(&mut self) -> Option<&mut Pane> {
        self.active.and_then(move |slot| self.panes.get_mut(slot))
    }

    pub fn pane_count(&self) -> usize {
        self.panes.count()
    }

    pub fn set_active(&mut self, slot: usize) {
        if self.panes.get(slot).is_some() {
            self.active = Some(slot);
        }
    }

    /// Select the next pane in creation order, wrapping around.
    pub fn activate_next(&mut self) {
        let indices: Vec<usize> = self.panes.iter_indices().collect();
        if indices.is_empty() {
            return;
        }
        let current = self.active.and_then(|a| indices.iter().position(|&i| i == a));
        let next_pos = current.map(|p| (p + 1) % indices.len()).unwrap_or(0);
        self.active = Some(indices[next_pos]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pane_ids_are_monotonic_per_window() {
        let mut w = Window::create("work");
        let a = w.create_pane(80, 24, 0, 0);
        let b = w.create_pane(40, 24, 81, 0);
        assert_eq!(w.panes.get(a).unwrap().id, 0);
        assert_eq!(w.panes.get(b).unwrap().id, 1);
        assert_eq!(w.active, Some(a));
    }

    #[test]
    fn activate_next_wraps_around() {
        let mut w = Window::create("work");
        let a = w.create_pane(10, 10, 0, 0);
        let b = w.create_pane(10, 10, 11, 0);
        assert_eq!(w.active, Some(a));
        w.activate_next();
        assert_eq!(w.active, Some(b));
        w.activate_next();
        assert_eq!(w.active, Some(a));
    }

    #[test]
    fn destroy_pane_reassigns_active() {
        let mut w = Window::create("work");
        let a = w.create_pane(10, 10, 0, 0);
        let b = w.create_pane(10, 10, 11, 0);
        w.set_active(a);
        w.destroy_pane(a);
        assert_eq!(w.active, Some(b));
    }

    #[test]
    fn resize_clamps_cursor() {
        let mut p = Pane::new(0, 10, 10, 0, 0);
        p.cx = 9;
        p.cy = 9;
        p.resize(4, 4);
        assert_eq!(p.cx, 3);
        assert_eq!(p.cy, 3);
    }
}
