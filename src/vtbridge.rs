//! Binds the out-of-scope VT/ANSI tokenizer (`vte::Parser`) to the in-scope
//! grid. `vte` only tokenizes escape sequences; turning those tokens into
//! cell writes, cursor moves, and scrollback pushes is component C's job
//! (§1, §6) and lives here as a `vte::Perform` implementation over
//! [`crate::pane::Pane`].

use vte::{Params, Perform};

use crate::grid::{attr, flags, Cell};
use crate::pane::Pane;

/// Current SGR (Select Graphic Rendition) state carried between `print`
/// calls, analogous to the `screen`/cursor-attribute state `libvterm` keeps
/// internally.
#[derive(Debug, Clone, Copy)]
pub struct SgrState {
    pub fg: u8,
    pub bg: u8,
    pub attr: u8,
    pub flags: u8,
}

impl Default for SgrState {
    fn default() -> Self {
        SgrState {
            fg: 0,
            bg: 0,
            attr: 0,
            flags: flags::DEFAULT_BOTH,
        }
    }
}

impl Pane {
    /// Feed raw PTY output bytes through the VT tokenizer, driving this
    /// pane's grid via the `Perform` impl below. The parser is temporarily
    /// taken out of `self` so it can be handed bytes one at a time while
    /// `self` itself is the performer (`vte::Parser` has no interior
    /// mutability of its own, so aliasing them requires splitting the
    /// field out for the duration of the call).
    pub fn feed_pty_output(&mut self, data: &[u8]) {
        let mut parser = std::mem::take(&mut self.parser);
        parser.advance(self, data);
        self.parser = parser;
    }

    fn advance_cursor(&mut self, cell_width: u8) {
        self.cx += cell_width as usize;
        if self.cx >= self.grid.width {
            // Ran off the right margin mid-print: the next row continues
            // this same logical line (§4.B).
            self.wrap_line(true);
        }
    }

    /// Move to the next row, scrolling if it would run past the bottom.
    /// `continuation` marks whether the row being entered continues the
    /// one above it (an auto-wrap) or starts a fresh logical line (an
    /// explicit newline) — it is stamped onto the entered row's flag, not
    /// read back from whatever row was written last (§4.B).
    fn wrap_line(&mut self, continuation: bool) {
        self.cx = 0;
        self.cy += 1;
        if self.cy >= self.grid.height {
            self.scroll_one_line();
            let last = self.grid.height - 1;
            self.row_continuation[last] = continuation;
        } else {
            self.row_continuation[self.cy] = continuation;
        }
    }

    /// Scroll the live grid up one row, pushing the vacated top row (with
    /// its own continuation flag, not some other row's) into history — the
    /// "line scrolled off the top" event from §4.C.
    fn scroll_one_line(&mut self) {
        let top: Vec<Cell> = self.grid.live_row(0).to_vec();
        self.grid.push_history(&top, self.row_continuation[0]);
        for y in 1..self.grid.height {
            for x in 0..self.grid.width {
                let cell = *self.grid.cell(x, y);
                *self.grid.cell_mut(x, y - 1) = cell;
            }
            self.row_continuation[y - 1] = self.row_continuation[y];
        }
        let last = self.grid.height - 1;
        for x in 0..self.grid.width {
            *self.grid.cell_mut(x, last) = Cell::blank_default();
        }
        self.row_continuation[last] = false;
        self.cy = self.grid.height - 1;
    }

    fn write_cell(&mut self, glyph: &str, width: u8) {
        if self.cy >= self.grid.height {
            self.cy = self.grid.height - 1;
        }
        let sgr = self.sgr;
        let cell = Cell::new(glyph, width, sgr.fg, sgr.bg, sgr.attr, sgr.flags);
        *self.grid.cell_mut(self.cx, self.cy) = cell;
        if width == 2 && self.cx + 1 < self.grid.width {
            *self.grid.cell_mut(self.cx + 1, self.cy) = Cell::blank();
        }
        self.advance_cursor(width);
    }
}

fn display_width(c: char) -> u8 {
    // A simplified east-asian-width heuristic: CJK / fullwidth blocks count
    // as 2 columns, everything else as 1. Matches the wide-cell contract in
    // §3/§4.B without pulling in a dedicated width table.
    let cp = c as u32;
    let wide = (0x1100..=0x115F).contains(&cp)
        || (0x2E80..=0xA4CF).contains(&cp)
        || (0xAC00..=0xD7A3).contains(&cp)
        || (0xF900..=0xFAFF).contains(&cp)
        || (0xFF00..=0xFF60).contains(&cp)
        || (0xFFE0..=0xFFE6).contains(&cp)
        || (0x20000..=0x3FFFD).contains(&cp);
    if wide {
        2
    } else {
        1
    }
}

impl Perform for Pane {
    fn print(&mut self, c: char) {
        let width = display_width(c);
        let mut buf = [0u8; 4];
        self.write_cell(c.encode_utf8(&mut buf), width);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.wrap_line(false),
            b'\r' => self.cx = 0,
            0x08 => self.cx = self.cx.saturating_sub(1), // backspace
            b'\t' => {
                let next_stop = ((self.cx / 8) + 1) * 8;
                self.cx = next_stop.min(self.grid.width - 1);
            }
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        let nums: Vec<i64> = params.iter().map(|p| p.first().copied().unwrap_or(0) as i64).collect();
        let arg = |i: usize, default: i64| -> i64 {
            nums.get(i).copied().filter(|&v| v != 0).unwrap_or(default)
        };

        match action {
            'A' => self.cy = self.cy.saturating_sub(arg(0, 1) as usize),
            'B' => self.cy = (self.cy + arg(0, 1) as usize).min(self.grid.height - 1),
            'C' => self.cx = (self.cx + arg(0, 1) as usize).min(self.grid.width - 1),
            'D' => self.cx = self.cx.saturating_sub(arg(0, 1) as usize),
            'H' | 'f' => {
                let row = arg(0, 1).max(1) as usize - 1;
                let col = arg(1, 1).max(1) as usize - 1;
                self.cy = row.min(self.grid.height - 1);
                self.cx = col.min(self.grid.width - 1);
            }
            'J' => self.erase_in_display(nums.first().copied().unwrap_or(0)),
            'K' => self.erase_in_line(nums.first().copied().unwrap_or(0)),
            'm' => self.sgr_dispatch(&nums),
            'n' => {
                if nums.first().copied() == Some(6) {
                    let report = format!("\x1b[{};{}R", self.cy + 1, self.cx + 1);
                    self.write_output(report.as_bytes());
                }
            }
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, byte: u8) {
        if byte == b'c' {
            // RIS: full reset.
            self.cx = 0;
            self.cy = 0;
            self.sgr = SgrState::default();
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}
    fn put(&mut self, _byte: u8) {}
    fn unhook(&mut self) {}
    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}
}

impl Pane {
    fn erase_in_display(&mut self, mode: i64) {
        let (w, h) = (self.grid.width, self.grid.height);
        match mode {
            0 => {
                self.erase_in_line(0);
                for y in (self.cy + 1)..h {
                    for x in 0..w {
                        *self.grid.cell_mut(x, y) = Cell::blank_default();
                    }
                }
            }
            1 => {
                for y in 0..self.cy {
                    for x in 0..w {
                        *self.grid.cell_mut(x, y) = Cell::blank_default();
                    }
                }
                self.erase_in_line(1);
            }
            _ => {
                for y in 0..h {
                    for x in 0..w {
                        *self.grid.cell_mut(x, y) = Cell::blank_default();
                    }
                }
            }
        }
    }

    fn erase_in_line(&mut self, mode: i64) {
        let w = self.grid.width;
        let (from, to) = match mode {
            0 => (self.cx, w),
            1 => (0, self.cx + 1),
            _ => (0, w),
        };
        for x in from..to.min(w) {
            *self.grid.cell_mut(x, self.cy) = Cell::blank_default();
        }
    }

    fn sgr_dispatch(&mut self, nums: &[i64]) {
        if nums.is_empty() {
            self.sgr = SgrState::default();
            return;
        }
        let mut i = 0;
        while i < nums.len() {
            match nums[i] {
                0 => self.sgr = SgrState::default(),
                1 => self.sgr.attr |= attr::BOLD,
                4 => self.sgr.attr |= attr::UNDERLINE,
                3 => self.sgr.attr |= attr::ITALIC,
                7 => self.sgr.attr |= attr::REVERSE,
                22 => self.sgr.attr &= !attr::BOLD,
                24 => self.sgr.attr &= !attr::UNDERLINE,
                23 => self.sgr.attr &= !attr::ITALIC,
                27 => self.sgr.attr &= !attr::REVERSE,
                30..=37 => {
                    self.sgr.fg = (nums[i] - 30) as u8;
                    self.sgr.flags &= !flags::DEFAULT_FG;
                }
                39 => self.sgr.flags |= flags::DEFAULT_FG,
                40..=47 => {
                    self.sgr.bg = (nums[i] - 40) as u8;
                    self.sgr.flags &= !flags::DEFAULT_BG;
                }
                49 => self.sgr.flags |= flags::DEFAULT_BG,
                38 if nums.get(i + 1) == Some(&5) => {
                    if let Some(idx) = nums.get(i + 2) {
                        self.sgr.fg = *idx as u8;
                        self.sgr.flags &= !flags::DEFAULT_FG;
                    }
                    i += 2;
                }
                48 if nums.get(i + 1) == Some(&5) => {
                    if let Some(idx) = nums.get(i + 2) {
                        self.sgr.bg = *idx as u8;
                        self.sgr.flags &= !flags::DEFAULT_BG;
                    }
                    i += 2;
                }
                _ => {}
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::pane::Pane;

    #[test]
    fn scroll_tags_history_row_with_its_own_continuation_flag() {
        // 4 columns x 2 rows: small enough that a handful of bytes forces
        // both an auto-wrap and a scroll.
        let mut pane = Pane::new(0, 4, 2, 0, 0);

        // "ABCD" fills row 0 exactly; the next byte auto-wraps onto row 1,
        // which is therefore a continuation of row 0.
        pane.feed_pty_output(b"ABCDE");
        // An explicit newline starts a fresh logical line on a fresh row,
        // which scrolls row 0 ("ABCD") off the top.
        pane.feed_pty_output(b"\n");
        assert!(
            !pane.grid.history_flag_at(0),
            "row 0 (\"ABCD\") started a fresh logical line and must not be tagged as a continuation"
        );

        // Fill the new row 1 ("E...") until it auto-wraps again, scrolling
        // the "E" row (a continuation of the evicted "ABCD" row) off the
        // top in turn.
        pane.feed_pty_output(b"FGHI");
        assert!(
            pane.grid.history_flag_at(1),
            "row that held \"E\" was entered via auto-wrap and must be tagged as a continuation"
        );
    }
}
