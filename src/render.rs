//! Cell-array to ANSI escape stream renderer: delta-encoded SGR, the status
//! bar, and pane borders (§4.G).

use std::io::{self, Write};

use crate::grid::{attr, flags, Cell};
use crate::pane::{Pane, Window};

const RESET: &[u8] = b"\x1b[0m";

/// Tracks the last emitted `(fg, bg, attr, flags)` so only genuine changes
/// between consecutive cells cost an SGR sequence.
#[derive(Default)]
pub struct Renderer {
    last: Option<(u8, u8, u8, u8)>,
}

impl Renderer {
    pub fn new() -> Self {
        Renderer { last: None }
    }

    fn emit_sgr(&mut self, out: &mut impl Write, cell: &Cell) -> io::Result<()> {
        let state = (cell.fg, cell.bg, cell.attr, cell.flags);
        if self.last == Some(state) {
            return Ok(());
        }
        self.last = Some(state);

        out.write_all(RESET)?;
        let mut codes = Vec::new();
        if cell.attr & attr::BOLD != 0 {
            codes.push("1");
        }
        if cell.attr & attr::UNDERLINE != 0 {
            codes.push("4");
        }
        if cell.attr & attr::ITALIC != 0 {
            codes.push("3");
        }
        if cell.attr & attr::REVERSE != 0 {
            codes.push("7");
        }
        if !codes.is_empty() {
            write!(out, "\x1b[{}m", codes.join(";"))?;
        }
        if cell.flags & flags::DEFAULT_FG == 0 {
            write!(out, "\x1b[38;5;{}m", cell.fg)?;
        }
        if cell.flags & flags::DEFAULT_BG == 0 {
            write!(out, "\x1b[48;5;{}m", cell.bg)?;
        }
        Ok(())
    }

    /// Render one pane: position, emit every visible row, then place (or
    /// hide) the cursor.
    pub fn render_pane(&mut self, out: &mut impl Write, pane: &Pane) -> io::Result<()> {
        write!(out, "\x1b[?25l")?; // hide cursor
        for y in 0..pane.sy {
            write!(out, "\x1b[{};{}H", pane.yoff + y + 1, pane.xoff + 1)?;
            let row = pane.grid.display_row(y);
            match row {
                Some(display) => {
                    for cell in display.cells() {
                        self.emit_sgr(out, cell)?;
                        out.write_all(cell.glyph().as_bytes())?;
                    }
                }
                None => {
                    write!(out, "{}", " ".repeat(pane.sx))?;
                }
            }
        }
        out.write_all(RESET)?;
        self.last = None;

        if pane.grid.scroll_offset() == 0 {
            write!(
                out,
                "\x1b[{};{}H\x1b[?25h",
                pane.yoff + pane.cy + 1,
                pane.xoff + pane.cx + 1
            )?;
        }
        Ok(())
    }

    /// Vertical box-drawing borders between panes that are not last in the
    /// window (§4.G).
    pub fn render_borders(&self, out: &mut impl Write, window: &Window) -> io::Result<()> {
        let indices: Vec<usize> = window.panes.iter_indices().collect();
        for (pos, idx) in indices.iter().enumerate() {
            if pos + 1 == indices.len() {
                continue;
            }
            let pane = window.panes.get(*idx).unwrap();
            let col = pane.xoff + pane.sx + 1;
            for row in 0..pane.sy {
                write!(out, "\x1b[{};{}H\u{2502}", pane.yoff + row + 1, col)?;
            }
        }
        Ok(())
    }

    /// Bottom-row status bar: inverse-background prefix, window name,
    /// optional history marker, right-margin version string.
    pub fn render_status_bar(
        &self,
        out: &mut impl Write,
        rows: u16,
        cols: u16,
        window_name: &str,
        any_scrolled: bool,
        history_marker: &str,
        version: &str,
    ) -> io::Result<()> {
        write!(out, "\x1b[{};1H", rows)?;
        write!(out, "\x1b[7;34;47m")?; // inverse blue/white
        let mut left = format!(" {window_name} ");
        if any_scrolled {
            left.push_str(history_marker);
            left.push(' ');
        }
        let left_width = display_width_str(&left);
        let version_width = display_width_str(version);
        let total = cols as usize;
        let pad = total.saturating_sub(left_width + version_width);
        write!(out, "{left}{}{version}", " ".repeat(pad))?;
        write!(out, "\x1b[K")?;
        out.write_all(RESET)?;
        Ok(())
    }
}

/// Display-width of a UTF-8 string per §4.G: a leading byte ≥ 0xE0 (other
/// than a 2-byte-sequence lead, i.e. 3+ byte sequences and above) counts its
/// glyph as 2 columns; everything else counts as 1.
pub fn display_width_str(s: &str) -> usize {
    let mut width = 0usize;
    for b in s.bytes() {
        // Only count on lead bytes; continuation bytes (0x80..=0xBF) don't
        // add width.
        if b & 0xC0 == 0x80 {
            continue;
        }
        if b >= 0xE0 {
            width += 2;
        } else {
            width += 1;
        }
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_width_is_one_per_char() {
        assert_eq!(display_width_str("abc"), 3);
    }

    #[test]
    fn three_byte_utf8_counts_as_two_columns() {
        // U+4E2D "中" encodes as a 3-byte sequence (lead byte 0xE4).
        assert_eq!(display_width_str("中"), 2);
    }

    #[test]
    fn two_byte_utf8_counts_as_one_column() {
        // U+00E9 "é" encodes as a 2-byte sequence (lead byte 0xC3).
        assert_eq!(display_width_str("é"), 1);
    }

    #[test]
    fn renderer_skips_redundant_sgr() {
        let mut r = Renderer::new();
        let mut out = Vec::new();
        let cell = Cell::new("x", 1, 1, 2, 0, 0);
        r.emit_sgr(&mut out, &cell).unwrap();
        let after_first = out.len();
        r.emit_sgr(&mut out, &cell).unwrap();
        assert_eq!(out.len(), after_first, "identical state must not re-emit SGR");
    }
}
