//! Per-pane cell grid, circular scrollback history, reflow-on-resize, and
//! the binary snapshot format exchanged as a `GRID_SAVE` payload.

use crate::error::{MuxError, Result};

/// Cell attribute bits: bold, underline, italic, reverse.
pub mod attr {
    pub const BOLD: u8 = 0b0001;
    pub const UNDERLINE: u8 = 0b0010;
    pub const ITALIC: u8 = 0b0100;
    pub const REVERSE: u8 = 0b1000;
}

/// Cell flag bits: default foreground, default background.
pub mod flags {
    pub const DEFAULT_FG: u8 = 0b01;
    pub const DEFAULT_BG: u8 = 0b10;
    pub const DEFAULT_BOTH: u8 = DEFAULT_FG | DEFAULT_BG;
}

const CELL_GLYPH_LEN: usize = 4;
/// On-wire size of a cell: 4-byte glyph + terminator + width + fg + bg + attr + flags.
pub const CELL_SIZE: usize = CELL_GLYPH_LEN + 1 + 1 + 1 + 1 + 1 + 1;

/// Minimum addressable screen position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    glyph: [u8; CELL_GLYPH_LEN],
    glyph_len: u8,
    pub width: u8,
    pub fg: u8,
    pub bg: u8,
    pub attr: u8,
    pub flags: u8,
}

impl Cell {
    pub fn blank() -> Self {
        Cell {
            glyph: [b' ', 0, 0, 0],
            glyph_len: 1,
            width: 1,
            fg: 0,
            bg: 0,
            attr: 0,
            flags: 0,
        }
    }

    /// A blank cell carrying the default-color flags, used to pad reflowed
    /// output rows so they do not render with a stray background (§4.B.5).
    pub fn blank_default() -> Self {
        Cell {
            flags: flags::DEFAULT_BOTH,
            ..Cell::blank()
        }
    }

    pub fn new(glyph: &str, width: u8, fg: u8, bg: u8, attr: u8, flags: u8) -> Self {
        let bytes = glyph.as_bytes();
        let len = bytes.len().min(CELL_GLYPH_LEN);
        let mut buf = [0u8; CELL_GLYPH_LEN];
        buf[..len].copy_from_slice(&bytes[..len]);
        Cell {
            glyph: buf,
            glyph_len: len as u8,
            width: width.max(1),
            fg,
            bg,
            attr,
            flags,
        }
    }

    pub fn glyph(&self) -> &str {
        std::str::from_utf8(&self.glyph[..self.glyph_len as usize]).unwrap_or(" ")
    }

    /// A cell is "visually blank" for reflow trimming if its glyph is a
    /// space or the zero cell.
    pub fn is_visually_blank(&self) -> bool {
        self.glyph_len == 0 || self.glyph() == " "
    }

    fn write_wire(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.glyph);
        out.push(self.glyph_len);
        out.push(self.width);
        out.push(self.fg);
        out.push(self.bg);
        out.push(self.attr);
        out.push(self.flags);
    }

    fn read_wire(buf: &[u8]) -> Cell {
        let mut glyph = [0u8; CELL_GLYPH_LEN];
        glyph.copy_from_slice(&buf[0..CELL_GLYPH_LEN]);
        Cell {
            glyph,
            glyph_len: buf[4],
            width: buf[5],
            fg: buf[6],
            bg: buf[7],
            attr: buf[8],
            flags: buf[9],
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::blank()
    }
}

const HEADER_U32_COUNT: usize = 8;
const HEADER_SIZE: usize = HEADER_U32_COUNT * 4;
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Rectangular cell buffer plus its circular scrollback history.
pub struct Grid {
    pub width: usize,
    pub height: usize,
    cells: Vec<Cell>,

    history_max: usize,
    history_cells: Vec<Cell>,
    history_line_flags: Vec<u8>,
    /// Monotonic count of lines ever pushed into history.
    write_count: u64,
    /// Current scroll offset, 0 == viewing the live grid.
    scroll_offset: u64,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_history(width, height, DEFAULT_HISTORY_SIZE)
    }

    pub fn with_history(width: usize, height: usize, history_max: usize) -> Self {
        Grid {
            width,
            height,
            cells: vec![Cell::blank(); width * height],
            history_max,
            history_cells: vec![Cell::blank(); history_max * width],
            history_line_flags: vec![0u8; history_max],
            write_count: 0,
            scroll_offset: 0,
        }
    }

    pub fn history_count(&self) -> u64 {
        self.write_count
    }

    pub fn scroll_offset(&self) -> u64 {
        self.scroll_offset
    }

    fn stored_rows(&self) -> u64 {
        self.write_count.min(self.history_max as u64)
    }

    pub fn cell(&self, x: usize, y: usize) -> &Cell {
        &self.cells[y * self.width + x]
    }

    pub fn cell_mut(&mut self, x: usize, y: usize) -> &mut Cell {
        &mut self.cells[y * self.width + x]
    }

    pub fn live_row(&self, y: usize) -> &[Cell] {
        &self.cells[y * self.width..(y + 1) * self.width]
    }

    fn history_row(&self, slot: u64) -> &[Cell] {
        let start = slot as usize * self.width;
        &self.history_cells[start..start + self.width]
    }

    /// Push one row that scrolled off the top of the live grid, with its
    /// continuation flag. Cells beyond `width` are ignored; cells short of
    /// `width` are left blank.
    pub fn push_history(&mut self, cols: &[Cell], continuation: bool) {
        let slot = (self.write_count % self.history_max as u64) as usize;
        let dst_start = slot * self.width;
        let n = cols.len().min(self.width);
        self.history_cells[dst_start..dst_start + n].copy_from_slice(&cols[..n]);
        for c in &mut self.history_cells[dst_start + n..dst_start + self.width] {
            *c = Cell::blank();
        }
        self.history_line_flags[slot] = continuation as u8;
        self.write_count += 1;
    }

    /// Continuation flag of the history row pushed at absolute write index
    /// `write_index` (i.e. the `C` value at the time it was pushed).
    pub fn history_flag_at(&self, write_index: u64) -> bool {
        let slot = (write_index % self.history_max as u64) as usize;
        self.history_line_flags[slot] != 0
    }

    pub fn scroll_up(&mut self, n: u64) {
        let cap = self.stored_rows();
        self.scroll_offset = (self.scroll_offset + n).min(cap);
    }

    pub fn scroll_down(&mut self, n: u64) {
        self.scroll_offset = self.scroll_offset.saturating_sub(n);
    }

    /// Resolve what should be displayed at pane-local row `y`, per §4.B's
    /// scroll resolution algorithm. `None` means a blank row out of range.
    pub fn display_row(&self, y: usize) -> Option<DisplayRow<'_>> {
        if self.scroll_offset == 0 {
            return Some(DisplayRow::Live(self.live_row(y)));
        }
        let a = self.stored_rows() as i64;
        let h = a - self.scroll_offset as i64 + y as i64;
        if h < 0 {
            return None;
        }
        if h >= a {
            return Some(DisplayRow::Live(self.live_row((h - a) as usize)));
        }
        let slot = if self.write_count <= self.history_max as u64 {
            h as u64
        } else {
            (self.write_count % self.history_max as u64 + h as u64) % self.history_max as u64
        };
        Some(DisplayRow::History(self.history_row(slot)))
    }

    /// Linearize the history ring into oldest-first row/flag arrays.
    fn linearize_history(&self) -> (Vec<Cell>, Vec<u8>) {
        let stored = self.stored_rows() as usize;
        let mut rows = Vec::with_capacity(stored * self.width);
        let mut line_flags = Vec::with_capacity(stored);
        let start = if self.write_count <= self.history_max as u64 {
            0
        } else {
            (self.write_count % self.history_max as u64) as usize
        };
        for i in 0..stored {
            let slot = (start + i) % self.history_max;
            rows.extend_from_slice(self.history_row(slot as u64));
            line_flags.push(self.history_line_flags[slot]);
        }
        (rows, line_flags)
    }

    /// Reallocate live cells to a new size, copying the overlapping
    /// top-left region. Does not touch history (`resize_history` is the
    /// separate, explicit reflow call).
    pub fn resize(&mut self, new_width: usize, new_height: usize) {
        let mut new_cells = vec![Cell::blank(); new_width * new_height];
        let copy_w = self.width.min(new_width);
        let copy_h = self.height.min(new_height);
        for y in 0..copy_h {
            let src = &self.cells[y * self.width..y * self.width + copy_w];
            let dst_start = y * new_width;
            new_cells[dst_start..dst_start + copy_w].copy_from_slice(src);
        }
        self.cells = new_cells;
        self.width = new_width;
        self.height = new_height;
    }

    /// Reflow history to a new width, following §4.B's algorithm.
    pub fn resize_history(&mut self, new_width: usize) {
        if new_width == self.width {
            return;
        }
        let (rows, line_flags) = self.linearize_history();
        let old_width = self.width;

        // Reconstruct logical lines.
        let mut logical_lines: Vec<Vec<Cell>> = Vec::new();
        let mut i = 0usize;
        let stored = line_flags.len();
        while i < stored {
            let mut line = rows[i * old_width..(i + 1) * old_width].to_vec();
            i += 1;
            while i < stored && line_flags[i] == 1 {
                line.extend_from_slice(&rows[i * old_width..(i + 1) * old_width]);
                i += 1;
            }
            logical_lines.push(line);
        }

        // Trim trailing visually-blank cells from each logical line.
        for line in &mut logical_lines {
            while line.last().map(|c| c.is_visually_blank()).unwrap_or(false) {
                line.pop();
            }
        }

        // Re-lay into output rows of the new width.
        let mut out_rows: Vec<Vec<Cell>> = Vec::new();
        let mut out_flags: Vec<u8> = Vec::new();
        for line in logical_lines {
            if line.is_empty() {
                out_rows.push(vec![Cell::blank_default(); new_width]);
                out_flags.push(0);
                continue;
            }
            let mut idx = 0usize;
            let mut first = true;
            while idx < line.len() {
                let mut row = vec![Cell::blank_default(); new_width];
                let mut col = 0usize;
                while col < new_width && idx < line.len() {
                    let cell = line[idx];
                    // A wide cell must not be split across the boundary:
                    // if it would land exactly on the last column, pad
                    // with a blank placeholder and carry the cell to the
                    // next output row instead.
                    if cell.width == 2 && col + 1 == new_width {
                        row[col] = Cell::blank_default();
                        break;
                    }
                    row[col] = cell;
                    col += cell.width.max(1) as usize;
                    idx += 1;
                }
                out_flags.push(if first { 0 } else { 1 });
                out_rows.push(row);
                first = false;
            }
        }

        // Trim trailing fully-blank output rows.
        while out_rows
            .last()
            .map(|r| r.iter().all(|c| c.is_visually_blank()))
            .unwrap_or(false)
            && out_flags.last() == Some(&0)
        {
            out_rows.pop();
            out_flags.pop();
        }

        // Keep only the last `history_max` rows.
        let keep_from = out_rows.len().saturating_sub(self.history_max);
        let kept_rows = &out_rows[keep_from..];
        let kept_flags = &out_flags[keep_from..];

        self.history_cells = vec![Cell::blank(); self.history_max * new_width];
        self.history_line_flags = vec![0u8; self.history_max];
        for (slot, (row, flag)) in kept_rows.iter().zip(kept_flags.iter()).enumerate() {
            let start = slot * new_width;
            self.history_cells[start..start + new_width].copy_from_slice(row);
            self.history_line_flags[slot] = *flag;
        }
        self.width = new_width;
        self.write_count = kept_rows.len() as u64;
        self.scroll_offset = self.scroll_offset.min(self.write_count);
    }

    /// Serialize `(pane_id, cx, cy)` plus this grid's live cells and
    /// linearized history per §4.B / §6.
    pub fn serialize(&self, pane_id: u32, cx: u32, cy: u32) -> Vec<u8> {
        let stored = self.stored_rows();
        let mut out = Vec::with_capacity(
            HEADER_SIZE + (self.width * self.height + stored as usize * self.width) * CELL_SIZE,
        );
        for v in [
            pane_id,
            cx,
            cy,
            self.width as u32,
            self.height as u32,
            self.history_max as u32,
            self.write_count as u32,
            self.scroll_offset as u32,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for cell in &self.cells {
            cell.write_wire(&mut out);
        }
        let (history_rows, _) = self.linearize_history();
        for cell in &history_rows {
            cell.write_wire(&mut out);
        }
        out
    }

    /// Deserialize a grid snapshot produced by `serialize`. Returns
    /// `(grid, pane_id, cx, cy)`. Resets `C` to `stored` so indexing
    /// starts from zero and the buffer is no longer treated as rotated.
    pub fn deserialize(buf: &[u8]) -> Result<(Grid, u32, u32, u32)> {
        if buf.len() < HEADER_SIZE {
            return Err(MuxError::Serialization("truncated grid header".into()));
        }
        let mut fields = [0u32; HEADER_U32_COUNT];
        for (i, field) in fields.iter_mut().enumerate() {
            let start = i * 4;
            *field = u32::from_le_bytes(buf[start..start + 4].try_into().unwrap());
        }
        let [pane_id, cx, cy, width, height, history_max, write_count, scroll_offset] = fields;
        let (width, height, history_max) = (width as usize, height as usize, history_max as usize);
        let stored = (write_count as u64).min(history_max as u64) as usize;

        let live_len = width * height * CELL_SIZE;
        let history_len = stored * width * CELL_SIZE;
        if buf.len() < HEADER_SIZE + live_len + history_len {
            return Err(MuxError::Serialization("truncated grid body".into()));
        }

        let mut cells = Vec::with_capacity(width * height);
        let mut off = HEADER_SIZE;
        for _ in 0..width * height {
            cells.push(Cell::read_wire(&buf[off..off + CELL_SIZE]));
            off += CELL_SIZE;
        }

        let mut history_cells = vec![Cell::blank(); history_max * width];
        let mut history_line_flags = vec![0u8; history_max];
        for slot in 0..stored {
            let dst = slot * width;
            for col in 0..width {
                history_cells[dst + col] = Cell::read_wire(&buf[off..off + CELL_SIZE]);
                off += CELL_SIZE;
            }
            // Continuation flags are not carried in the wire history rows
            // directly; they're implied contiguous (oldest-first) and are
            // re-derived as "not the first row of a logical line" only by
            // the reflow algorithm, so a freshly-deserialized grid treats
            // every stored row as flag 0 until the next reflow pass.
            history_line_flags[slot] = 0;
        }

        let grid = Grid {
            width,
            height,
            cells,
            history_max,
            history_cells,
            history_line_flags,
            write_count: stored as u64,
            scroll_offset: (scroll_offset as u64).min(stored as u64),
        };
        Ok((grid, pane_id, cx, cy))
    }
}

pub enum DisplayRow<'a> {
    Live(&'a [Cell]),
    History(&'a [Cell]),
}

impl<'a> DisplayRow<'a> {
    pub fn cells(&self) -> &[Cell] {
        match self {
            DisplayRow::Live(c) | DisplayRow::History(c) => c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_of(glyph: &str, width: usize) -> Vec<Cell> {
        (0..width).map(|_| Cell::new(glyph, 1, 0, 0, 0, 0)).collect()
    }

    #[test]
    fn grid_size_invariant() {
        let g = Grid::with_history(10, 5, 50);
        assert_eq!(g.cells.len(), 10 * 5);
        assert_eq!(g.history_cells.len(), 50 * 10);
    }

    #[test]
    fn s1_push_pull_history() {
        let mut g = Grid::with_history(4, 2, 3);
        for row in ["AAAA", "BBBB", "CCCC", "DDDD"] {
            let cells: Vec<Cell> = row.chars().map(|c| Cell::new(&c.to_string(), 1, 0, 0, 0, 0)).collect();
            g.push_history(&cells, false);
        }
        assert_eq!(g.history_count(), 4);
        assert_eq!(g.stored_rows(), 3);

        g.scroll_up(3);
        let line = |r: &Grid, y: usize| -> String {
            r.display_row(y).unwrap().cells().iter().map(|c| c.glyph().chars().next().unwrap()).collect()
        };
        assert_eq!(line(&g, 0), "BBBB");
        assert_eq!(line(&g, 1), "CCCC");

        g.scroll_up(1000);
        assert_eq!(g.scroll_offset(), 3);

        g.scroll_down(1);
        assert_eq!(line(&g, 0), "CCCC");
    }

    #[test]
    fn s2_reflow_narrow_to_wide() {
        let mut g = Grid::with_history(5, 1, 10);
        g.push_history(&row_text("hello"), false);
        g.push_history(&row_text("world"), true);
        g.resize_history(10);
        assert_eq!(g.history_count(), 1);
        let (rows, flags) = g.linearize_history();
        let text: String = rows.iter().map(|c| c.glyph().chars().next().unwrap_or(' ')).collect();
        assert_eq!(text.trim_end(), "helloworld");
        assert_eq!(flags, vec![0]);
    }

    #[test]
    fn s3_reflow_wide_to_narrow() {
        let mut g = Grid::with_history(8, 1, 10);
        g.push_history(&row_text("abcdef  "), false);
        g.resize_history(3);
        assert_eq!(g.history_count(), 2);
        let (rows, flags) = g.linearize_history();
        let line0: String = rows[0..3].iter().map(|c| c.glyph().chars().next().unwrap()).collect();
        let line1: String = rows[3..6].iter().map(|c| c.glyph().chars().next().unwrap()).collect();
        assert_eq!(line0, "abc");
        assert_eq!(line1, "def");
        assert_eq!(flags, vec![0, 1]);
    }

    fn row_text(s: &str) -> Vec<Cell> {
        s.chars().map(|c| Cell::new(&c.to_string(), 1, 0, 0, 0, 0)).collect()
    }

    #[test]
    fn s4_serialize_round_trip() {
        let mut g = Grid::with_history(2, 1, 1);
        *g.cell_mut(0, 0) = Cell::new("X", 1, 7, 0, 0, 0);
        *g.cell_mut(1, 0) = Cell::new("Y", 1, 4, 0, 1, 3);
        let buf = g.serialize(42, 1, 0);
        assert_eq!(buf.len(), HEADER_SIZE + 2 * CELL_SIZE);

        let (g2, pane_id, cx, cy) = Grid::deserialize(&buf).unwrap();
        assert_eq!(pane_id, 42);
        assert_eq!(cx, 1);
        assert_eq!(cy, 0);
        assert_eq!(g2.width, 2);
        assert_eq!(g2.height, 1);
        assert_eq!(*g2.cell(0, 0), *g.cell(0, 0));
        assert_eq!(*g2.cell(1, 0), *g.cell(1, 0));
    }

    #[test]
    fn round_trip_preserves_all_live_and_history_cells() {
        let mut g = Grid::with_history(3, 2, 4);
        for (i, cell) in g.cells.iter_mut().enumerate() {
            *cell = Cell::new("x", 1, i as u8, 0, 0, 0);
        }
        for n in 0..5u8 {
            let row: Vec<Cell> = (0..3).map(|i| Cell::new("h", 1, n + i, 0, 0, 0)).collect();
            g.push_history(&row, n % 2 == 1);
        }
        let buf = g.serialize(1, 0, 0);
        let (g2, ..) = Grid::deserialize(&buf).unwrap();
        assert_eq!(g2.cells, g.cells);
        let (h1, _) = g.linearize_history();
        let (h2, _) = g2.linearize_history();
        assert_eq!(h1, h2);
    }

    #[test]
    fn scrollback_bound_after_arbitrary_scrolling() {
        let mut g = Grid::with_history(2, 1, 5);
        for n in 0..20u8 {
            g.push_history(&[Cell::new("a", 1, n, 0, 0, 0), Cell::blank()], false);
        }
        g.scroll_up(100);
        assert!(g.scroll_offset() <= g.history_count().min(5));
        g.scroll_down(2);
        assert!(g.scroll_offset() <= g.history_count().min(5));
    }

    #[test]
    fn deep_reflow_preserves_glyph_sequence() {
        let mut g = Grid::with_history(4, 1, 20);
        for (idx, line) in ["once upon", "a time", "x"].iter().enumerate() {
            let padded = format!("{:<4}", &line[..line.len().min(4)]);
            let _ = idx;
            let cells: Vec<Cell> = padded.chars().map(|c| Cell::new(&c.to_string(), 1, 0, 0, 0, 0)).collect();
            g.push_history(&cells, false);
        }
        let before: String = g
            .linearize_history()
            .0
            .iter()
            .map(|c| c.glyph().chars().next().unwrap_or(' '))
            .collect();
        g.resize_history(7);
        let after: String = g
            .linearize_history()
            .0
            .iter()
            .map(|c| c.glyph().chars().next().unwrap_or(' '))
            .collect();
        let trim = |s: &str| s.trim_end().to_string();
        assert_eq!(trim(&after.replace(' ', "")), trim(&before.replace(' ', "")));
    }
}
