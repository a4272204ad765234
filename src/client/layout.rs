//! Pane layout arithmetic (§4.F "Layout recomputation", §8 property 7).

/// One pane's geometry within the enclosing terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneGeometry {
    pub xoff: usize,
    pub yoff: usize,
    pub sx: usize,
    pub sy: usize,
}

/// Lay out `n` panes side by side across `cols` columns, reserving the
/// bottom row (`rows - 1`) for the status bar. Width is `(cols - (n-1)) / n`
/// with the final pane absorbing the integer-division remainder; each pane
/// after the first starts one column past the previous pane's border
/// column.
pub fn compute_layout(cols: u16, rows: u16, n: usize) -> Vec<PaneGeometry> {
    if n == 0 {
        return Vec::new();
    }
    let cols = cols as usize;
    let height = rows.saturating_sub(1) as usize;
    let usable = cols.saturating_sub(n - 1);
    let base_width = usable / n;

    let mut out = Vec::with_capacity(n);
    let mut xoff = 0usize;
    for i in 0..n {
        let width = if i + 1 == n {
            cols.saturating_sub(xoff)
        } else {
            base_width
        };
        out.push(PaneGeometry {
            xoff,
            yoff: 0,
            sx: width,
            sy: height,
        });
        xoff += width + 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pane_fills_width() {
        let layout = compute_layout(80, 24, 1);
        assert_eq!(layout.len(), 1);
        assert_eq!(layout[0], PaneGeometry { xoff: 0, yoff: 0, sx: 80, sy: 23 });
    }

    #[test]
    fn two_panes_split_with_border_column() {
        let layout = compute_layout(81, 24, 2);
        assert_eq!(layout[0].xoff, 0);
        assert_eq!(layout[0].sx, 40);
        assert_eq!(layout[1].xoff, 41);
        assert_eq!(layout[1].sx, 40);
    }

    #[test]
    fn last_pane_absorbs_remainder() {
        let layout = compute_layout(82, 24, 3);
        let total: usize = layout.iter().map(|p| p.sx).sum::<usize>() + (layout.len() - 1);
        assert_eq!(total, 82);
    }
}
