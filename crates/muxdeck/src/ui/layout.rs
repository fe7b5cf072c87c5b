//! Pane geometry for the deck view.
//!
//! Split mode shows up to four panes in a grid, each under a one-row title.
//! Tabs mode shows a single pane under a tab bar. When more sessions are
//! attached than fit, the deck pages through them so the focused one is
//! always on screen.

use protocol::TerminalSize;

use crate::store::DisplayMode;

/// A rectangle in terminal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub top: u16,
    pub left: u16,
    pub rows: u16,
    pub cols: u16,
}

impl Rect {
    pub const fn new(top: u16, left: u16, rows: u16, cols: u16) -> Self {
        Self {
            top,
            left,
            rows,
            cols,
        }
    }

    pub fn size(&self) -> TerminalSize {
        TerminalSize::new(self.rows, self.cols)
    }
}

/// Where one attached session is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Position in the attached list.
    pub index: usize,
    /// Title row; tabs mode uses the tab bar instead.
    pub title: Option<Rect>,
    pub content: Rect,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeckLayout {
    pub tab_bar: Option<Rect>,
    pub slots: Vec<Slot>,
    /// Columns of the vertical separators between split panes.
    pub separators: Vec<u16>,
}

/// Grid shape `(rows, cols)` for `visible` split panes.
pub fn grid(visible: usize) -> (u16, u16) {
    match visible {
        0 | 1 => (1, 1),
        2 => (1, 2),
        _ => (2, 2),
    }
}

/// First attached index on the page that holds `focus`.
pub fn page_start(focus: usize, visible: usize) -> usize {
    let visible = visible.max(1);
    focus - focus % visible
}

fn cell_size(visible: usize, area: TerminalSize) -> (u16, u16) {
    let (grid_rows, grid_cols) = grid(visible);
    let width = area.cols.saturating_sub(grid_cols - 1) / grid_cols;
    let height = area.rows / grid_rows;
    (height, width)
}

/// Content size every pane is given, so panes can be created before the
/// page they land on is known.
pub fn pane_size(mode: DisplayMode, visible: usize, area: TerminalSize) -> TerminalSize {
    match mode {
        DisplayMode::Tabs => TerminalSize::new(area.rows.saturating_sub(1).max(1), area.cols.max(1)),
        DisplayMode::Split => {
            let (height, width) = cell_size(visible, area);
            TerminalSize::new(height.saturating_sub(1).max(1), width.max(1))
        }
    }
}

/// Lays out `attached` sessions with `focus` on screen.
pub fn layout(
    mode: DisplayMode,
    visible: usize,
    attached: usize,
    focus: usize,
    area: TerminalSize,
) -> DeckLayout {
    if attached == 0 || area.is_empty() {
        return DeckLayout::default();
    }
    let focus = focus.min(attached - 1);

    match mode {
        DisplayMode::Tabs => {
            let size = pane_size(mode, 1, area);
            DeckLayout {
                tab_bar: Some(Rect::new(0, 0, 1, area.cols)),
                slots: vec![Slot {
                    index: focus,
                    title: None,
                    content: Rect::new(1, 0, size.rows, size.cols),
                }],
                separators: Vec::new(),
            }
        }
        DisplayMode::Split => {
            let visible = visible.max(1);
            let (_, grid_cols) = grid(visible);
            let (height, width) = cell_size(visible, area);
            let size = pane_size(mode, visible, area);
            let start = page_start(focus, visible);
            let shown = visible.min(attached - start);

            let slots = (0..shown)
                .map(|i| {
                    let row = (i / usize::from(grid_cols)) as u16;
                    let col = (i % usize::from(grid_cols)) as u16;
                    let top = row * height;
                    let left = col * (width + 1);
                    Slot {
                        index: start + i,
                        title: Some(Rect::new(top, left, 1, width)),
                        content: Rect::new(top + 1, left, size.rows, size.cols),
                    }
                })
                .collect();
            let separators = (1..grid_cols).map(|c| c * (width + 1) - 1).collect();

            DeckLayout {
                tab_bar: None,
                slots,
                separators,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shapes() {
        assert_eq!(grid(1), (1, 1));
        assert_eq!(grid(2), (1, 2));
        assert_eq!(grid(3), (2, 2));
        assert_eq!(grid(4), (2, 2));
    }

    #[test]
    fn test_page_start() {
        assert_eq!(page_start(0, 4), 0);
        assert_eq!(page_start(3, 4), 0);
        assert_eq!(page_start(5, 4), 4);
        assert_eq!(page_start(3, 1), 3);
        assert_eq!(page_start(2, 0), 2);
    }

    #[test]
    fn test_two_panes_side_by_side() {
        let area = TerminalSize::new(24, 80);
        let deck = layout(DisplayMode::Split, 2, 2, 0, area);

        assert_eq!(deck.tab_bar, None);
        assert_eq!(deck.separators, vec![39]);
        assert_eq!(deck.slots.len(), 2);
        assert_eq!(deck.slots[0].title, Some(Rect::new(0, 0, 1, 39)));
        assert_eq!(deck.slots[0].content, Rect::new(1, 0, 23, 39));
        assert_eq!(deck.slots[1].title, Some(Rect::new(0, 40, 1, 39)));
        assert_eq!(deck.slots[1].content, Rect::new(1, 40, 23, 39));
        assert_eq!(pane_size(DisplayMode::Split, 2, area), TerminalSize::new(23, 39));
    }

    #[test]
    fn test_four_panes_in_a_grid() {
        let area = TerminalSize::new(25, 81);
        let deck = layout(DisplayMode::Split, 4, 4, 2, area);

        let contents: Vec<Rect> = deck.slots.iter().map(|s| s.content).collect();
        assert_eq!(
            contents,
            vec![
                Rect::new(1, 0, 11, 40),
                Rect::new(1, 41, 11, 40),
                Rect::new(13, 0, 11, 40),
                Rect::new(13, 41, 11, 40),
            ]
        );
        assert_eq!(deck.separators, vec![40]);
    }

    #[test]
    fn test_focus_selects_page() {
        let area = TerminalSize::new(24, 80);
        let deck = layout(DisplayMode::Split, 4, 6, 5, area);
        let indices: Vec<usize> = deck.slots.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![4, 5]);
        assert_eq!(deck.slots[0].content.left, 0);

        // Three visible keeps the 2x2 grid with one cell empty.
        let deck = layout(DisplayMode::Split, 3, 3, 0, area);
        assert_eq!(deck.slots.len(), 3);
        assert_eq!(deck.slots[2].content.top, 13);
    }

    #[test]
    fn test_tabs_show_focused_pane_only() {
        let area = TerminalSize::new(24, 80);
        let deck = layout(DisplayMode::Tabs, 1, 3, 7, area);

        assert_eq!(deck.tab_bar, Some(Rect::new(0, 0, 1, 80)));
        assert_eq!(deck.slots.len(), 1);
        assert_eq!(deck.slots[0].index, 2);
        assert_eq!(deck.slots[0].title, None);
        assert_eq!(deck.slots[0].content, Rect::new(1, 0, 23, 80));
        assert_eq!(pane_size(DisplayMode::Tabs, 4, area), TerminalSize::new(23, 80));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(
            layout(DisplayMode::Split, 2, 0, 0, TerminalSize::new(24, 80)),
            DeckLayout::default()
        );
        assert_eq!(
            layout(DisplayMode::Split, 2, 2, 0, TerminalSize::new(0, 80)),
            DeckLayout::default()
        );
        assert_eq!(
            pane_size(DisplayMode::Split, 4, TerminalSize::new(1, 2)),
            TerminalSize::new(1, 1)
        );
    }
}
