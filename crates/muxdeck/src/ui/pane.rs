//! Emulated terminal panes for the deck view.
//!
//! Each attached session renders into its own [`PaneSurface`], a VT
//! emulator holding the screen grid, instead of writing straight to
//! stdout. The deck then paints every visible pane into its rectangle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alacritty_terminal::event::{Event, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::cell::Flags;
use alacritty_terminal::term::{Config, Term};
use alacritty_terminal::vte::ansi::{self, Color as VtColor, CursorShape, NamedColor};
use crossterm::style::Color;
use protocol::{SessionKey, TerminalSize, TerminalSurface};
use tokio::sync::Notify;

const SCROLLBACK_LINES: usize = 2_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct PaneEventState {
    title: Option<String>,
    replies: Vec<String>,
}

/// Collects what the emulator reports back: title changes and bytes it
/// wants written to the remote side (device status replies).
#[derive(Clone, Default)]
struct PaneEvents {
    state: Arc<Mutex<PaneEventState>>,
}

impl EventListener for PaneEvents {
    fn send_event(&self, event: Event) {
        let mut state = lock(&self.state);
        match event {
            Event::Title(title) => state.title = Some(title),
            Event::ResetTitle => state.title = None,
            Event::PtyWrite(data) => state.replies.push(data),
            _ => {}
        }
    }
}

struct GridSize {
    rows: usize,
    cols: usize,
}

impl From<TerminalSize> for GridSize {
    fn from(size: TerminalSize) -> Self {
        Self {
            rows: usize::from(size.rows.max(1)),
            cols: usize::from(size.cols.max(1)),
        }
    }
}

impl Dimensions for GridSize {
    fn total_lines(&self) -> usize {
        self.rows
    }

    fn screen_lines(&self) -> usize {
        self.rows
    }

    fn columns(&self) -> usize {
        self.cols
    }
}

struct Emulator {
    term: Term<PaneEvents>,
    parser: ansi::Processor,
}

/// One rendered cell, in local terminal colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneCell {
    pub ch: char,
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub dim: bool,
    pub italic: bool,
    pub underline: bool,
    pub inverse: bool,
    /// Right half of a wide character; paint nothing.
    pub spacer: bool,
}

impl Default for PaneCell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: Color::Reset,
            bg: Color::Reset,
            bold: false,
            dim: false,
            italic: false,
            underline: false,
            inverse: false,
            spacer: false,
        }
    }
}

/// Maps emulator colors onto the local terminal's palette.
///
/// Default foreground and background become [`Color::Reset`] so panes
/// inherit the operator's color scheme.
fn local_color(color: VtColor) -> Color {
    match color {
        VtColor::Spec(rgb) => Color::Rgb {
            r: rgb.r,
            g: rgb.g,
            b: rgb.b,
        },
        VtColor::Indexed(index) => Color::AnsiValue(index),
        VtColor::Named(named) => match named {
            NamedColor::DimBlack => Color::AnsiValue(0),
            NamedColor::DimRed => Color::AnsiValue(1),
            NamedColor::DimGreen => Color::AnsiValue(2),
            NamedColor::DimYellow => Color::AnsiValue(3),
            NamedColor::DimBlue => Color::AnsiValue(4),
            NamedColor::DimMagenta => Color::AnsiValue(5),
            NamedColor::DimCyan => Color::AnsiValue(6),
            NamedColor::DimWhite => Color::AnsiValue(7),
            other => match other as usize {
                index @ 0..=15 => Color::AnsiValue(index as u8),
                _ => Color::Reset,
            },
        },
    }
}

/// A [`TerminalSurface`] backed by a VT emulator.
pub struct PaneSurface {
    key: SessionKey,
    emulator: Mutex<Emulator>,
    size: Mutex<TerminalSize>,
    events: PaneEvents,
    redraw: Arc<Notify>,
    disposed: AtomicBool,
}

impl PaneSurface {
    /// Creates a blank pane. `redraw` is notified whenever its content
    /// changes.
    pub fn new(key: SessionKey, size: TerminalSize, redraw: Arc<Notify>) -> Self {
        let events = PaneEvents::default();
        let config = Config {
            scrolling_history: SCROLLBACK_LINES,
            ..Config::default()
        };
        let term = Term::new(config, &GridSize::from(size), events.clone());
        Self {
            key,
            emulator: Mutex::new(Emulator {
                term,
                parser: ansi::Processor::new(),
            }),
            size: Mutex::new(size),
            events,
            redraw,
            disposed: AtomicBool::new(false),
        }
    }

    /// Session this pane was created for.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Resizes the emulated grid. The remote side follows on the binding's
    /// next fit.
    pub fn resize(&self, size: TerminalSize) {
        if size.is_empty() {
            return;
        }
        {
            let mut current = lock(&self.size);
            if *current == size {
                return;
            }
            *current = size;
        }
        lock(&self.emulator).term.resize(GridSize::from(size));
        self.redraw.notify_one();
    }

    /// Drains bytes the emulator wants sent back to the remote terminal.
    pub fn take_replies(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.events.state).replies)
    }

    /// Window title set by the remote program, if any.
    pub fn title(&self) -> Option<String> {
        lock(&self.events.state).title.clone()
    }

    /// Cells of one visible row. Rows past the bottom come back blank.
    pub fn row(&self, row: u16) -> Vec<PaneCell> {
        let emulator = lock(&self.emulator);
        let term = &emulator.term;
        let cols = term.columns();
        if usize::from(row) >= term.screen_lines() {
            return vec![PaneCell::default(); cols];
        }

        let line = &term.grid()[Line(i32::from(row))];
        (0..cols)
            .map(|col| {
                let cell = &line[Column(col)];
                let hidden = cell.flags.contains(Flags::HIDDEN);
                PaneCell {
                    ch: if hidden { ' ' } else { cell.c },
                    fg: local_color(cell.fg),
                    bg: local_color(cell.bg),
                    bold: cell.flags.contains(Flags::BOLD),
                    dim: cell.flags.contains(Flags::DIM),
                    italic: cell.flags.contains(Flags::ITALIC),
                    underline: cell.flags.contains(Flags::UNDERLINE),
                    inverse: cell.flags.contains(Flags::INVERSE),
                    spacer: cell.flags.contains(Flags::WIDE_CHAR_SPACER),
                }
            })
            .collect()
    }

    /// Plain text of one row without trailing blanks.
    pub fn row_text(&self, row: u16) -> String {
        let text: String = self
            .row(row)
            .into_iter()
            .filter(|cell| !cell.spacer)
            .map(|cell| cell.ch)
            .collect();
        text.trim_end().to_string()
    }

    /// Cursor position as `(row, col)`, or `None` while the remote program
    /// hides it.
    pub fn cursor(&self) -> Option<(u16, u16)> {
        let emulator = lock(&self.emulator);
        let content = emulator.term.renderable_content();
        if content.cursor.shape == CursorShape::Hidden {
            return None;
        }
        let point = content.cursor.point;
        Some((
            u16::try_from(point.line.0).ok()?,
            u16::try_from(point.column.0).ok()?,
        ))
    }

    /// Returns true once the binding has released this pane.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl TerminalSurface for PaneSurface {
    fn write(&self, data: &[u8]) {
        if self.is_disposed() {
            return;
        }
        {
            let mut emulator = lock(&self.emulator);
            let Emulator { term, parser } = &mut *emulator;
            parser.advance(term, data);
        }
        self.redraw.notify_one();
    }

    fn size(&self) -> TerminalSize {
        *lock(&self.size)
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            tracing::debug!(session = %self.key, "Disposed pane");
            self.redraw.notify_one();
        }
    }
}
