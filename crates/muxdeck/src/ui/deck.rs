//! Deck view: several attached sessions in one terminal.
//!
//! The controller is built with a [`DeckSurfaceFactory`], so every
//! attachment renders into a [`PaneSurface`]. The loop paints the visible
//! panes per the display preferences, sends keys to the focused pane, and
//! reads one command key after the `Ctrl-]` prefix:
//!
//! | key            | action                         |
//! |----------------|--------------------------------|
//! | `q`            | leave the deck                 |
//! | `d`            | detach the focused session     |
//! | `n`, Tab, →    | focus the next session         |
//! | `p`, BackTab, ← | focus the previous session    |
//! | `1`-`9`        | focus a session by position    |
//! | `Ctrl-]`       | send a literal `Ctrl-]`        |

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::style::{
    Attribute, Color, Print, SetAttribute, SetBackgroundColor, SetForegroundColor,
};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use futures_util::future::join_all;
use protocol::{Session, SessionKey, SurfaceFactory, TerminalSize, TerminalSurface, Theme};
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

use super::attach::spawn_event_reader;
use super::keys::{translate, KeyAction};
use super::layout::{self, Rect};
use super::pane::{PaneCell, PaneSurface};
use crate::session::{AttachedSession, ControllerEvent, SessionController};
use crate::store::{DisplayMode, Preferences};

/// `Ctrl-]`, sent through when the prefix is pressed twice.
const PREFIX_BYTE: u8 = 0x1d;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Size of the local terminal, or 24x80 when it cannot be read.
pub fn terminal_area() -> TerminalSize {
    match terminal::size() {
        Ok((cols, rows)) => TerminalSize::new(rows, cols),
        Err(_) => TerminalSize::default(),
    }
}

/// Pane size for `prefs` on a terminal of `area`.
pub fn deck_pane_size(prefs: &Preferences, area: TerminalSize) -> TerminalSize {
    let prefs = prefs.normalized();
    layout::pane_size(prefs.display_mode, prefs.visible_slots(), area)
}

/// Hands out [`PaneSurface`]s and keeps track of them for drawing.
pub struct DeckSurfaceFactory {
    panes: Mutex<Vec<Arc<PaneSurface>>>,
    pane_size: Mutex<TerminalSize>,
    redraw: Arc<Notify>,
}

impl DeckSurfaceFactory {
    /// New panes start at `pane_size`.
    pub fn new(pane_size: TerminalSize) -> Self {
        Self {
            panes: Mutex::new(Vec::new()),
            pane_size: Mutex::new(pane_size),
            redraw: Arc::new(Notify::new()),
        }
    }

    /// Notified whenever any pane changes.
    pub fn redraw(&self) -> Arc<Notify> {
        Arc::clone(&self.redraw)
    }

    pub fn pane_size(&self) -> TerminalSize {
        *lock(&self.pane_size)
    }

    /// Resizes every live pane and the size new panes start at.
    pub fn resize_panes(&self, size: TerminalSize) {
        *lock(&self.pane_size) = size;
        for pane in lock(&self.panes).iter() {
            pane.resize(size);
        }
    }

    /// The pane behind a binding's surface.
    ///
    /// Looked up by identity, so it survives session renames.
    pub fn pane_for(&self, surface: &Arc<dyn TerminalSurface>) -> Option<Arc<PaneSurface>> {
        let target = Arc::as_ptr(surface) as *const ();
        lock(&self.panes)
            .iter()
            .find(|pane| Arc::as_ptr(pane) as *const () == target)
            .cloned()
    }

    /// Live panes, oldest first.
    pub fn panes(&self) -> Vec<Arc<PaneSurface>> {
        lock(&self.panes)
            .iter()
            .filter(|pane| !pane.is_disposed())
            .cloned()
            .collect()
    }
}

impl SurfaceFactory for DeckSurfaceFactory {
    fn create(&self, session: &Session, theme: Theme) -> protocol::Result<Arc<dyn TerminalSurface>> {
        let size = self.pane_size();
        tracing::debug!(session = %session.key(), ?theme, size = %size, "Creating deck pane");
        let pane = Arc::new(PaneSurface::new(session.key(), size, self.redraw()));
        {
            let mut panes = lock(&self.panes);
            panes.retain(|p| !p.is_disposed());
            panes.push(Arc::clone(&pane));
        }
        let surface: Arc<dyn TerminalSurface> = pane;
        Ok(surface)
    }
}

/// What a key means right after the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckCommand {
    Quit,
    Detach,
    Next,
    Previous,
    /// Zero-based position.
    Select(usize),
    SendPrefix,
    Cancel,
}

pub fn prefix_command(key: KeyEvent) -> DeckCommand {
    if translate(key) == KeyAction::Detach {
        return DeckCommand::SendPrefix;
    }
    match key.code {
        KeyCode::Char('q') => DeckCommand::Quit,
        KeyCode::Char('d') => DeckCommand::Detach,
        KeyCode::Char('n') | KeyCode::Tab | KeyCode::Right => DeckCommand::Next,
        KeyCode::Char('p') | KeyCode::BackTab | KeyCode::Left => DeckCommand::Previous,
        KeyCode::Char(c @ '1'..='9') => DeckCommand::Select(c as usize - '1' as usize),
        _ => DeckCommand::Cancel,
    }
}

/// New focus after a navigation command over `count` sessions.
pub fn move_focus(command: DeckCommand, focus: usize, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let focus = focus.min(count - 1);
    match command {
        DeckCommand::Next => (focus + 1) % count,
        DeckCommand::Previous => (focus + count - 1) % count,
        DeckCommand::Select(index) if index < count => index,
        _ => focus,
    }
}

/// Sessions the deck opens with: the named ones, or, when none are named
/// and nothing is attached yet, the first `terminal_count` listed.
pub fn initial_targets(
    sessions: &[Session],
    named: &[SessionKey],
    attached: usize,
    prefs: &Preferences,
) -> Vec<SessionKey> {
    if !named.is_empty() {
        let mut keys: Vec<SessionKey> = Vec::with_capacity(named.len());
        for key in named {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        return keys;
    }
    if attached > 0 {
        return Vec::new();
    }
    sessions
        .iter()
        .take(usize::from(prefs.normalized().terminal_count))
        .map(Session::key)
        .collect()
}

/// Title text for the session at `position`.
fn label(position: usize, session: &Session, stale: bool, title: Option<&str>) -> String {
    let mut text = format!(" {} {} ({})", position + 1, session.name, session.session_type);
    if stale {
        text.push_str(" [gone]");
    }
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        text.push_str(" - ");
        text.push_str(title);
    }
    text.push(' ');
    text
}

/// Truncates or pads `text` to exactly `width` characters.
fn fit_to(text: &str, width: usize) -> String {
    let mut out: String = text.chars().take(width).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat(' ').take(width - len));
    out
}

/// Attaches the opening sessions. Fails only if nothing ends up attached.
pub async fn attach_initial(
    controller: &SessionController,
    named: &[SessionKey],
    prefs: &Preferences,
) -> Result<()> {
    let targets = initial_targets(
        &controller.sessions(),
        named,
        controller.attached().len(),
        prefs,
    );
    let results = join_all(targets.iter().map(|key| controller.attach(key))).await;
    let mut failure = None;
    for (key, result) in targets.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!(session = %key, error = %e, "Deck attach failed");
            eprintln!("Could not attach {key}: {e}");
            if failure.is_none() {
                failure = Some(e);
            }
        }
    }

    if controller.attached().is_empty() {
        return match failure {
            Some(e) => Err(e).context("No session could be attached"),
            None => anyhow::bail!("No sessions to show"),
        };
    }
    Ok(())
}

/// Sends queued emulator replies (cursor reports and the like) back to
/// each pane's remote terminal.
pub async fn forward_replies(attached: &[AttachedSession], panes: &DeckSurfaceFactory) {
    for entry in attached {
        let Some(pane) = panes.pane_for(entry.binding.surface()) else {
            continue;
        };
        for reply in pane.take_replies() {
            if let Err(e) = entry.binding.send_input(reply.as_bytes()).await {
                tracing::debug!(session = %entry.session.key(), error = %e, "Reply not delivered");
            }
        }
    }
}

async fn send(entry: &AttachedSession, bytes: &[u8]) {
    if let Err(e) = entry.binding.send_input(bytes).await {
        tracing::warn!(session = %entry.session.key(), error = %e, "Input not delivered");
    }
}

/// Raw mode and the alternate screen, restored on drop.
struct DeckScreen;

impl DeckScreen {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(e).context("Failed to enter the alternate screen");
        }
        Ok(Self)
    }
}

impl Drop for DeckScreen {
    fn drop(&mut self) {
        if let Err(e) = execute!(
            io::stdout(),
            SetAttribute(Attribute::Reset),
            Show,
            LeaveAlternateScreen
        ) {
            tracing::warn!(error = %e, "Failed to leave the alternate screen");
        }
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "Failed to leave raw mode");
        }
    }
}

struct View<'a> {
    mode: DisplayMode,
    visible: usize,
    area: TerminalSize,
    attached: &'a [AttachedSession],
    focus: usize,
}

fn style_of(cell: &PaneCell) -> PaneCell {
    PaneCell {
        ch: ' ',
        spacer: false,
        ..*cell
    }
}

fn apply_style(out: &mut impl Write, cell: &PaneCell) -> io::Result<()> {
    queue!(
        out,
        SetAttribute(Attribute::Reset),
        SetForegroundColor(cell.fg),
        SetBackgroundColor(cell.bg)
    )?;
    let attributes = [
        (cell.bold, Attribute::Bold),
        (cell.dim, Attribute::Dim),
        (cell.italic, Attribute::Italic),
        (cell.underline, Attribute::Underlined),
        (cell.inverse, Attribute::Reverse),
    ];
    for (set, attribute) in attributes {
        if set {
            queue!(out, SetAttribute(attribute))?;
        }
    }
    Ok(())
}

fn reset_style(out: &mut impl Write) -> io::Result<()> {
    queue!(
        out,
        SetAttribute(Attribute::Reset),
        SetForegroundColor(Color::Reset),
        SetBackgroundColor(Color::Reset)
    )
}

fn draw_pane(out: &mut impl Write, pane: Option<&PaneSurface>, rect: Rect) -> io::Result<()> {
    let width = usize::from(rect.cols);
    let mut current: Option<PaneCell> = None;
    for row in 0..rect.rows {
        queue!(out, MoveTo(rect.left, rect.top + row))?;
        let cells = pane.map(|p| p.row(row)).unwrap_or_default();
        let shown = cells.len().min(width);
        for cell in &cells[..shown] {
            if cell.spacer {
                continue;
            }
            let style = style_of(cell);
            if current != Some(style) {
                apply_style(out, cell)?;
                current = Some(style);
            }
            queue!(out, Print(cell.ch))?;
        }
        if shown < width {
            reset_style(out)?;
            current = None;
            queue!(out, Print(" ".repeat(width - shown)))?;
        }
    }
    reset_style(out)
}

fn draw_title(out: &mut impl Write, rect: Rect, text: &str, focused: bool) -> io::Result<()> {
    queue!(out, MoveTo(rect.left, rect.top))?;
    if focused {
        queue!(out, SetAttribute(Attribute::Reverse))?;
    } else {
        queue!(out, SetAttribute(Attribute::Underlined))?;
    }
    queue!(
        out,
        Print(fit_to(text, usize::from(rect.cols))),
        SetAttribute(Attribute::Reset)
    )
}

fn draw_tab_bar(
    out: &mut impl Write,
    bar: Rect,
    view: &View<'_>,
    panes: &DeckSurfaceFactory,
) -> io::Result<()> {
    queue!(out, MoveTo(bar.left, bar.top))?;
    let mut remaining = usize::from(bar.cols);
    for (index, entry) in view.attached.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let title = panes
            .pane_for(entry.binding.surface())
            .and_then(|p| p.title());
        let text = label(index, &entry.session, entry.stale, title.as_deref());
        let text: String = text.chars().take(remaining).collect();
        remaining -= text.chars().count();
        if index == view.focus {
            queue!(out, SetAttribute(Attribute::Reverse))?;
        }
        queue!(out, Print(text), SetAttribute(Attribute::Reset))?;
    }
    queue!(out, Print(" ".repeat(remaining)))
}

fn draw(
    out: &mut impl Write,
    panes: &DeckSurfaceFactory,
    view: &View<'_>,
    clear: bool,
) -> io::Result<()> {
    let deck = layout::layout(
        view.mode,
        view.visible,
        view.attached.len(),
        view.focus,
        view.area,
    );
    queue!(out, Hide)?;
    if clear {
        reset_style(out)?;
        queue!(out, Clear(ClearType::All))?;
    }
    if let Some(bar) = deck.tab_bar {
        draw_tab_bar(out, bar, view, panes)?;
    }
    for column in &deck.separators {
        for row in 0..view.area.rows {
            queue!(out, MoveTo(*column, row), Print('│'))?;
        }
    }

    let mut cursor = None;
    for slot in &deck.slots {
        let entry = &view.attached[slot.index];
        let pane = panes.pane_for(entry.binding.surface());
        let focused = slot.index == view.focus;
        if let Some(title_rect) = slot.title {
            let title = pane.as_ref().and_then(|p| p.title());
            let text = label(slot.index, &entry.session, entry.stale, title.as_deref());
            draw_title(out, title_rect, &text, focused)?;
        }
        draw_pane(out, pane.as_deref(), slot.content)?;

        if focused {
            cursor = pane
                .as_ref()
                .and_then(|p| p.cursor())
                .filter(|(row, col)| *row < slot.content.rows && *col < slot.content.cols)
                .map(|(row, col)| (slot.content.left + col, slot.content.top + row));
        }
    }

    if let Some((x, y)) = cursor {
        queue!(out, MoveTo(x, y), Show)?;
    }
    out.flush()
}

/// Runs the deck until the operator quits or every session is detached.
///
/// The controller must have been built with `panes` as its surface factory
/// and mounted.
pub async fn run_deck(
    controller: &SessionController,
    panes: &DeckSurfaceFactory,
    named: &[SessionKey],
) -> Result<()> {
    let prefs = controller.preferences().get().normalized();
    attach_initial(controller, named, &prefs).await?;

    let mode = prefs.display_mode;
    let visible = prefs.visible_slots();
    let mut area = terminal_area();
    panes.resize_panes(deck_pane_size(&prefs, area));
    for entry in controller.attached() {
        entry.binding.on_viewport_resize();
    }

    let mut events = controller.subscribe();
    let redraw = panes.redraw();
    let screen = DeckScreen::enter()?;
    let shutdown = CancellationToken::new();
    let (reader, mut input) = spawn_event_reader(shutdown.clone());
    let mut stdout = io::stdout();
    let mut focus = 0usize;
    let mut prefix = false;
    let mut clear = true;

    tracing::info!(mode = %mode, visible, attached = controller.attached().len(), "Deck opened");
    loop {
        let attached = controller.attached();
        if attached.is_empty() {
            break;
        }
        focus = focus.min(attached.len() - 1);
        let view = View {
            mode,
            visible,
            area,
            attached: &attached,
            focus,
        };
        if let Err(e) = draw(&mut stdout, panes, &view, clear) {
            tracing::warn!(error = %e, "Deck draw failed");
            break;
        }
        clear = false;

        tokio::select! {
            ev = input.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    Event::Key(key) if key.kind != KeyEventKind::Release => {
                        let focused = &attached[focus];
                        if prefix {
                            prefix = false;
                            match prefix_command(key) {
                                DeckCommand::Quit => break,
                                DeckCommand::Detach => {
                                    controller.detach(&focused.session.key()).await;
                                    clear = true;
                                }
                                DeckCommand::SendPrefix => send(focused, &[PREFIX_BYTE]).await,
                                DeckCommand::Cancel => {}
                                command => {
                                    let next = move_focus(command, focus, attached.len());
                                    if layout::page_start(next, visible)
                                        != layout::page_start(focus, visible)
                                    {
                                        clear = true;
                                    }
                                    focus = next;
                                }
                            }
                        } else {
                            match translate(key) {
                                KeyAction::Input(bytes) => send(focused, &bytes).await,
                                KeyAction::Detach => prefix = true,
                                KeyAction::Ignore => {}
                            }
                        }
                    }
                    Event::Resize(cols, rows) => {
                        area = TerminalSize::new(rows, cols);
                        panes.resize_panes(deck_pane_size(&prefs, area));
                        for entry in &attached {
                            entry.binding.on_viewport_resize();
                        }
                        clear = true;
                    }
                    _ => {}
                }
            }
            _ = redraw.notified() => forward_replies(&attached, panes).await,
            event = events.recv() => match event {
                Ok(ControllerEvent::AttachedChanged) => clear = true,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => clear = true,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    shutdown.cancel();
    if let Err(e) = reader.await {
        tracing::debug!(error = %e, "Terminal reader ended abnormally");
    }
    drop(screen);
    tracing::info!("Deck closed");
    Ok(())
}
