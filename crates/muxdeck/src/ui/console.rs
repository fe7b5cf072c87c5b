//! The local terminal as a [`TerminalSurface`].

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use protocol::{MuxError, Result, Session, SurfaceFactory, TerminalSize, TerminalSurface, Theme};

/// Renders remote output straight to stdout with the terminal in raw mode.
///
/// Raw mode is entered on creation and left on [`dispose`](TerminalSurface::dispose)
/// or drop, whichever comes first.
pub struct ConsoleSurface {
    raw: AtomicBool,
}

impl ConsoleSurface {
    /// Puts the terminal into raw mode.
    pub fn new() -> Result<Self> {
        enable_raw_mode().map_err(|e| MuxError::Surface(format!("failed to enable raw mode: {e}")))?;
        Ok(Self {
            raw: AtomicBool::new(true),
        })
    }

    fn restore(&self) {
        if self.raw.swap(false, Ordering::SeqCst) {
            if let Err(e) = disable_raw_mode() {
                tracing::warn!(error = %e, "Failed to leave raw mode");
            }
        }
    }
}

impl TerminalSurface for ConsoleSurface {
    fn write(&self, data: &[u8]) {
        let mut stdout = io::stdout().lock();
        if let Err(e) = stdout.write_all(data).and_then(|()| stdout.flush()) {
            tracing::debug!(error = %e, "Dropped terminal output");
        }
    }

    fn size(&self) -> TerminalSize {
        match terminal::size() {
            Ok((cols, rows)) => TerminalSize::new(rows, cols),
            Err(_) => TerminalSize::default(),
        }
    }

    fn dispose(&self) {
        self.restore();
    }
}

impl Drop for ConsoleSurface {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Hands out [`ConsoleSurface`]s.
#[derive(Debug, Default)]
pub struct ConsoleSurfaceFactory;

impl SurfaceFactory for ConsoleSurfaceFactory {
    fn create(&self, session: &Session, theme: Theme) -> Result<Arc<dyn TerminalSurface>> {
        tracing::debug!(session = %session.key(), ?theme, "Creating console surface");
        Ok(Arc::new(ConsoleSurface::new()?))
    }
}
