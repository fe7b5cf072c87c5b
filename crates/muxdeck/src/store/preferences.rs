//! Global display preferences.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::write_atomic;

/// Most terminals shown side by side.
pub const MAX_TERMINALS: u8 = 4;

/// How attached terminals are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Up to `terminal_count` terminals visible at once.
    #[default]
    Split,
    /// One terminal visible, the rest behind tabs.
    Tabs,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::Split => f.write_str("split"),
            DisplayMode::Tabs => f.write_str("tabs"),
        }
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "split" => Ok(DisplayMode::Split),
            "tabs" => Ok(DisplayMode::Tabs),
            other => Err(format!("unknown display mode {other:?}, expected split or tabs")),
        }
    }
}

/// Display preferences shared by every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Terminals visible in split mode, 1 to 4.
    pub terminal_count: u8,
    /// Layout.
    pub display_mode: DisplayMode,
    /// Attach sessions automatically after the first refresh.
    pub auto_attach: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            terminal_count: 1,
            display_mode: DisplayMode::Split,
            auto_attach: false,
        }
    }
}

impl Preferences {
    /// Clamps out-of-range values.
    pub fn normalized(mut self) -> Self {
        self.terminal_count = self.terminal_count.clamp(1, MAX_TERMINALS);
        self
    }

    /// Terminals visible at once.
    pub fn visible_slots(&self) -> usize {
        match self.display_mode {
            DisplayMode::Split => usize::from(self.terminal_count.clamp(1, MAX_TERMINALS)),
            DisplayMode::Tabs => 1,
        }
    }
}

/// Preferences persisted at `<data_dir>/preferences.json`.
pub struct PreferenceStore {
    path: PathBuf,
    current: RwLock<Preferences>,
}

impl PreferenceStore {
    /// Creates a store with defaults persisting to `path`. Does not read the file.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            current: RwLock::new(Preferences::default()),
        }
    }

    /// Opens and loads the store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let store = Self::new(data_dir.join("preferences.json"));
        store.load()?;
        Ok(store)
    }

    /// Returns the path to the preferences file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads from disk. A missing file keeps the defaults.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read preferences: {}", self.path.display()))?;
        let prefs: Preferences = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse preferences: {}", self.path.display()))?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = prefs.normalized();
        Ok(())
    }

    /// Current preferences.
    pub fn get(&self) -> Preferences {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `change`, clamps the result and writes it through.
    pub fn update(&self, change: impl FnOnce(&mut Preferences)) -> Result<Preferences> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = *current;
        change(&mut next);
        let next = next.normalized();

        let contents = serde_json::to_string_pretty(&next).context("Failed to serialize preferences")?;
        write_atomic(&self.path, &contents)?;
        *current = next;
        tracing::debug!(
            terminal_count = next.terminal_count,
            display_mode = %next.display_mode,
            auto_attach = next.auto_attach,
            "Saved preferences"
        );
        Ok(next)
    }

    /// Sets the terminal count, clamped to 1..=4.
    pub fn set_terminal_count(&self, count: u8) -> Result<Preferences> {
        self.update(|p| p.terminal_count = count)
    }

    /// Sets the layout.
    pub fn set_display_mode(&self, mode: DisplayMode) -> Result<Preferences> {
        self.update(|p| p.display_mode = mode)
    }

    /// Enables or disables auto-attach.
    pub fn set_auto_attach(&self, enabled: bool) -> Result<Preferences> {
        self.update(|p| p.auto_attach = enabled)
    }
}
