//! Persisted local state.
//!
//! Two layers live here, both plain JSON under the data directory:
//!
//! - [`SessionStore`]: manual order and session notes for one connection
//! - [`PreferenceStore`]: global display preferences
//!
//! Every change is written through immediately; the last writer wins.

pub mod preferences;
pub mod session_store;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub use preferences::{DisplayMode, PreferenceStore, Preferences};
pub use session_store::{sanitize_connection_id, SessionStore};

/// Writes `contents` to `path` through a temp file and rename.
///
/// Creates parent directories if they don't exist.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename temp file {} to {}",
            temp_path.display(),
            path.display()
        )
    })
}
