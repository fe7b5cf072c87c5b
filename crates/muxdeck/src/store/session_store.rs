//! Per-connection session order and metadata.
//!
//! Stored at `<data_dir>/connections/<connection-id>.json`. The registry
//! overlays this on every refresh; nothing here is ever written back to
//! the remote host.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use protocol::SessionMetadata;
use serde::{Deserialize, Serialize};

use super::write_atomic;

/// On-disk layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SessionStoreData {
    /// Version of the store format (for future migrations).
    version: u32,
    /// Manual order, as session ids.
    #[serde(default)]
    order: Vec<String>,
    /// Notes and launch commands, keyed by session id.
    #[serde(default)]
    metadata: BTreeMap<String, SessionMetadata>,
}

impl Default for SessionStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            order: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Replaces characters that are unsafe in a file name.
pub fn sanitize_connection_id(connection_id: &str) -> String {
    let sanitized: String = connection_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() || sanitized.starts_with('.') {
        format!("_{sanitized}")
    } else {
        sanitized
    }
}

/// Manual order and metadata for one connection.
pub struct SessionStore {
    path: PathBuf,
    data: RwLock<SessionStoreData>,
}

impl SessionStore {
    /// Creates an empty store persisting to `path`. Does not read the file.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            data: RwLock::new(SessionStoreData::default()),
        }
    }

    /// Opens and loads the store for `connection_id` under `data_dir`.
    pub fn open(data_dir: &Path, connection_id: &str) -> Result<Self> {
        let path = data_dir
            .join("connections")
            .join(format!("{}.json", sanitize_connection_id(connection_id)));
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Returns the path to the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionStoreData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionStoreData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads the store from disk. A missing file leaves it empty.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            tracing::debug!("Session store not found at {:?}, starting empty", self.path);
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session store: {}", self.path.display()))?;
        let data: SessionStoreData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse session store: {}", self.path.display()))?;

        tracing::debug!(
            order = data.order.len(),
            metadata = data.metadata.len(),
            "Loaded session store from {:?}",
            self.path
        );
        *self.write() = data;
        Ok(())
    }

    fn save(&self, data: &SessionStoreData) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(data).context("Failed to serialize session store")?;
        write_atomic(&self.path, &contents)
    }

    /// Applies `change` to a copy, writes it through, then swaps it in.
    ///
    /// A failed write leaves the in-memory state untouched.
    fn update<T>(&self, change: impl FnOnce(&mut SessionStoreData) -> Result<T>) -> Result<T> {
        let mut data = self.write();
        let mut next = data.clone();
        let result = change(&mut next)?;
        self.save(&next)?;
        *data = next;
        Ok(result)
    }

    /// Persisted manual order.
    pub fn order(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// Replaces the manual order.
    pub fn set_order(&self, order: Vec<String>) -> Result<()> {
        self.update(|data| {
            data.order = order;
            Ok(())
        })
    }

    /// Metadata for `id`, empty if none is stored.
    pub fn metadata(&self, id: &str) -> SessionMetadata {
        self.read().metadata.get(id).cloned().unwrap_or_default()
    }

    /// All stored metadata.
    pub fn all_metadata(&self) -> BTreeMap<String, SessionMetadata> {
        self.read().metadata.clone()
    }

    /// Stores metadata for `id`. Empty metadata removes the entry.
    pub fn set_metadata(&self, id: &str, metadata: SessionMetadata) -> Result<()> {
        self.update(|data| {
            if metadata.is_empty() {
                data.metadata.remove(id);
            } else {
                data.metadata.insert(id.to_string(), metadata);
            }
            Ok(())
        })
    }

    /// Moves order position and metadata from `old_id` to `new_id`.
    ///
    /// Refuses if `new_id` already has metadata or an order position, so
    /// another session's overlay is never overwritten.
    pub fn rename_key(&self, old_id: &str, new_id: &str) -> Result<()> {
        if old_id == new_id {
            return Ok(());
        }
        self.update(|data| {
            if data.metadata.contains_key(new_id) || data.order.iter().any(|id| id == new_id) {
                anyhow::bail!("session id {new_id:?} is already in use in the session store");
            }
            for id in data.order.iter_mut().filter(|id| id.as_str() == old_id) {
                *id = new_id.to_string();
            }
            if let Some(metadata) = data.metadata.remove(old_id) {
                data.metadata.insert(new_id.to_string(), metadata);
            }
            Ok(())
        })
    }

    /// Drops everything stored for `id`.
    pub fn forget(&self, id: &str) -> Result<()> {
        self.update(|data| {
            data.order.retain(|o| o != id);
            data.metadata.remove(id);
            Ok(())
        })
    }
}
