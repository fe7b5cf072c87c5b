//! Locally attached sessions.
//!
//! The attachment list is display order (tabs or split panes) and holds at
//! most one binding per `(type, id)`. Membership changes are single list
//! replacements under a short lock that is never held across an await.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use protocol::{MuxError, Result, Session, SessionKey, SessionType, TerminalSurface};

use super::binding::{BindingTiming, TerminalBinding};
use super::pool::ConnectionPool;

/// A session with a live local terminal binding.
#[derive(Clone)]
pub struct AttachedSession {
    /// Session as last seen in the registry.
    pub session: Session,
    /// The binding driving the terminal.
    pub binding: Arc<TerminalBinding>,
    /// The session no longer appears in the remote listing.
    pub stale: bool,
}

impl std::fmt::Debug for AttachedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedSession")
            .field("session", &self.session.key())
            .field("stale", &self.stale)
            .finish()
    }
}

/// Owns the ordered set of attached sessions.
pub struct AttachmentManager {
    pool: Arc<ConnectionPool>,
    timing: BindingTiming,
    entries: RwLock<Vec<AttachedSession>>,
}

impl AttachmentManager {
    /// Creates an empty manager.
    pub fn new(pool: Arc<ConnectionPool>, timing: BindingTiming) -> Self {
        Self {
            pool,
            timing,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<AttachedSession>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<AttachedSession>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the attached list in display order.
    pub fn attached(&self) -> Vec<AttachedSession> {
        self.read().clone()
    }

    /// Keys of attached sessions in display order.
    pub fn keys(&self) -> Vec<SessionKey> {
        self.read().iter().map(|e| e.session.key()).collect()
    }

    /// Returns true if `key` is locally attached.
    pub fn is_attached(&self, key: &SessionKey) -> bool {
        self.read().iter().any(|e| e.session.matches(key))
    }

    /// Binding for an attached session.
    pub fn binding(&self, key: &SessionKey) -> Option<Arc<TerminalBinding>> {
        self.read()
            .iter()
            .find(|e| e.session.matches(key))
            .map(|e| Arc::clone(&e.binding))
    }

    /// Number of attached sessions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Attaches `session`, rendering into `surface`.
    ///
    /// Returns `Ok(false)` without side effects (other than disposing
    /// `surface`) if the session is already attached, or if it was
    /// detached again while the handshake was in flight. A failed
    /// handshake removes the entry and tears the binding down.
    pub async fn attach(&self, session: &Session, surface: Arc<dyn TerminalSurface>) -> Result<bool> {
        let key = session.key();
        let binding = {
            let mut entries = self.write();
            if entries.iter().any(|e| e.session.matches(&key)) {
                drop(entries);
                surface.dispose();
                tracing::debug!(session = %key, "Already attached");
                return Ok(false);
            }
            let binding = Arc::new(TerminalBinding::new(
                session,
                Arc::clone(&self.pool),
                surface,
                self.timing,
            ));
            entries.push(AttachedSession {
                session: session.clone(),
                binding: Arc::clone(&binding),
                stale: false,
            });
            binding
        };

        match binding.mount().await {
            Ok(_) => Ok(true),
            Err(MuxError::Cancelled(reason)) => {
                tracing::debug!(session = %key, reason = %reason, "Attach abandoned");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(session = %key, error = %e, "Attach handshake failed");
                self.write().retain(|entry| !Arc::ptr_eq(&entry.binding, &binding));
                binding.unmount().await;
                Err(e)
            }
        }
    }

    fn take(&self, key: &SessionKey) -> Option<AttachedSession> {
        let mut entries = self.write();
        let index = entries.iter().position(|e| e.session.matches(key))?;
        Some(entries.remove(index))
    }

    /// Detaches locally.
    ///
    /// The detach keystrokes are sent on the dedicated connection; the entry
    /// is removed whether or not that succeeds. Returns false if `key` was
    /// not attached.
    pub async fn detach(&self, key: &SessionKey) -> bool {
        let Some(entry) = self.take(key) else {
            return false;
        };
        release(entry, true).await;
        true
    }

    /// Drops an attachment without sending detach keys, for sessions being
    /// killed.
    pub async fn remove(&self, key: &SessionKey) -> bool {
        let Some(entry) = self.take(key) else {
            return false;
        };
        release(entry, false).await;
        true
    }

    /// Detaches everything. Returns how many sessions were detached.
    pub async fn close_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.write());
        let count = entries.len();
        for entry in entries {
            release(entry, true).await;
        }
        count
    }

    /// Mirrors a local rename onto the attached entry.
    pub fn rename_local(&self, key: &SessionKey, new_name: &str) {
        let mut entries = self.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.session.matches(key)) {
            entry.session.name = new_name.to_string();
            if entry.session.session_type == SessionType::Tmux {
                entry.session.id = new_name.to_string();
            }
        }
    }

    /// Flags entries whose session vanished from `sessions` and refreshes
    /// the rest. Returns the keys that became stale in this pass.
    pub fn mark_stale(&self, sessions: &[Session]) -> Vec<SessionKey> {
        let mut newly_stale = Vec::new();
        for entry in self.write().iter_mut() {
            let key = entry.session.key();
            match sessions.iter().find(|s| s.matches(&key)) {
                Some(fresh) => {
                    entry.session = fresh.clone();
                    entry.stale = false;
                }
                None => {
                    if !entry.stale {
                        tracing::info!(session = %key, "Attached session vanished from remote listing");
                        newly_stale.push(key);
                    }
                    entry.stale = true;
                }
            }
        }
        newly_stale
    }
}

async fn release(entry: AttachedSession, send_detach_keys: bool) {
    let key = entry.session.key();
    if send_detach_keys {
        if let Err(e) = entry.binding.send_detach_keys().await {
            tracing::warn!(session = %key, error = %e, "Detach keystrokes not delivered");
        }
    }
    entry.binding.unmount().await;
    tracing::info!(session = %key, "Detached");
}
