//! In-memory session registry.
//!
//! The registry is the source of truth for the session list shown to the
//! operator. Remote listings replace it wholesale; local edits (rename,
//! reorder) are applied as optimistic overrides that the next successful
//! refresh supersedes.

use std::collections::{HashMap, HashSet};

use protocol::{CapabilitySnapshot, Session, SessionKey, SessionType};

/// Refresh state of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegistryState {
    /// No refresh has run yet.
    #[default]
    Idle,
    /// A refresh is in flight.
    Loading,
    /// The last refresh succeeded.
    Ready,
    /// The last refresh failed; the previous list is still shown.
    Error(String),
}

impl RegistryState {
    /// Returns true while a refresh is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, RegistryState::Loading)
    }
}

/// Session list plus capability flags for one connection.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
    state: RegistryState,
    capabilities: CapabilitySnapshot,
    default_type: SessionType,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Creates an empty registry defaulting new sessions to screen.
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
            state: RegistryState::Idle,
            capabilities: CapabilitySnapshot::default(),
            default_type: SessionType::Screen,
        }
    }

    /// Sessions in display order.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Current refresh state.
    pub fn state(&self) -> &RegistryState {
        &self.state
    }

    /// Capabilities from the last successful refresh.
    pub fn capabilities(&self) -> &CapabilitySnapshot {
        &self.capabilities
    }

    /// Type used for new sessions when none is given.
    pub fn default_type(&self) -> SessionType {
        self.default_type
    }

    /// Overrides the default type for new sessions.
    pub fn set_default_type(&mut self, session_type: SessionType) {
        self.default_type = session_type;
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are known.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Enters `Loading`. Returns false if a refresh is already in flight.
    pub fn begin_refresh(&mut self) -> bool {
        if self.state.is_loading() {
            return false;
        }
        self.state = RegistryState::Loading;
        true
    }

    /// Replaces the session list and capabilities in one step.
    ///
    /// If exactly one multiplexer is installed it becomes the default type
    /// for new sessions.
    pub fn complete_refresh(&mut self, sessions: Vec<Session>, capabilities: CapabilitySnapshot) {
        self.sessions = sessions;
        if let Some(only) = capabilities.only_available() {
            self.default_type = only;
        }
        self.capabilities = capabilities;
        self.state = RegistryState::Ready;
    }

    /// Records a failed refresh. The current list is kept.
    pub fn fail_refresh(&mut self, message: impl Into<String>) {
        self.state = RegistryState::Error(message.into());
    }

    /// Looks up a session by key.
    pub fn get(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.iter().find(|s| s.matches(key))
    }

    /// Returns true if a session with `key` is listed.
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.get(key).is_some()
    }

    /// Returns true if a session of `session_type` is named `name`.
    pub fn has_name(&self, session_type: SessionType, name: &str) -> bool {
        self.sessions
            .iter()
            .any(|s| s.session_type == session_type && s.name == name)
    }

    /// Resolves an operator-supplied reference.
    ///
    /// Accepts `type:id`, then an exact id, then an exact name.
    pub fn resolve(&self, query: &str) -> Option<&Session> {
        if let Ok(key) = query.parse::<SessionKey>() {
            if let Some(session) = self.get(&key) {
                return Some(session);
            }
        }
        self.sessions
            .iter()
            .find(|s| s.id == query)
            .or_else(|| self.sessions.iter().find(|s| s.name == query))
    }

    /// Ids in display order, as persisted for manual ordering.
    pub fn order(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.id.clone()).collect()
    }

    /// Applies a rename locally ahead of the remote command.
    ///
    /// tmux identifies sessions by name, so its id changes too. Returns
    /// the session's key after the rename.
    pub fn rename_local(&mut self, key: &SessionKey, new_name: &str) -> Option<SessionKey> {
        let session = self.sessions.iter_mut().find(|s| s.matches(key))?;
        session.name = new_name.to_string();
        if session.session_type == SessionType::Tmux {
            session.id = new_name.to_string();
        }
        Some(session.key())
    }

    /// Removes a session locally ahead of the remote kill.
    pub fn remove_local(&mut self, key: &SessionKey) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.matches(key))?;
        Some(self.sessions.remove(index))
    }

    /// Moves a session one place up. Returns false at the top or if missing.
    pub fn move_up(&mut self, key: &SessionKey) -> bool {
        match self.index_of(key) {
            Some(index) if index > 0 => {
                self.sessions.swap(index, index - 1);
                true
            }
            _ => false,
        }
    }

    /// Moves a session one place down. Returns false at the bottom or if missing.
    pub fn move_down(&mut self, key: &SessionKey) -> bool {
        match self.index_of(key) {
            Some(index) if index + 1 < self.sessions.len() => {
                self.sessions.swap(index, index + 1);
                true
            }
            _ => false,
        }
    }

    /// Moves a session to the top. Returns false if already there or missing.
    pub fn pin_to_top(&mut self, key: &SessionKey) -> bool {
        match self.index_of(key) {
            Some(index) if index > 0 => {
                let session = self.sessions.remove(index);
                self.sessions.insert(0, session);
                true
            }
            _ => false,
        }
    }

    fn index_of(&self, key: &SessionKey) -> Option<usize> {
        self.sessions.iter().position(|s| s.matches(key))
    }
}

/// Drops later entries that repeat an earlier `(type, id)` pair.
pub fn dedupe(sessions: Vec<Session>) -> Vec<Session> {
    let mut seen = HashSet::new();
    sessions
        .into_iter()
        .filter(|s| seen.insert(s.key()))
        .collect()
}

/// Sorts sessions by their position in a persisted order list.
///
/// Listed ids come first in list order. Unlisted ids follow in their
/// original relative order.
pub fn apply_manual_order(mut sessions: Vec<Session>, order: &[String]) -> Vec<Session> {
    let mut rank: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    for (index, id) in order.iter().enumerate() {
        rank.entry(id.as_str()).or_insert(index);
    }
    sessions.sort_by_key(|s| rank.get(s.id.as_str()).copied().unwrap_or(usize::MAX));
    sessions
}
