//! Session controller.
//!
//! The single entry point the CLI (or any other front end) drives. It owns
//! the registry for one connection, the attachment list, the persisted
//! overlay stores and the reconciler, and reports every change on a
//! broadcast channel.
//!
//! Local edits are applied before the matching remote command is sent. A
//! remote failure is recorded as the last error and, where the local state
//! may now disagree with the host, followed by a full refresh.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_util::future::join_all;
use protocol::{
    CapabilitySnapshot, ConfirmPrompt, ConnectionSpec, MuxError, RemoteHost, Result, Session,
    SessionKey, SessionMetadata, SessionType, SurfaceFactory,
};
use tokio::sync::broadcast;

use super::attachment::{AttachedSession, AttachmentManager};
use super::binding::{BindingTiming, TerminalBinding};
use super::commands::{self, PackageManager};
use super::pool::ConnectionPool;
use super::reconcile::Reconciler;
use super::registry::{RegistryState, SessionRegistry};
use crate::store::{PreferenceStore, SessionStore};

/// Tunables for a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Handshake and resize timing for every binding.
    pub timing: BindingTiming,
    /// Most sessions attached automatically after the first refresh.
    pub auto_attach_limit: usize,
    /// Delay before the refresh that follows a remote force-detach.
    pub force_detach_settle: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            timing: BindingTiming::default(),
            auto_attach_limit: 6,
            force_detach_settle: Duration::from_millis(1000),
        }
    }
}

/// Events emitted by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// The session list or its order changed.
    RegistryChanged,
    /// The attached list changed.
    AttachedChanged,
    /// The refresh state changed.
    StateChanged(RegistryState),
    /// An operation failed.
    Error(String),
}

/// Confirmation text for killing `sessions`.
fn kill_prompt(sessions: &[Session]) -> String {
    match sessions {
        [one] => format!("Kill {} session {:?}?", one.session_type, one.name),
        many => format!("Kill {} sessions?", many.len()),
    }
}

/// Drives one remote connection.
pub struct SessionController {
    host: Arc<dyn RemoteHost>,
    connection_id: String,
    registry: RwLock<SessionRegistry>,
    reconciler: Reconciler,
    pool: Arc<ConnectionPool>,
    attachments: AttachmentManager,
    store: SessionStore,
    preferences: Arc<PreferenceStore>,
    surfaces: Arc<dyn SurfaceFactory>,
    prompt: Arc<dyn ConfirmPrompt>,
    options: ControllerOptions,
    events: broadcast::Sender<ControllerEvent>,
    last_error: Mutex<Option<String>>,
    auto_attach_armed: AtomicBool,
    force_detach_generation: AtomicU64,
}

impl SessionController {
    /// Creates a controller for the base connection `base`.
    ///
    /// `base.id` must already be usable with [`RemoteHost::execute`].
    pub fn new(
        host: Arc<dyn RemoteHost>,
        base: ConnectionSpec,
        store: SessionStore,
        preferences: Arc<PreferenceStore>,
        surfaces: Arc<dyn SurfaceFactory>,
        prompt: Arc<dyn ConfirmPrompt>,
        options: ControllerOptions,
    ) -> Self {
        let connection_id = base.id.clone();
        let pool = Arc::new(ConnectionPool::new(Arc::clone(&host), base));
        let attachments = AttachmentManager::new(Arc::clone(&pool), options.timing);
        let (events, _) = broadcast::channel(64);

        Self {
            host,
            connection_id,
            registry: RwLock::new(SessionRegistry::new()),
            reconciler: Reconciler::new(),
            pool,
            attachments,
            store,
            preferences,
            surfaces,
            prompt,
            options,
            events,
            last_error: Mutex::new(None),
            auto_attach_armed: AtomicBool::new(false),
            force_detach_generation: AtomicU64::new(0),
        }
    }

    fn registry(&self) -> RwLockReadGuard<'_, SessionRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, SessionRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn report(&self, operation: &str, err: &MuxError) {
        tracing::warn!(connection_id = %self.connection_id, operation, error = %err, "Operation failed");
        let message = format!("{operation}: {err}");
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.clone());
        self.emit(ControllerEvent::Error(message));
    }

    fn clear_error(&self) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Subscribes to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Base connection id.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Sessions in display order.
    pub fn sessions(&self) -> Vec<Session> {
        self.registry().sessions().to_vec()
    }

    /// Current refresh state.
    pub fn state(&self) -> RegistryState {
        self.registry().state().clone()
    }

    /// Capabilities from the last successful refresh.
    pub fn capabilities(&self) -> CapabilitySnapshot {
        *self.registry().capabilities()
    }

    /// Type used for new sessions when none is given.
    pub fn default_type(&self) -> SessionType {
        self.registry().default_type()
    }

    /// Memoized server timezone offset in minutes, once probed.
    pub fn timezone_offset(&self) -> Option<i32> {
        self.reconciler.timezone_offset()
    }

    /// Message from the most recent failed operation.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attached sessions in display order.
    pub fn attached(&self) -> Vec<AttachedSession> {
        self.attachments.attached()
    }

    /// Binding for an attached session.
    pub fn binding(&self, key: &SessionKey) -> Option<Arc<TerminalBinding>> {
        self.attachments.binding(key)
    }

    /// Resolves `type:id`, an id or a name against the registry.
    pub fn resolve(&self, query: &str) -> Option<Session> {
        self.registry().resolve(query).cloned()
    }

    /// Stored metadata for a session id.
    pub fn metadata(&self, id: &str) -> SessionMetadata {
        self.store.metadata(id)
    }

    /// Global display preferences.
    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    fn lookup(&self, key: &SessionKey) -> Result<Session> {
        self.registry()
            .get(key)
            .cloned()
            .ok_or_else(|| MuxError::SessionNotFound {
                session: key.to_string(),
            })
    }

    async fn execute(&self, command: &str) -> Result<String> {
        tracing::debug!(connection_id = %self.connection_id, command = %command, "Executing remote command");
        self.host.execute(&self.connection_id, command).await
    }

    /// Starts the controller: refreshes and, on the first successful
    /// refresh, auto-attaches if enabled.
    pub async fn mount(&self) -> Result<bool> {
        self.auto_attach_armed.store(true, Ordering::SeqCst);
        tracing::info!(connection_id = %self.connection_id, "Mounting session controller");
        self.refresh().await
    }

    /// Tears down every attachment and dedicated connection.
    ///
    /// Cancels any pending post force-detach refresh.
    pub async fn unmount(&self) {
        self.auto_attach_armed.store(false, Ordering::SeqCst);
        self.force_detach_generation.fetch_add(1, Ordering::SeqCst);
        let detached = self.attachments.close_all().await;
        self.pool.close_all().await;
        if detached > 0 {
            self.emit(ControllerEvent::AttachedChanged);
        }
        tracing::info!(connection_id = %self.connection_id, detached, "Unmounted session controller");
    }

    /// Re-reads the remote listing.
    ///
    /// Returns `Ok(false)` if a refresh is already in flight. On failure the
    /// previous list is kept and the error is recorded.
    pub async fn refresh(&self) -> Result<bool> {
        if !self.registry_mut().begin_refresh() {
            tracing::debug!(connection_id = %self.connection_id, "Refresh already in flight");
            return Ok(false);
        }
        self.emit(ControllerEvent::StateChanged(RegistryState::Loading));

        let order = self.store.order();
        let fetched = self
            .reconciler
            .fetch(self.host.as_ref(), &self.connection_id, &order)
            .await;

        match fetched {
            Ok(reconciled) => {
                let count = reconciled.sessions.len();
                let stale = self.attachments.mark_stale(&reconciled.sessions);
                self.registry_mut()
                    .complete_refresh(reconciled.sessions, reconciled.capabilities);
                self.clear_error();
                tracing::info!(
                    connection_id = %self.connection_id,
                    sessions = count,
                    stale = stale.len(),
                    "Refreshed sessions"
                );
                self.emit(ControllerEvent::RegistryChanged);
                self.emit(ControllerEvent::StateChanged(RegistryState::Ready));
                if !stale.is_empty() {
                    self.emit(ControllerEvent::AttachedChanged);
                }
                self.auto_attach().await;
                Ok(true)
            }
            Err(e) => {
                let message = e.to_string();
                self.registry_mut().fail_refresh(message.clone());
                self.report("refresh", &e);
                self.emit(ControllerEvent::StateChanged(RegistryState::Error(message)));
                Err(e)
            }
        }
    }

    /// Refresh whose failure is already reported through `last_error`.
    async fn refresh_after(&self, operation: &str) {
        if let Err(e) = self.refresh().await {
            tracing::debug!(operation, error = %e, "Follow-up refresh failed");
        }
    }

    async fn auto_attach(&self) {
        if !self.preferences.get().auto_attach {
            return;
        }
        if !self.auto_attach_armed.swap(false, Ordering::SeqCst) {
            return;
        }
        if !self.attachments.is_empty() {
            tracing::debug!("Skipping auto-attach, sessions already attached");
            return;
        }

        let targets: Vec<Session> = self
            .registry()
            .sessions()
            .iter()
            .take(self.options.auto_attach_limit)
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }
        tracing::info!(count = targets.len(), "Auto-attaching sessions");

        let results = join_all(targets.iter().map(|s| self.attach_session(s))).await;
        for (session, result) in targets.iter().zip(results) {
            if let Err(e) = result {
                self.report(&format!("auto-attach {}", session.key()), &e);
            }
        }
    }

    async fn attach_session(&self, session: &Session) -> Result<bool> {
        let key = session.key();
        if self.attachments.is_attached(&key) {
            return Ok(false);
        }
        let surface = self.surfaces.create(session, self.host.theme())?;
        let attached = self.attachments.attach(session, surface).await?;
        if attached {
            tracing::info!(session = %key, "Attached");
            self.emit(ControllerEvent::AttachedChanged);
        }
        Ok(attached)
    }

    /// Attaches a listed session locally.
    ///
    /// Returns `Ok(false)` if it is already attached.
    pub async fn attach(&self, key: &SessionKey) -> Result<bool> {
        let session = self.lookup(key)?;
        self.attach_session(&session).await.inspect_err(|e| {
            self.report("attach", e);
        })
    }

    /// Detaches locally. Returns false if `key` was not attached.
    pub async fn detach(&self, key: &SessionKey) -> bool {
        let detached = self.attachments.detach(key).await;
        if detached {
            self.emit(ControllerEvent::AttachedChanged);
        }
        detached
    }

    /// Detaches every local attachment after confirmation.
    ///
    /// Returns false if the operator declined.
    pub async fn close_all(&self) -> bool {
        let count = self.attachments.len();
        if count == 0 {
            return true;
        }
        if !self.prompt.confirm(&format!("Detach all {count} sessions?")) {
            return false;
        }
        self.attachments.close_all().await;
        self.emit(ControllerEvent::AttachedChanged);
        true
    }

    /// Creates a session and refreshes.
    ///
    /// A blank `command` starts a plain shell. Returns the new session if
    /// the follow-up refresh lists it.
    pub async fn create(
        &self,
        session_type: Option<SessionType>,
        name: &str,
        command: Option<&str>,
    ) -> Result<Option<Session>> {
        let session_type = session_type.unwrap_or_else(|| self.default_type());
        let result = self.create_inner(session_type, name, command).await;
        result.inspect_err(|e| self.report("create", e))
    }

    async fn create_inner(
        &self,
        session_type: SessionType,
        name: &str,
        command: Option<&str>,
    ) -> Result<Option<Session>> {
        {
            let registry = self.registry();
            if *registry.state() == RegistryState::Ready
                && !registry.capabilities().is_available(session_type)
            {
                return Err(MuxError::ToolUnavailable(session_type.to_string()));
            }
        }
        let text = commands::create(session_type, name, command)?;
        self.execute(&text).await?;
        tracing::info!(session_type = %session_type, name, "Created session");

        self.refresh_after("create").await;

        let created = self
            .registry()
            .sessions()
            .iter()
            .find(|s| s.session_type == session_type && s.name == name)
            .cloned();
        let command = command.map(str::trim).filter(|c| !c.is_empty());
        if let (Some(session), Some(command)) = (&created, command) {
            let mut metadata = self.store.metadata(&session.id);
            metadata.command = Some(command.to_string());
            self.store.set_metadata(&session.id, metadata).map_err(store_error)?;
        }
        Ok(created)
    }

    /// Kills one session after confirmation.
    ///
    /// Returns `Ok(false)` if the operator declined.
    pub async fn kill(&self, key: &SessionKey) -> Result<bool> {
        self.kill_many(std::slice::from_ref(key)).await
    }

    /// Kills several sessions behind a single confirmation.
    ///
    /// Each session leaves the attached list and the registry before its
    /// kill command is sent, and is not restored if the command fails. A
    /// refresh follows whatever the outcome.
    pub async fn kill_many(&self, keys: &[SessionKey]) -> Result<bool> {
        let sessions = keys
            .iter()
            .map(|key| self.lookup(key))
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| self.report("kill", e))?;
        if sessions.is_empty() {
            return Ok(true);
        }
        if !self.prompt.confirm(&kill_prompt(&sessions)) {
            tracing::debug!(count = sessions.len(), "Kill declined");
            return Ok(false);
        }

        let mut first_error = None;
        for session in &sessions {
            let key = session.key();
            if self.attachments.remove(&key).await {
                self.emit(ControllerEvent::AttachedChanged);
            }
            self.registry_mut().remove_local(&key);
            self.emit(ControllerEvent::RegistryChanged);

            match self.execute(&commands::kill(&key)).await {
                Ok(_) => {
                    tracing::info!(session = %key, "Killed session");
                    if let Err(e) = self.store.forget(&session.id) {
                        tracing::warn!(session = %key, error = %e, "Failed to drop stored metadata");
                    }
                }
                Err(e) => {
                    self.report(&format!("kill {key}"), &e);
                    first_error.get_or_insert(e);
                }
            }
        }

        self.refresh_after("kill").await;
        match first_error {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    /// Renames a session. Returns its key after the rename.
    ///
    /// The registry, the attached list and the stored overlay are updated
    /// first; a failed remote command is followed by a corrective refresh.
    pub async fn rename(&self, key: &SessionKey, new_name: &str) -> Result<SessionKey> {
        let result = self.rename_inner(key, new_name).await;
        result.inspect_err(|e| self.report("rename", e))
    }

    async fn rename_inner(&self, key: &SessionKey, new_name: &str) -> Result<SessionKey> {
        let session = self.lookup(key)?;
        if session.name == new_name {
            return Ok(session.key());
        }
        let text = commands::rename(key, new_name)?;

        let target = match key.session_type {
            SessionType::Tmux => SessionKey::new(SessionType::Tmux, new_name),
            SessionType::Screen => key.clone(),
        };
        if target != *key && self.registry().contains(&target) {
            return Err(MuxError::SessionExists {
                session: target.to_string(),
            });
        }
        self.store
            .rename_key(&key.id, &target.id)
            .map_err(store_error)?;

        let new_key = self
            .registry_mut()
            .rename_local(key, new_name)
            .ok_or_else(|| MuxError::SessionNotFound {
                session: key.to_string(),
            })?;
        self.attachments.rename_local(key, new_name);
        self.emit(ControllerEvent::RegistryChanged);
        self.emit(ControllerEvent::AttachedChanged);

        if let Err(e) = self.execute(&text).await {
            if let Err(store_err) = self.store.rename_key(&new_key.id, &key.id) {
                tracing::warn!(session = %key, error = %store_err, "Failed to restore stored metadata");
            }
            self.registry_mut().rename_local(&new_key, &session.name);
            self.attachments.rename_local(&new_key, &session.name);
            self.emit(ControllerEvent::AttachedChanged);
            self.refresh_after("rename").await;
            return Err(e);
        }
        tracing::info!(session = %key, new_name, "Renamed session");
        Ok(new_key)
    }

    /// Creates a copy of a session, started with its stored command.
    ///
    /// The copy is named `<name>-copy`, then `-copy2`, `-copy3` and so on
    /// until the name is free.
    pub async fn duplicate(&self, key: &SessionKey) -> Result<Option<Session>> {
        let result = self.duplicate_inner(key).await;
        result.inspect_err(|e| self.report("duplicate", e))
    }

    async fn duplicate_inner(&self, key: &SessionKey) -> Result<Option<Session>> {
        let source = self.lookup(key)?;
        let metadata = self.store.metadata(&source.id);
        let name = {
            let registry = self.registry();
            copy_name(&source.name, |candidate| {
                registry.has_name(source.session_type, candidate)
            })
        };

        let created = self
            .create_inner(source.session_type, &name, metadata.command.as_deref())
            .await?;
        if let Some(copy) = &created {
            if !metadata.is_empty() {
                self.store
                    .set_metadata(&copy.id, metadata)
                    .map_err(store_error)?;
            }
            tracing::info!(source = %key, copy = %copy.key(), "Duplicated session");
        }
        Ok(created)
    }

    /// Evicts other remote viewers of a session.
    ///
    /// Local attachments are untouched. A refresh follows after the settle
    /// delay; a newer force-detach supersedes a pending one.
    pub async fn force_detach_remote(self: &Arc<Self>, key: &SessionKey) -> Result<()> {
        let result = self.force_detach_inner(key).await;
        result.inspect_err(|e| self.report("force-detach", e))
    }

    async fn force_detach_inner(self: &Arc<Self>, key: &SessionKey) -> Result<()> {
        let session = self.lookup(key)?;
        self.execute(&commands::force_detach(&session.key())).await?;
        tracing::info!(session = %key, "Force-detached remote viewers");

        let generation = self.force_detach_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let settle = self.options.force_detach_settle;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            if this.force_detach_generation.load(Ordering::SeqCst) == generation {
                this.refresh_after("force-detach").await;
            }
        });
        Ok(())
    }

    /// Sets or clears a session's note. Local only.
    pub fn set_note(&self, key: &SessionKey, note: Option<&str>) -> Result<()> {
        self.edit_metadata(key, |m| m.note = non_blank(note))
    }

    /// Sets or clears a session's stored launch command. Local only.
    pub fn set_command(&self, key: &SessionKey, command: Option<&str>) -> Result<()> {
        self.edit_metadata(key, |m| m.command = non_blank(command))
    }

    fn edit_metadata(&self, key: &SessionKey, change: impl FnOnce(&mut SessionMetadata)) -> Result<()> {
        let session = self.lookup(key)?;
        let mut metadata = self.store.metadata(&session.id);
        change(&mut metadata);
        self.store
            .set_metadata(&session.id, metadata)
            .map_err(store_error)
            .inspect_err(|e| self.report("edit metadata", e))?;
        self.emit(ControllerEvent::RegistryChanged);
        Ok(())
    }

    /// Moves a session one place up. Returns false if it cannot move.
    pub fn move_up(&self, key: &SessionKey) -> Result<bool> {
        self.reorder(key, SessionRegistry::move_up)
    }

    /// Moves a session one place down. Returns false if it cannot move.
    pub fn move_down(&self, key: &SessionKey) -> Result<bool> {
        self.reorder(key, SessionRegistry::move_down)
    }

    /// Moves a session to the top. Returns false if it is already there.
    pub fn pin_to_top(&self, key: &SessionKey) -> Result<bool> {
        self.reorder(key, SessionRegistry::pin_to_top)
    }

    fn reorder(
        &self,
        key: &SessionKey,
        apply: impl FnOnce(&mut SessionRegistry, &SessionKey) -> bool,
    ) -> Result<bool> {
        let order = {
            let mut registry = self.registry_mut();
            if !registry.contains(key) {
                return Err(MuxError::SessionNotFound {
                    session: key.to_string(),
                });
            }
            if !apply(&mut registry, key) {
                return Ok(false);
            }
            registry.order()
        };
        self.emit(ControllerEvent::RegistryChanged);
        self.store
            .set_order(order)
            .map_err(store_error)
            .inspect_err(|e| self.report("reorder", e))?;
        Ok(true)
    }

    async fn detect_package_manager(&self) -> Result<PackageManager> {
        let output = self.execute(&PackageManager::probe_command()).await?;
        let manager = PackageManager::detect(&output)?;
        tracing::debug!(package_manager = manager.binary(), "Detected package manager");
        Ok(manager)
    }

    /// Installs a multiplexer with the host's package manager, then
    /// refreshes.
    pub async fn install(&self, tool: SessionType) -> Result<PackageManager> {
        let result = async {
            let manager = self.detect_package_manager().await?;
            self.execute(&manager.install_command(tool)).await?;
            tracing::info!(tool = %tool, package_manager = manager.binary(), "Installed");
            Ok(manager)
        }
        .await;
        match result {
            Ok(manager) => {
                self.refresh_after("install").await;
                Ok(manager)
            }
            Err(e) => {
                self.report("install", &e);
                Err(e)
            }
        }
    }

    /// Removes a multiplexer after confirmation, then refreshes.
    ///
    /// Returns `Ok(false)` if the operator declined.
    pub async fn uninstall(&self, tool: SessionType) -> Result<bool> {
        if !self.prompt.confirm(&format!("Uninstall {tool} from the remote host?")) {
            return Ok(false);
        }
        let result = async {
            let manager = self.detect_package_manager().await?;
            self.execute(&manager.uninstall_command(tool)).await?;
            tracing::info!(tool = %tool, package_manager = manager.binary(), "Uninstalled");
            Ok(())
        }
        .await;
        match result {
            Ok(()) => {
                self.refresh_after("uninstall").await;
                Ok(true)
            }
            Err(e) => {
                self.report("uninstall", &e);
                Err(e)
            }
        }
    }
}

fn store_error(err: anyhow::Error) -> MuxError {
    MuxError::Store(format!("{err:#}"))
}

fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// First free name among `<name>-copy`, `<name>-copy2`, `<name>-copy3`...
fn copy_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    let first = format!("{name}-copy");
    if !taken(&first) {
        return first;
    }
    (2u32..)
        .map(|n| format!("{name}-copy{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{RecordingSurfaceFactory, ScriptedHost, ScriptedPrompt};
    use crate::session::probe::ProbeSections;
    use protocol::{AuthMethod, SessionStatus, TerminalSize};
    use tempfile::TempDir;

    /// Remote listings the scripted host answers the probe with.
    #[derive(Default)]
    struct Remote {
        screen: Mutex<String>,
        tmux: Mutex<String>,
        fail_probe: AtomicBool,
    }

    impl Remote {
        fn set_screen(&self, listing: &str) {
            *self.screen.lock().unwrap() = listing.to_string();
        }

        fn set_tmux(&self, listing: &str) {
            *self.tmux.lock().unwrap() = listing.to_string();
        }

        fn respond(&self, command: &str) -> Result<String> {
            if ProbeSections::is_probe(command) {
                if self.fail_probe.load(Ordering::SeqCst) {
                    return Err(MuxError::transport("connection reset"));
                }
                return Ok(ProbeSections {
                    timezone: "+0000".into(),
                    has_screen: "yes".into(),
                    screen_listing: self.screen.lock().unwrap().clone(),
                    has_tmux: "yes".into(),
                    tmux_listing: self.tmux.lock().unwrap().clone(),
                }
                .render());
            }
            if command.contains("command -v apt-get") {
                return Ok("apt-get\n".into());
            }
            Ok(String::new())
        }
    }

    struct Fixture {
        _dir: TempDir,
        host: Arc<ScriptedHost>,
        remote: Arc<Remote>,
        surfaces: Arc<RecordingSurfaceFactory>,
        prompt: Arc<ScriptedPrompt>,
        controller: Arc<SessionController>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(ScriptedHost::new());
        let remote = Arc::new(Remote::default());
        let responder = Arc::clone(&remote);
        host.respond_with(move |_, command| responder.respond(command));

        let surfaces = Arc::new(RecordingSurfaceFactory::new(TerminalSize::new(24, 80)));
        let prompt = Arc::new(ScriptedPrompt::new(true));
        let base = ConnectionSpec {
            id: "prod".into(),
            host: "10.0.0.5".into(),
            port: 22,
            user: "ops".into(),
            auth: AuthMethod::Agent,
        };
        let controller = Arc::new(SessionController::new(
            host.clone(),
            base,
            SessionStore::open(dir.path(), "prod").unwrap(),
            Arc::new(PreferenceStore::open(dir.path()).unwrap()),
            surfaces.clone(),
            prompt.clone(),
            ControllerOptions::default(),
        ));
        Fixture {
            _dir: dir,
            host,
            remote,
            surfaces,
            prompt,
            controller,
        }
    }

    fn probes(host: &ScriptedHost) -> usize {
        host.commands()
            .iter()
            .filter(|c| ProbeSections::is_probe(c))
            .count()
    }

    fn names(controller: &SessionController) -> Vec<String> {
        controller.sessions().into_iter().map(|s| s.name).collect()
    }

    const TWO_SCREENS: &str = "There are screens on:\n\
        \t111.alpha\t(01/02/2025 10:00:00)\t(Detached)\n\
        \t222.beta\t(01/02/2025 11:00:00)\t(Attached)\n\
        2 Sockets in /run/screen/S-ops.";

    #[tokio::test(start_paused = true)]
    async fn test_refresh_populates_registry() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.remote.set_tmux("work: 2 windows (created Mon Jan  1 00:00:00 2024)");

        assert!(f.controller.refresh().await.unwrap());
        assert_eq!(names(&f.controller), vec!["alpha", "beta", "work"]);
        assert_eq!(f.controller.state(), RegistryState::Ready);
        assert_eq!(f.controller.timezone_offset(), Some(0));
        let beta = f.controller.resolve("beta").unwrap();
        assert_eq!(beta.status, SessionStatus::Attached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_list() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.refresh().await.unwrap();

        f.remote.fail_probe.store(true, Ordering::SeqCst);
        let err = f.controller.refresh().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(f.controller.sessions().len(), 2);
        assert!(matches!(f.controller.state(), RegistryState::Error(_)));
        assert!(f.controller.last_error().unwrap().contains("connection reset"));

        f.remote.fail_probe.store(false, Ordering::SeqCst);
        f.controller.refresh().await.unwrap();
        assert_eq!(f.controller.state(), RegistryState::Ready);
        assert!(f.controller.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_refresh() {
        let f = fixture();
        let mut events = f.controller.subscribe();
        f.controller.refresh().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            ControllerEvent::StateChanged(RegistryState::Loading)
        );
        assert_eq!(events.recv().await.unwrap(), ControllerEvent::RegistryChanged);
        assert_eq!(
            events.recv().await.unwrap(),
            ControllerEvent::StateChanged(RegistryState::Ready)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_stores_launch_command() {
        let f = fixture();
        f.controller.refresh().await.unwrap();

        let remote = Arc::clone(&f.remote);
        f.host.respond_with(move |_, command| {
            if command.starts_with("screen -dmS") {
                remote.set_screen("There is a screen on:\n\t4242.svc\t(Detached)\n1 Socket in /run/screen.");
            }
            remote.respond(command)
        });

        let created = f
            .controller
            .create(Some(SessionType::Screen), "svc", Some("htop"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.id, "4242");
        assert_eq!(f.controller.metadata("4242").command.as_deref(), Some("htop"));
        assert!(f
            .host
            .commands()
            .contains(&"screen -dmS svc bash -c 'htop; exec bash'".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_missing_tool() {
        let f = fixture();
        f.host.respond_with(|_, command| {
            if !ProbeSections::is_probe(command) {
                return Ok(String::new());
            }
            Ok(ProbeSections {
                has_screen: "no".into(),
                has_tmux: "yes".into(),
                ..ProbeSections::default()
            }
            .render())
        });
        f.controller.refresh().await.unwrap();
        assert_eq!(f.controller.default_type(), SessionType::Tmux);

        let err = f
            .controller
            .create(Some(SessionType::Screen), "svc", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::ToolUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_invalid_name_without_remote_call() {
        let f = fixture();
        let err = f
            .controller
            .create(Some(SessionType::Tmux), "bad name", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::InvalidSessionName { .. }));
        assert!(f.host.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_declined_sends_nothing() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.refresh().await.unwrap();
        f.prompt.set_answer(false);

        let key = SessionKey::new(SessionType::Screen, "111");
        assert!(!f.controller.kill(&key).await.unwrap());
        assert_eq!(f.prompt.asked().len(), 1);
        assert!(!f.host.commands().iter().any(|c| c.contains("quit")));
        assert_eq!(f.controller.sessions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_many_confirms_once() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.refresh().await.unwrap();
        f.controller
            .set_note(&SessionKey::new(SessionType::Screen, "111"), Some("build box"))
            .unwrap();

        let keys = [
            SessionKey::new(SessionType::Screen, "111"),
            SessionKey::new(SessionType::Screen, "222"),
        ];
        let remote = Arc::clone(&f.remote);
        f.host.respond_with(move |_, command| {
            if command.ends_with("quit") {
                remote.set_screen("No Sockets found in /run/screen/S-ops.");
            }
            remote.respond(command)
        });

        assert!(f.controller.kill_many(&keys).await.unwrap());
        assert_eq!(f.prompt.asked(), vec!["Kill 2 sessions?".to_string()]);
        let commands = f.host.commands();
        assert!(commands.contains(&"screen -X -S 111 quit".to_string()));
        assert!(commands.contains(&"screen -X -S 222 quit".to_string()));
        assert!(f.controller.sessions().is_empty());
        assert!(f.controller.metadata("111").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_unknown_session() {
        let f = fixture();
        f.controller.refresh().await.unwrap();
        let err = f
            .controller
            .kill(&SessionKey::new(SessionType::Screen, "9"))
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::SessionNotFound { .. }));
        assert!(f.prompt.asked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_tmux_moves_overlay() {
        let f = fixture();
        f.remote.set_tmux("work: 1 windows (created Mon Jan  1 00:00:00 2024)");
        f.controller.refresh().await.unwrap();
        let key = SessionKey::new(SessionType::Tmux, "work");
        f.controller.set_note(&key, Some("main")).unwrap();

        let new_key = f.controller.rename(&key, "play").await.unwrap();
        assert_eq!(new_key, SessionKey::new(SessionType::Tmux, "play"));
        assert_eq!(names(&f.controller), vec!["play"]);
        assert_eq!(f.controller.metadata("play").note.as_deref(), Some("main"));
        assert!(f
            .host
            .commands()
            .contains(&"tmux rename-session -t work play".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_failure_refreshes() {
        let f = fixture();
        f.remote.set_tmux("work: 1 windows (created Mon Jan  1 00:00:00 2024)");
        f.controller.refresh().await.unwrap();

        let remote = Arc::clone(&f.remote);
        f.host.respond_with(move |_, command| {
            if command.starts_with("tmux rename-session") {
                return Err(MuxError::transport("exit status 1"));
            }
            remote.respond(command)
        });

        let before = probes(&f.host);
        let key = SessionKey::new(SessionType::Tmux, "work");
        assert!(f.controller.rename(&key, "play").await.is_err());
        assert_eq!(probes(&f.host), before + 1);
        assert_eq!(names(&f.controller), vec!["work"]);
        assert!(f.controller.last_error().unwrap().starts_with("rename"));
    }

    const TMUX_A_B: &str = "a: 1 windows (created Mon Jan  1 00:00:00 2024)\n\
        b: 1 windows (created Mon Jan  1 00:00:00 2024)";

    fn attached_keys(controller: &SessionController) -> Vec<String> {
        controller
            .attached()
            .iter()
            .map(|a| a.session.key().to_string())
            .collect()
    }

    fn keys(controller: &SessionController) -> Vec<String> {
        controller
            .sessions()
            .iter()
            .map(|s| s.key().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_onto_existing_tmux_name_is_refused() {
        let f = fixture();
        f.remote.set_tmux(TMUX_A_B);
        f.controller.refresh().await.unwrap();
        let a = SessionKey::new(SessionType::Tmux, "a");
        let b = SessionKey::new(SessionType::Tmux, "b");
        f.controller.attach(&a).await.unwrap();
        f.controller.attach(&b).await.unwrap();
        f.controller.set_note(&a, Some("a-note")).unwrap();
        f.controller.set_note(&b, Some("b-note")).unwrap();

        let err = f.controller.rename(&a, "b").await.unwrap_err();
        assert!(matches!(err, MuxError::SessionExists { ref session } if session == "tmux:b"));
        assert!(!f
            .host
            .commands()
            .iter()
            .any(|c| c.starts_with("tmux rename-session")));
        assert_eq!(keys(&f.controller), vec!["tmux:a", "tmux:b"]);
        assert_eq!(attached_keys(&f.controller), vec!["tmux:a", "tmux:b"]);
        assert_eq!(f.controller.metadata("a").note.as_deref(), Some("a-note"));
        assert_eq!(f.controller.metadata("b").note.as_deref(), Some("b-note"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rename_restores_attached_and_metadata() {
        let f = fixture();
        f.remote.set_tmux(TMUX_A_B);
        f.controller.refresh().await.unwrap();
        let a = SessionKey::new(SessionType::Tmux, "a");
        let b = SessionKey::new(SessionType::Tmux, "b");
        f.controller.attach(&a).await.unwrap();
        f.controller.attach(&b).await.unwrap();
        f.controller.set_note(&a, Some("a-note")).unwrap();
        f.controller.set_note(&b, Some("b-note")).unwrap();

        let remote = Arc::clone(&f.remote);
        f.host.respond_with(move |_, command| {
            if command.starts_with("tmux rename-session") {
                return Err(MuxError::transport("can't find session: a"));
            }
            remote.respond(command)
        });

        assert!(f.controller.rename(&a, "c").await.is_err());
        assert_eq!(keys(&f.controller), vec!["tmux:a", "tmux:b"]);
        assert_eq!(attached_keys(&f.controller), vec!["tmux:a", "tmux:b"]);
        assert!(f.controller.attached().iter().all(|entry| !entry.stale));
        assert_eq!(f.controller.metadata("a").note.as_deref(), Some("a-note"));
        assert_eq!(f.controller.metadata("b").note.as_deref(), Some("b-note"));
        assert!(f.controller.metadata("c").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_rename_may_share_a_name() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.refresh().await.unwrap();
        let alpha = SessionKey::new(SessionType::Screen, "111");
        f.controller.attach(&alpha).await.unwrap();

        let renamed = f.controller.rename(&alpha, "beta").await.unwrap();
        assert_eq!(renamed, alpha);
        assert_eq!(attached_keys(&f.controller), vec!["screen:111"]);
        assert!(f
            .host
            .commands()
            .contains(&"screen -S 111 -X sessionname beta".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_keeps_attached_set_unique() {
        let f = fixture();
        f.remote.set_tmux("api: 1 windows (created Mon Jan  1 00:00:00 2024)");
        f.controller.refresh().await.unwrap();
        let api = SessionKey::new(SessionType::Tmux, "api");
        f.controller.attach(&api).await.unwrap();

        let remote = Arc::clone(&f.remote);
        f.host.respond_with(move |_, command| {
            if command.starts_with("tmux new") {
                remote.set_tmux(
                    "api: 1 windows (created Mon Jan  1 00:00:00 2024)\n\
                     api-copy: 1 windows (created Mon Jan  1 00:00:00 2024)",
                );
            }
            remote.respond(command)
        });

        let copy = f.controller.duplicate(&api).await.unwrap().unwrap();
        f.controller.attach(&copy.key()).await.unwrap();
        assert!(!f.controller.attach(&copy.key()).await.unwrap());
        assert_eq!(attached_keys(&f.controller), vec!["tmux:api", "tmux:api-copy"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_picks_free_name() {
        let f = fixture();
        f.remote.set_tmux(
            "api: 1 windows (created Mon Jan  1 00:00:00 2024)\n\
             api-copy: 1 windows (created Mon Jan  1 00:00:00 2024)",
        );
        f.controller.refresh().await.unwrap();
        let key = SessionKey::new(SessionType::Tmux, "api");
        f.controller.set_command(&key, Some("cargo run")).unwrap();
        f.controller.set_note(&key, Some("backend")).unwrap();

        let remote = Arc::clone(&f.remote);
        f.host.respond_with(move |_, command| {
            if command.starts_with("tmux new") {
                remote.set_tmux(
                    "api: 1 windows (created Mon Jan  1 00:00:00 2024)\n\
                     api-copy: 1 windows (created Mon Jan  1 00:00:00 2024)\n\
                     api-copy2: 1 windows (created Mon Jan  1 00:00:00 2024)",
                );
            }
            remote.respond(command)
        });

        let copy = f.controller.duplicate(&key).await.unwrap().unwrap();
        assert_eq!(copy.name, "api-copy2");
        let metadata = f.controller.metadata("api-copy2");
        assert_eq!(metadata.command.as_deref(), Some("cargo run"));
        assert_eq!(metadata.note.as_deref(), Some("backend"));
        assert!(f
            .host
            .commands()
            .iter()
            .any(|c| c.starts_with("tmux new -d -s api-copy2") && c.contains("cargo run")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_detach_refreshes_after_settle() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.refresh().await.unwrap();
        let before = probes(&f.host);

        let key = SessionKey::new(SessionType::Screen, "222");
        f.controller.force_detach_remote(&key).await.unwrap();
        f.controller.force_detach_remote(&key).await.unwrap();
        assert!(f.host.commands().contains(&"screen -d 222".to_string()));
        assert_eq!(probes(&f.host), before);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(probes(&f.host), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reorder_persists() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.refresh().await.unwrap();

        let beta = SessionKey::new(SessionType::Screen, "222");
        assert!(f.controller.pin_to_top(&beta).unwrap());
        assert!(!f.controller.move_up(&beta).unwrap());
        assert_eq!(names(&f.controller), vec!["beta", "alpha"]);

        f.controller.refresh().await.unwrap();
        assert_eq!(names(&f.controller), vec!["beta", "alpha"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_uses_surface_factory_and_theme() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.refresh().await.unwrap();
        f.host.set_theme(protocol::Theme::Light);

        let key = SessionKey::new(SessionType::Screen, "111");
        assert!(f.controller.attach(&key).await.unwrap());
        assert!(!f.controller.attach(&key).await.unwrap());
        let created = f.surfaces.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].1, protocol::Theme::Light);
        assert_eq!(f.host.open_connections(), vec!["prod-screen-111".to_string()]);

        assert!(f.controller.detach(&key).await);
        assert!(f.controller.attached().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_all_requires_confirmation() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.refresh().await.unwrap();
        f.controller
            .attach(&SessionKey::new(SessionType::Screen, "111"))
            .await
            .unwrap();

        f.prompt.set_answer(false);
        assert!(!f.controller.close_all().await);
        assert_eq!(f.controller.attached().len(), 1);

        f.prompt.set_answer(true);
        assert!(f.controller.close_all().await);
        assert!(f.controller.attached().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_attachment_is_flagged_stale() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.refresh().await.unwrap();
        let key = SessionKey::new(SessionType::Screen, "111");
        f.controller.attach(&key).await.unwrap();

        f.remote.set_screen("There is a screen on:\n\t222.beta\t(Detached)\n1 Socket in /run/screen.");
        f.controller.refresh().await.unwrap();
        let attached = f.controller.attached();
        assert_eq!(attached.len(), 1);
        assert!(attached[0].stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_uses_detected_manager() {
        let f = fixture();
        let manager = f.controller.install(SessionType::Tmux).await.unwrap();
        assert_eq!(manager, PackageManager::Apt);
        assert!(f
            .host
            .commands()
            .contains(&"sudo apt-get install -y tmux".to_string()));
        assert_eq!(probes(&f.host), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_unknown_package_manager() {
        let f = fixture();
        f.host.respond_with(|_, _| Ok("none\n".to_string()));
        let err = f.controller.install(SessionType::Screen).await.unwrap_err();
        assert!(matches!(err, MuxError::UnknownPackageManager));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_requires_confirmation() {
        let f = fixture();
        f.prompt.set_answer(false);
        assert!(!f.controller.uninstall(SessionType::Screen).await.unwrap());
        assert!(f.host.commands().is_empty());

        f.prompt.set_answer(true);
        assert!(f.controller.uninstall(SessionType::Screen).await.unwrap());
        assert!(f
            .host
            .commands()
            .contains(&"sudo apt-get remove -y screen".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_closes_everything() {
        let f = fixture();
        f.remote.set_screen(TWO_SCREENS);
        f.controller.mount().await.unwrap();
        f.controller
            .attach(&SessionKey::new(SessionType::Screen, "111"))
            .await
            .unwrap();

        f.controller.unmount().await;
        assert!(f.controller.attached().is_empty());
        assert!(f.host.open_connections().is_empty());
    }

    #[test]
    fn test_copy_name() {
        assert_eq!(copy_name("api", |_| false), "api-copy");
        assert_eq!(copy_name("api", |n| n == "api-copy"), "api-copy2");
        assert_eq!(
            copy_name("api", |n| n == "api-copy" || n == "api-copy2"),
            "api-copy3"
        );
    }

    #[test]
    fn test_kill_prompt() {
        let one = Session {
            id: "777".into(),
            name: "build".into(),
            session_type: SessionType::Screen,
            status: SessionStatus::Detached,
            created: None,
            tty: None,
        };
        assert_eq!(kill_prompt(std::slice::from_ref(&one)), "Kill screen session \"build\"?");
        assert_eq!(kill_prompt(&[one.clone(), one]), "Kill 2 sessions?");
    }
}
