//! Terminal binding: one surface, one dedicated connection, one session.
//!
//! Mounting runs the attach handshake:
//!
//! 1. open the dedicated connection and start forwarding its output
//! 2. wait for the remote shell to settle
//! 3. send the steal-attach command
//! 4. wait for the multiplexer to redraw
//! 5. resize to `rows - 1`, then to the real size, forcing a full repaint
//!
//! Unmounting is idempotent and tears down everything unconditionally.
//! A handshake still in flight when the binding is unmounted notices the
//! epoch change at its next step and abandons the rest.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use protocol::{
    MuxError, Result, Session, SessionKey, TerminalOutput, TerminalSize, TerminalSurface,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::commands;
use super::pool::ConnectionPool;

/// Delays used by the attach handshake and viewport resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTiming {
    /// Wait after opening the connection before sending input.
    pub connect_settle: Duration,
    /// Wait after the attach command before the resize kick.
    pub attach_settle: Duration,
    /// Gap between the off-by-one resize and the real one.
    pub resize_kick: Duration,
    /// Quiet period before a viewport resize is applied.
    pub resize_debounce: Duration,
    /// Viewport resizes are ignored for this long after mount.
    pub resize_warmup: Duration,
}

impl Default for BindingTiming {
    fn default() -> Self {
        Self {
            connect_settle: Duration::from_millis(100),
            attach_settle: Duration::from_millis(500),
            resize_kick: Duration::from_millis(50),
            resize_debounce: Duration::from_millis(100),
            resize_warmup: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct BindingState {
    connection_id: Option<String>,
    pump: Option<JoinHandle<()>>,
    mounted_at: Option<Instant>,
    attached: bool,
}

/// Binds a terminal surface to a session over a dedicated connection.
pub struct TerminalBinding {
    key: SessionKey,
    pool: Arc<ConnectionPool>,
    surface: Arc<dyn TerminalSurface>,
    timing: BindingTiming,
    initialized: AtomicBool,
    epoch: AtomicU64,
    resize_generation: AtomicU64,
    state: Mutex<BindingState>,
}

impl TerminalBinding {
    /// Creates an unmounted binding for `session`.
    pub fn new(
        session: &Session,
        pool: Arc<ConnectionPool>,
        surface: Arc<dyn TerminalSurface>,
        timing: BindingTiming,
    ) -> Self {
        Self {
            key: session.key(),
            pool,
            surface,
            timing,
            initialized: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            resize_generation: AtomicU64::new(0),
            state: Mutex::new(BindingState::default()),
        }
    }

    /// Session this binding attaches to.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The surface output is rendered to.
    pub fn surface(&self) -> &Arc<dyn TerminalSurface> {
        &self.surface
    }

    /// Dedicated connection id, while one is open.
    pub fn connection_id(&self) -> Option<String> {
        self.state().connection_id.clone()
    }

    /// Returns true once the handshake has completed.
    pub fn is_attached(&self) -> bool {
        self.state().attached
    }

    /// Returns true between a mount attempt and the next unmount.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, BindingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the attach handshake.
    ///
    /// Returns `Ok(false)` if this binding is already mounted. On error the
    /// caller is expected to [`unmount`](Self::unmount), which releases
    /// whatever the handshake got as far as acquiring.
    pub async fn mount(&self) -> Result<bool> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!(session = %self.key, "Binding already mounted");
            return Ok(false);
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.state().mounted_at = Some(Instant::now());

        // Subscribe before opening so the first bytes are not missed.
        let output = self.pool.host().subscribe_output();
        let connection_id = self.pool.open(&self.key).await?;
        if let Err(e) = self.ensure_current(epoch) {
            // Unmounted while opening; nobody else knows about this connection.
            let _ = self.pool.close(&connection_id).await;
            return Err(e);
        }
        {
            let mut state = self.state();
            state.pump = Some(spawn_output_pump(
                output,
                connection_id.clone(),
                Arc::clone(&self.surface),
            ));
            state.connection_id = Some(connection_id.clone());
        }

        tokio::time::sleep(self.timing.connect_settle).await;
        self.ensure_current(epoch)?;

        let attach = format!("{}\n", commands::attach(&self.key));
        tracing::debug!(connection_id = %connection_id, command = %attach.trim_end(), "Sending attach command");
        self.pool
            .host()
            .write(&connection_id, attach.as_bytes())
            .await?;

        tokio::time::sleep(self.timing.attach_settle).await;
        self.ensure_current(epoch)?;

        let size = self.surface.fit();
        if !size.is_empty() {
            let host = self.pool.host();
            let kick = TerminalSize::new(size.rows.saturating_sub(1).max(1), size.cols);
            host.resize(&connection_id, kick).await?;
            tokio::time::sleep(self.timing.resize_kick).await;
            self.ensure_current(epoch)?;
            host.resize(&connection_id, size).await?;
        }

        self.ensure_current(epoch)?;
        self.state().attached = true;
        tracing::info!(connection_id = %connection_id, session = %self.key, size = %size, "Attached");
        Ok(true)
    }

    fn ensure_current(&self, epoch: u64) -> Result<()> {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            Ok(())
        } else {
            Err(MuxError::Cancelled(format!("binding for {} was unmounted", self.key)))
        }
    }

    /// Forwards operator input to the remote terminal.
    pub async fn send_input(&self, data: &[u8]) -> Result<()> {
        let connection_id = self
            .connection_id()
            .ok_or_else(|| MuxError::ConnectionClosed(self.key.to_string()))?;
        self.pool.host().write(&connection_id, data).await
    }

    /// Sends the multiplexer's detach keystrokes.
    pub async fn send_detach_keys(&self) -> Result<()> {
        self.send_input(&commands::detach_keys(self.key.session_type))
            .await
    }

    /// Handles a viewport size change.
    ///
    /// Ignored during the warm-up window after mount. Otherwise the fit and
    /// remote resize run once the debounce period passes without another
    /// change.
    pub fn on_viewport_resize(self: &Arc<Self>) {
        let mounted_at = match self.state().mounted_at {
            Some(at) => at,
            None => return,
        };
        if mounted_at.elapsed() < self.timing.resize_warmup {
            tracing::trace!(session = %self.key, "Ignoring resize during warm-up");
            return;
        }

        let generation = self.resize_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let binding = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(binding.timing.resize_debounce).await;
            if binding.resize_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            binding.apply_fit().await;
        });
    }

    async fn apply_fit(&self) {
        let Some(connection_id) = self.connection_id() else {
            return;
        };
        let size = self.surface.fit();
        if size.is_empty() {
            return;
        }
        if let Err(e) = self.pool.host().resize(&connection_id, size).await {
            tracing::warn!(connection_id = %connection_id, error = %e, "Resize failed");
        }
    }

    /// Tears the binding down. Safe to call any number of times.
    ///
    /// Stops output delivery, closes the dedicated connection, and disposes
    /// the surface, then resets the mount guard so the binding can be
    /// mounted again.
    pub async fn unmount(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.resize_generation.fetch_add(1, Ordering::SeqCst);

        let (connection_id, pump) = {
            let mut state = self.state();
            state.mounted_at = None;
            state.attached = false;
            (state.connection_id.take(), state.pump.take())
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(id) = connection_id {
            if let Err(e) = self.pool.close(&id).await {
                tracing::warn!(connection_id = %id, error = %e, "Failed to close connection");
            }
        }
        self.surface.dispose();
        self.initialized.store(false, Ordering::SeqCst);
        tracing::debug!(session = %self.key, "Binding unmounted");
    }
}

fn spawn_output_pump(
    mut output: broadcast::Receiver<TerminalOutput>,
    connection_id: String,
    surface: Arc<dyn TerminalSurface>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match output.recv().await {
                Ok(chunk) if chunk.connection_id == connection_id => surface.write(&chunk.data),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(connection_id = %connection_id, skipped, "Terminal output lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostCall, RecordingSurface, ScriptedHost};
    use protocol::{AuthMethod, ConnectionSpec, SessionStatus, SessionType};

    fn spec() -> ConnectionSpec {
        ConnectionSpec {
            id: "prod".into(),
            host: "example.org".into(),
            port: 22,
            user: "ops".into(),
            auth: AuthMethod::Agent,
        }
    }

    fn tmux_session(name: &str) -> Session {
        Session {
            id: name.into(),
            name: name.into(),
            session_type: SessionType::Tmux,
            status: SessionStatus::Detached,
            created: None,
            tty: None,
        }
    }

    fn binding(
        host: &Arc<ScriptedHost>,
        surface: &Arc<RecordingSurface>,
    ) -> Arc<TerminalBinding> {
        let pool = Arc::new(ConnectionPool::new(host.clone(), spec()));
        Arc::new(TerminalBinding::new(
            &tmux_session("work"),
            pool,
            surface.clone(),
            BindingTiming::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_sequence_and_delays() {
        let host = Arc::new(ScriptedHost::new());
        let surface = Arc::new(RecordingSurface::new(TerminalSize::new(40, 120)));
        let binding = binding(&host, &surface);

        assert!(binding.mount().await.unwrap());
        assert!(binding.is_attached());

        let timeline = host.timeline();
        let calls: Vec<&HostCall> = timeline.iter().map(|(_, c)| c).collect();
        assert_eq!(
            calls,
            vec![
                &HostCall::Open("prod-tmux-work".into()),
                &HostCall::Write("prod-tmux-work".into(), b"tmux attach -d -t work\n".to_vec()),
                &HostCall::Resize("prod-tmux-work".into(), TerminalSize::new(39, 120)),
                &HostCall::Resize("prod-tmux-work".into(), TerminalSize::new(40, 120)),
            ]
        );

        let at = |i: usize| timeline[i].0;
        assert!(at(1) - at(0) >= Duration::from_millis(100));
        assert!(at(2) - at(1) >= Duration::from_millis(500));
        assert!(at(3) - at(2) >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_surface_skips_resize() {
        let host = Arc::new(ScriptedHost::new());
        let surface = Arc::new(RecordingSurface::new(TerminalSize::new(0, 0)));
        let binding = binding(&host, &surface);

        binding.mount().await.unwrap();
        assert!(host.resizes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_mount_rejected() {
        let host = Arc::new(ScriptedHost::new());
        let surface = Arc::new(RecordingSurface::new(TerminalSize::new(24, 80)));
        let binding = binding(&host, &surface);

        assert!(binding.mount().await.unwrap());
        assert!(!binding.mount().await.unwrap());
        assert_eq!(host.opened_specs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_is_idempotent_and_allows_remount() {
        let host = Arc::new(ScriptedHost::new());
        let surface = Arc::new(RecordingSurface::new(TerminalSize::new(24, 80)));
        let binding = binding(&host, &surface);

        binding.mount().await.unwrap();
        binding.unmount().await;
        binding.unmount().await;

        assert!(!binding.is_initialized());
        assert!(binding.connection_id().is_none());
        assert!(host.open_connections().is_empty());
        assert_eq!(host.closed(), vec!["prod-tmux-work".to_string()]);
        assert!(surface.dispose_count() >= 1);
        assert!(binding.send_input(b"ls\n").await.is_err());

        assert!(binding.mount().await.unwrap());
        assert_eq!(host.opened_specs().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_during_handshake_abandons_it() {
        let host = Arc::new(ScriptedHost::new());
        let surface = Arc::new(RecordingSurface::new(TerminalSize::new(24, 80)));
        let binding = binding(&host, &surface);

        let mounting = {
            let binding = binding.clone();
            tokio::spawn(async move { binding.mount().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        binding.unmount().await;

        let result = mounting.await.unwrap();
        assert!(matches!(result, Err(MuxError::Cancelled(_))));
        assert!(host.writes().is_empty());
        assert!(host.open_connections().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_filtered_by_connection() {
        let host = Arc::new(ScriptedHost::new());
        let surface = Arc::new(RecordingSurface::new(TerminalSize::new(24, 80)));
        let binding = binding(&host, &surface);
        binding.mount().await.unwrap();

        host.emit_output("prod-tmux-other", b"not mine");
        host.emit_output("prod-tmux-work", b"hello");
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(surface.output(), b"hello".to_vec());

        binding.unmount().await;
        host.emit_output("prod-tmux-work", b"late");
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(surface.output(), b"hello".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_keys_sent_on_dedicated_connection() {
        let host = Arc::new(ScriptedHost::new());
        let surface = Arc::new(RecordingSurface::new(TerminalSize::new(24, 80)));
        let binding = binding(&host, &surface);
        binding.mount().await.unwrap();

        binding.send_detach_keys().await.unwrap();
        let writes = host.writes();
        assert_eq!(
            writes.last().unwrap(),
            &("prod-tmux-work".to_string(), vec![0x02, b'd'])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_resize_warmup_and_debounce() {
        let host = Arc::new(ScriptedHost::new());
        let surface = Arc::new(RecordingSurface::new(TerminalSize::new(24, 80)));
        let binding = binding(&host, &surface);

        let mounting = {
            let binding = binding.clone();
            tokio::spawn(async move { binding.mount().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        binding.on_viewport_resize();
        mounting.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Only the two handshake resizes.
        assert_eq!(host.resizes().len(), 2);

        surface.set_size(TerminalSize::new(50, 100));
        binding.on_viewport_resize();
        tokio::time::sleep(Duration::from_millis(60)).await;
        binding.on_viewport_resize();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(host.resizes().len(), 2);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let resizes = host.resizes();
        assert_eq!(resizes.len(), 3);
        assert_eq!(resizes[2].1, TerminalSize::new(50, 100));
    }
}
