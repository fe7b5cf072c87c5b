//! In-process host for tests and dry runs.
//!
//! [`ScriptedHost`] records every call it receives and answers `execute`
//! from a programmable responder. [`RecordingSurface`] and
//! [`ScriptedPrompt`] are the matching surface and confirmation doubles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use protocol::{
    ConfirmPrompt, ConnectionSpec, HostFuture, MuxError, RemoteHost, Result, Session,
    SurfaceFactory, TerminalOutput, TerminalSize, TerminalSurface, Theme,
};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// One call received by a [`ScriptedHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    /// `execute(connection_id, command)`
    Execute(String, String),
    /// `open_connection` with the requested id.
    Open(String),
    /// `close_connection(connection_id)`
    Close(String),
    /// `write(connection_id, data)`
    Write(String, Vec<u8>),
    /// `resize(connection_id, size)`
    Resize(String, TerminalSize),
}

type Responder = dyn Fn(&str, &str) -> Result<String> + Send + Sync;

#[derive(Default)]
struct Recorded {
    timeline: Vec<(Instant, HostCall)>,
    opened: Vec<ConnectionSpec>,
    open: Vec<String>,
}

/// A [`RemoteHost`] that records calls and replies from a closure.
pub struct ScriptedHost {
    responder: Mutex<Arc<Responder>>,
    recorded: Mutex<Recorded>,
    output_tx: broadcast::Sender<TerminalOutput>,
    fail_opens: AtomicBool,
    fail_writes: AtomicBool,
    theme: Mutex<Theme>,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHost {
    /// Creates a host whose commands all succeed with empty output.
    pub fn new() -> Self {
        let (output_tx, _) = broadcast::channel(256);
        let responder: Arc<Responder> = Arc::new(empty_response);
        Self {
            responder: Mutex::new(responder),
            recorded: Mutex::new(Recorded::default()),
            output_tx,
            fail_opens: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            theme: Mutex::new(Theme::Dark),
        }
    }

    /// Replaces the `execute` responder. Receives `(connection_id, command)`.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        let responder: Arc<Responder> = Arc::new(responder);
        *lock(&self.responder) = responder;
    }

    /// Makes subsequent `open_connection` calls fail.
    pub fn fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `write` calls fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sets the theme reported to the engine.
    pub fn set_theme(&self, theme: Theme) {
        *lock(&self.theme) = theme;
    }

    /// Publishes output as if it came from `connection_id`.
    pub fn emit_output(&self, connection_id: &str, data: &[u8]) {
        let _ = self.output_tx.send(TerminalOutput {
            connection_id: connection_id.to_string(),
            data: data.to_vec(),
        });
    }

    /// Every call with the time it arrived.
    pub fn timeline(&self) -> Vec<(Instant, HostCall)> {
        lock(&self.recorded).timeline.clone()
    }

    /// Every call in arrival order.
    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.recorded)
            .timeline
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// `(connection_id, command)` pairs passed to `execute`.
    pub fn executed(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Execute(id, cmd) => Some((id, cmd)),
                _ => None,
            })
            .collect()
    }

    /// Commands passed to `execute`, without the connection id.
    pub fn commands(&self) -> Vec<String> {
        self.executed().into_iter().map(|(_, cmd)| cmd).collect()
    }

    /// `(connection_id, data)` pairs passed to `write`.
    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Write(id, data) => Some((id, data)),
                _ => None,
            })
            .collect()
    }

    /// `(connection_id, size)` pairs passed to `resize`.
    pub fn resizes(&self) -> Vec<(String, TerminalSize)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Resize(id, size) => Some((id, size)),
                _ => None,
            })
            .collect()
    }

    /// Connection ids passed to `close_connection`.
    pub fn closed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Close(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Specs of every successfully opened connection.
    pub fn opened_specs(&self) -> Vec<ConnectionSpec> {
        lock(&self.recorded).opened.clone()
    }

    /// Connections currently open, in open order.
    pub fn open_connections(&self) -> Vec<String> {
        lock(&self.recorded).open.clone()
    }

    fn record(&self, call: HostCall) {
        lock(&self.recorded).timeline.push((Instant::now(), call));
    }
}

fn empty_response(_connection_id: &str, _command: &str) -> Result<String> {
    Ok(String::new())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RemoteHost for ScriptedHost {
    fn execute<'a>(&'a self, connection_id: &'a str, command: &'a str) -> HostFuture<'a, String> {
        Box::pin(async move {
            self.record(HostCall::Execute(connection_id.to_string(), command.to_string()));
            let responder = Arc::clone(&*lock(&self.responder));
            responder(connection_id, command)
        })
    }

    fn open_connection<'a>(&'a self, spec: &'a ConnectionSpec) -> HostFuture<'a, String> {
        Box::pin(async move {
            self.record(HostCall::Open(spec.id.clone()));
            if self.fail_opens.load(Ordering::SeqCst) {
                return Err(MuxError::transport(format!("{}: connection refused", spec.host)));
            }
            let mut recorded = lock(&self.recorded);
            recorded.opened.push(spec.clone());
            recorded.open.push(spec.id.clone());
            Ok(spec.id.clone())
        })
    }

    fn close_connection<'a>(&'a self, connection_id: &'a str) -> HostFuture<'a, ()> {
        Box::pin(async move {
            self.record(HostCall::Close(connection_id.to_string()));
            lock(&self.recorded).open.retain(|id| id != connection_id);
            Ok(())
        })
    }

    fn write<'a>(&'a self, connection_id: &'a str, data: &'a [u8]) -> HostFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(MuxError::ConnectionClosed(connection_id.to_string()));
            }
            self.record(HostCall::Write(connection_id.to_string(), data.to_vec()));
            Ok(())
        })
    }

    fn resize<'a>(&'a self, connection_id: &'a str, size: TerminalSize) -> HostFuture<'a, ()> {
        Box::pin(async move {
            self.record(HostCall::Resize(connection_id.to_string(), size));
            Ok(())
        })
    }

    fn subscribe_output(&self) -> broadcast::Receiver<TerminalOutput> {
        self.output_tx.subscribe()
    }

    fn theme(&self) -> Theme {
        *lock(&self.theme)
    }
}

/// A [`TerminalSurface`] that keeps everything written to it.
pub struct RecordingSurface {
    size: Mutex<TerminalSize>,
    output: Mutex<Vec<u8>>,
    disposed: AtomicUsize,
}

impl RecordingSurface {
    /// Creates a surface reporting `size`.
    pub fn new(size: TerminalSize) -> Self {
        Self {
            size: Mutex::new(size),
            output: Mutex::new(Vec::new()),
            disposed: AtomicUsize::new(0),
        }
    }

    /// Changes the size reported by `size` and `fit`.
    pub fn set_size(&self, size: TerminalSize) {
        *lock(&self.size) = size;
    }

    /// Bytes written so far.
    pub fn output(&self) -> Vec<u8> {
        lock(&self.output).clone()
    }

    /// How many times `dispose` was called.
    pub fn dispose_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl TerminalSurface for RecordingSurface {
    fn write(&self, data: &[u8]) {
        lock(&self.output).extend_from_slice(data);
    }

    fn size(&self) -> TerminalSize {
        *lock(&self.size)
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Creates [`RecordingSurface`]s and keeps a handle to each.
pub struct RecordingSurfaceFactory {
    size: TerminalSize,
    created: Mutex<Vec<(Session, Theme, Arc<RecordingSurface>)>>,
}

impl RecordingSurfaceFactory {
    /// Creates a factory whose surfaces report `size`.
    pub fn new(size: TerminalSize) -> Self {
        Self {
            size,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Surfaces created so far, with the session and theme they were made for.
    pub fn created(&self) -> Vec<(Session, Theme, Arc<RecordingSurface>)> {
        lock(&self.created).clone()
    }
}

impl SurfaceFactory for RecordingSurfaceFactory {
    fn create(&self, session: &Session, theme: Theme) -> Result<Arc<dyn TerminalSurface>> {
        let surface = Arc::new(RecordingSurface::new(self.size));
        lock(&self.created).push((session.clone(), theme, Arc::clone(&surface)));
        Ok(surface)
    }
}

/// A [`ConfirmPrompt`] with a fixed answer that records each question.
pub struct ScriptedPrompt {
    answer: AtomicBool,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    /// Creates a prompt that always answers `answer`.
    pub fn new(answer: bool) -> Self {
        Self {
            answer: AtomicBool::new(answer),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Changes the answer.
    pub fn set_answer(&self, answer: bool) {
        self.answer.store(answer, Ordering::SeqCst);
    }

    /// Questions asked so far.
    pub fn asked(&self) -> Vec<String> {
        lock(&self.asked).clone()
    }
}

impl ConfirmPrompt for ScriptedPrompt {
    fn confirm(&self, message: &str) -> bool {
        lock(&self.asked).push(message.to_string());
        self.answer.load(Ordering::SeqCst)
    }
}
