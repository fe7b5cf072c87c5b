//! Capability contract consumed from the host application.
//!
//! The engine never reaches for a global: every component receives an
//! `Arc<dyn RemoteHost>` (and, where needed, a surface factory and a
//! confirmation prompt) at construction time.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::session::Session;

/// Boxed future returned by host operations.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// How a connection authenticates against the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum AuthMethod {
    /// Use whatever the SSH agent offers.
    #[default]
    Agent,
    /// Use a private key file.
    Key {
        /// Path to the private key.
        path: PathBuf,
    },
    /// Use a password looked up through an opaque credential reference.
    Password {
        /// Reference understood by the host's credential storage.
        credential_ref: String,
    },
}

/// Everything needed to open an independent connection to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Connection identifier, unique among open connections.
    pub id: String,
    /// Host name or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Authentication method.
    #[serde(default)]
    pub auth: AuthMethod,
}

impl ConnectionSpec {
    /// Returns a copy of this spec that opens under a different id.
    ///
    /// Used to fan several independent connections out of one logical
    /// server entry: target and credentials are shared, transport state
    /// is not.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows.
    pub rows: u16,
    /// Number of columns.
    pub cols: u16,
}

impl TerminalSize {
    /// Creates a size.
    pub const fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Returns true if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// A chunk of output produced by one remote pseudo-terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOutput {
    /// Connection the bytes came from.
    pub connection_id: String,
    /// Raw terminal bytes.
    pub data: Vec<u8>,
}

/// Host color scheme. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Light background.
    Light,
    /// Dark background.
    #[default]
    Dark,
}

/// Transport capabilities the host exposes to the engine.
///
/// Timeouts are a property of the implementation; the engine never
/// enforces its own.
pub trait RemoteHost: Send + Sync {
    /// Runs a shell command over an established connection and returns its
    /// combined output.
    fn execute<'a>(&'a self, connection_id: &'a str, command: &'a str) -> HostFuture<'a, String>;

    /// Opens a new independent connection with an interactive PTY.
    ///
    /// Returns the id under which the connection was registered.
    fn open_connection<'a>(&'a self, spec: &'a ConnectionSpec) -> HostFuture<'a, String>;

    /// Closes a connection opened with [`RemoteHost::open_connection`].
    fn close_connection<'a>(&'a self, connection_id: &'a str) -> HostFuture<'a, ()>;

    /// Sends raw input to the remote pseudo-terminal.
    fn write<'a>(&'a self, connection_id: &'a str, data: &'a [u8]) -> HostFuture<'a, ()>;

    /// Resizes the remote pseudo-terminal.
    fn resize<'a>(&'a self, connection_id: &'a str, size: TerminalSize) -> HostFuture<'a, ()>;

    /// Subscribes to output from every connection.
    ///
    /// Dropping the receiver unsubscribes. Consumers filter by
    /// [`TerminalOutput::connection_id`].
    fn subscribe_output(&self) -> broadcast::Receiver<TerminalOutput>;

    /// Returns the host color scheme.
    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

/// A live terminal view the engine can write to.
pub trait TerminalSurface: Send + Sync {
    /// Renders remote output.
    fn write(&self, data: &[u8]);

    /// Returns the current size in cells.
    fn size(&self) -> TerminalSize;

    /// Fits the surface to its container and returns the resulting size.
    fn fit(&self) -> TerminalSize {
        self.size()
    }

    /// Releases the surface. Must tolerate repeated calls.
    fn dispose(&self);
}

/// Creates terminal surfaces for newly attached sessions.
pub trait SurfaceFactory: Send + Sync {
    /// Creates a surface for `session` using the host theme.
    fn create(&self, session: &Session, theme: Theme) -> Result<Arc<dyn TerminalSurface>>;
}

/// Asks the operator to confirm a destructive action.
pub trait ConfirmPrompt: Send + Sync {
    /// Returns true if the operator agreed.
    fn confirm(&self, message: &str) -> bool;
}

/// A prompt that always agrees, for non-interactive use (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl ConfirmPrompt for AssumeYes {
    fn confirm(&self, _message: &str) -> bool {
        true
    }
}
