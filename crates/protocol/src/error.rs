//! Error types shared by the session engine and host adapters.

use thiserror::Error;

/// Error type covering every failure the session engine can surface.
///
/// Listing text that does not match a known shape is never an error; it
/// simply yields no sessions. Conflicts such as attaching an already
/// attached session are reported as no-ops by the operations themselves.
#[derive(Debug, Error)]
pub enum MuxError {
    // Transport errors
    /// A remote command or connection operation failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection was closed or never opened.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    // Conflict errors
    /// No session with the given key is known.
    #[error("session not found: {session}")]
    SessionNotFound {
        /// Display form of the missing session key (`type:id`).
        session: String,
    },

    /// Another session already holds the requested identity.
    #[error("session already exists: {session}")]
    SessionExists {
        /// Display form of the conflicting session key (`type:id`).
        session: String,
    },

    /// The requested session name cannot be used with the multiplexer.
    #[error("invalid session name {name:?}: {reason}")]
    InvalidSessionName {
        /// The rejected name.
        name: String,
        /// Why the name was rejected.
        reason: &'static str,
    },

    // Capability errors
    /// None of the supported package managers exist on the host.
    #[error("unknown package manager: none of apt, yum, dnf, pacman, apk found")]
    UnknownPackageManager,

    /// The multiplexer binary is not installed on the host.
    #[error("{0} is not available on the remote host")]
    ToolUnavailable(String),

    // Local errors
    /// Persisting local state failed.
    #[error("local store error: {0}")]
    Store(String),

    /// The terminal surface could not be created or driven.
    #[error("terminal surface error: {0}")]
    Surface(String),

    /// The operation was abandoned because its owner was torn down.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl MuxError {
    /// Returns true for errors that originate from the remote leg.
    pub fn is_transport(&self) -> bool {
        matches!(self, MuxError::Transport(_) | MuxError::ConnectionClosed(_))
    }

    /// Builds a transport error from anything displayable.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        MuxError::Transport(err.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, MuxError>;

impl From<std::io::Error> for MuxError {
    fn from(err: std::io::Error) -> Self {
        MuxError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for MuxError {
    fn from(err: serde_json::Error) -> Self {
        MuxError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MuxError::Transport("exit status 255".to_string());
        assert_eq!(err.to_string(), "transport error: exit status 255");

        let err = MuxError::SessionNotFound {
            session: "screen:777".to_string(),
        };
        assert_eq!(err.to_string(), "session not found: screen:777");

        let err = MuxError::InvalidSessionName {
            name: "a b".to_string(),
            reason: "contains whitespace",
        };
        assert!(err.to_string().contains("\"a b\""));
        assert!(err.to_string().contains("contains whitespace"));

        let err = MuxError::SessionExists {
            session: "tmux:work".to_string(),
        };
        assert_eq!(err.to_string(), "session already exists: tmux:work");

        let err = MuxError::ToolUnavailable("tmux".to_string());
        assert_eq!(err.to_string(), "tmux is not available on the remote host");
    }

    #[test]
    fn test_transport_classification() {
        assert!(MuxError::Transport("x".into()).is_transport());
        assert!(MuxError::ConnectionClosed("x".into()).is_transport());
        assert!(!MuxError::Store("x".into()).is_transport());
        assert!(!MuxError::UnknownPackageManager.is_transport());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: MuxError = io.into();
        assert!(err.is_transport());
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: MuxError = json_err.into();
        assert!(matches!(err, MuxError::Store(_)));
    }
}
