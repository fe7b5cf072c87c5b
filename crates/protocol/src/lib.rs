//! # muxdeck Protocol Library
//!
//! Shared vocabulary between the muxdeck engine and the application that
//! hosts it.
//!
//! ## Overview
//!
//! - **Session model**: [`Session`], [`SessionKey`], [`SessionMetadata`] and
//!   the [`CapabilitySnapshot`] produced by probing a remote host
//! - **Host contract**: [`RemoteHost`], [`TerminalSurface`],
//!   [`SurfaceFactory`] and [`ConfirmPrompt`], the narrow capability surface
//!   the engine consumes instead of owning SSH, rendering, or dialogs
//! - **Errors**: the [`MuxError`] taxonomy
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Session, SessionKey, SessionStatus, SessionType};
//!
//! let session = Session {
//!     id: "12345".to_string(),
//!     name: "build".to_string(),
//!     session_type: SessionType::Screen,
//!     status: SessionStatus::Detached,
//!     created: None,
//!     tty: None,
//! };
//! assert_eq!(session.key(), SessionKey::new(SessionType::Screen, "12345"));
//! ```
//!
//! ## Modules
//!
//! - [`session`]: Session data model
//! - [`host`]: Host capability traits
//! - [`error`]: Error types

pub mod error;
pub mod host;
pub mod session;

pub use error::{MuxError, Result};
pub use host::{
    AssumeYes, AuthMethod, ConfirmPrompt, ConnectionSpec, HostFuture, RemoteHost, SurfaceFactory,
    TerminalOutput, TerminalSize, TerminalSurface, Theme,
};
pub use session::{
    CapabilitySnapshot, Session, SessionKey, SessionMetadata, SessionStatus, SessionType,
};
