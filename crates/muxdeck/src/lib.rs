//! # muxdeck
//!
//! Manage and attach to `screen` and `tmux` sessions on a remote host over
//! SSH.
//!
//! ## Overview
//!
//! - **Discovery**: one batched remote command per refresh reports the
//!   server timezone, which multiplexers are installed and both session
//!   listings
//! - **Local overlay**: manual ordering, notes and launch commands live in
//!   per-connection JSON files and are merged into every refresh
//! - **Attachments**: each attached session gets its own dedicated
//!   connection and terminal binding, with a steal-style attach handshake
//! - **Lifecycle**: create, rename, duplicate, kill, force-detach, and
//!   install or uninstall the multiplexers themselves
//! - **Deck**: several attached sessions on one screen, split or tabbed
//! - **Manual**: an offline screen and tmux command reference
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   SessionController                      │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ Reconciler │  │   Registry   │  │ SessionStore /   │  │
//! │  │  + Prober  │  │              │  │ PreferenceStore  │  │
//! │  └────────────┘  └──────────────┘  └──────────────────┘  │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │  AttachmentManager → TerminalBinding → Pool        │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │ RemoteHost
//!                  ┌─────────┴─────────┐
//!                  │ SshHost / Scripted│
//!                  └───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use muxdeck::host::{SshHost, SshOptions};
//! use muxdeck::protocol::{AssumeYes, AuthMethod, ConnectionSpec};
//! use muxdeck::session::{ControllerOptions, SessionController};
//! use muxdeck::store::{PreferenceStore, SessionStore};
//! use muxdeck::ui::ConsoleSurfaceFactory;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let spec = ConnectionSpec {
//!         id: "ops@db:22".into(),
//!         host: "db".into(),
//!         port: 22,
//!         user: "ops".into(),
//!         auth: AuthMethod::Agent,
//!     };
//!     let host = Arc::new(SshHost::new(SshOptions::default()));
//!     host.register(spec.clone());
//!
//!     let data_dir = std::path::Path::new("/tmp/muxdeck");
//!     let controller = SessionController::new(
//!         host,
//!         spec.clone(),
//!         SessionStore::open(data_dir, &spec.id)?,
//!         Arc::new(PreferenceStore::open(data_dir)?),
//!         Arc::new(ConsoleSurfaceFactory),
//!         Arc::new(AssumeYes),
//!         ControllerOptions::default(),
//!     );
//!     controller.refresh().await?;
//!     for session in controller.sessions() {
//!         println!("{} {}", session.key(), session.name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`host`]: OpenSSH and scripted [`protocol::RemoteHost`] implementations
//! - [`session`]: Parsing, reconciliation, attachments and the controller
//! - [`store`]: Persisted order, notes and preferences
//! - [`ui`]: Local terminal surface, deck view, prompts and tables

pub mod config;
pub mod host;
pub mod session;
pub mod store;
pub mod ui;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export engine types for convenience
pub use session::{ControllerEvent, ControllerOptions, RegistryState, SessionController};

// Re-export store types for convenience
pub use store::{DisplayMode, PreferenceStore, Preferences, SessionStore};
