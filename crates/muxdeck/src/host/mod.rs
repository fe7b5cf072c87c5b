//! Host adapters implementing [`protocol::RemoteHost`].
//!
//! - [`ssh`]: the system OpenSSH client, with interactive connections
//!   running inside local PTYs
//! - [`scripted`]: an in-process recording host used by tests

pub mod scripted;
pub mod ssh;

pub use scripted::{HostCall, RecordingSurface, RecordingSurfaceFactory, ScriptedHost, ScriptedPrompt};
pub use ssh::{Invocation, SshHost, SshOptions};
