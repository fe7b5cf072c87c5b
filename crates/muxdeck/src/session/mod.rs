//! Session engine.
//!
//! Everything between the remote multiplexers and the operator lives here:
//!
//! - [`parser`] and [`probe`] turn one batched remote command into session
//!   records and capability flags
//! - [`reconcile`] and [`registry`] merge those with the local manual order
//! - [`pool`], [`binding`] and [`attachment`] run one dedicated connection
//!   per attached session
//! - [`commands`] synthesizes the shell text for every operation
//! - [`manual`] is the offline screen/tmux command reference
//! - [`controller`] ties it together behind a single entry point

pub mod attachment;
pub mod binding;
pub mod commands;
pub mod controller;
pub mod manual;
pub mod parser;
pub mod pool;
pub mod probe;
pub mod reconcile;
pub mod registry;

pub use attachment::{AttachedSession, AttachmentManager};
pub use binding::{BindingTiming, TerminalBinding};
pub use commands::{validate_session_name, PackageManager};
pub use controller::{ControllerEvent, ControllerOptions, SessionController};
pub use manual::{manual, Manual, Topic};
pub use parser::parse_listing;
pub use pool::{connection_id, ConnectionPool};
pub use probe::{run_probe, CapabilityProber, ProbeReport, ProbeSections};
pub use reconcile::{Reconciled, Reconciler};
pub use registry::{RegistryState, SessionRegistry};
