//! Local terminal front end.
//!
//! `attach` bridges one session to stdout. The deck renders several
//! attached sessions into emulated panes and lays them out on one screen.
//!
//! The engine talks to these through the [`protocol::TerminalSurface`],
//! [`protocol::SurfaceFactory`] and [`protocol::ConfirmPrompt`] traits.

pub mod attach;
pub mod console;
pub mod deck;
pub mod keys;
pub mod layout;
pub mod pane;
pub mod prompt;
pub mod table;

pub use attach::run_attach;
pub use console::{ConsoleSurface, ConsoleSurfaceFactory};
pub use deck::{deck_pane_size, run_deck, terminal_area, DeckSurfaceFactory};
pub use keys::{translate, KeyAction};
pub use pane::PaneSurface;
pub use prompt::StdinPrompt;
pub use table::{listings, render, SessionListing};
