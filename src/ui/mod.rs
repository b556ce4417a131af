//! Console front end.
//!
//! The Rust-native stand-in for the owning UI scope:
//!
//! - **console**: stdout-passthrough display surface + terminal-grid viewport
//! - **keymapper**: keyboard input to host-process byte sequence mapping

pub mod console;
pub mod keymapper;

pub use console::{ConsoleInput, ConsoleSurface, ConsoleViewport};
pub use keymapper::InputEncoder;
