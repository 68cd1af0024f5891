// src/display/mod.rs
//! Display modules for different interfaces

pub mod terminal;

pub use terminal::TerminalDisplay;

use std::io::IsTerminal;

/// Whether stdout can host the live terminal display
pub fn should_use_terminal() -> bool {
    std::io::stdout().is_terminal()
}
