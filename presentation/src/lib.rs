//! Presentation layer for eye
//!
//! This crate contains CLI definitions, console output and the interactive
//! REPL.

pub mod cli;
pub mod output;
pub mod repl;

// Re-export commonly used types
pub use cli::commands::{Cli, RelayCli};
pub use output::console::{API_HELP, ConsoleFormatter};
pub use repl::{DirectBackend, EvalRepl, ReplBackend};
