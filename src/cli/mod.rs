//! Command-line interface for av-organizer.
//!
//! This module provides the CLI commands for processing a source directory,
//! previewing what would happen, and inspecting sources, the ledger and the
//! configuration.

mod commands;

pub use commands::{Cli, Commands, run_command};
