//! Command-line interface for tunesync.
//!
//! This module provides CLI commands for scanning and watching a library
//! and listing what the database holds.

mod commands;

pub use commands::{Cli, Commands, run_command};
