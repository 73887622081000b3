//! CLI module for kongsync.
//!
//! This module provides the command-line interface for managing
//! Kong upstreams and targets.

mod commands;
mod output;

pub use commands::{Cli, Commands, ImportCommands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
