//! CLI module for Kestrel.
//!
//! This module provides the command-line interface for validating, planning,
//! applying and destroying clusters.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
