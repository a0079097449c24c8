//! CLI module for the OData server
//!
//! Provides command-line interface for:
//! - serve: load a configuration and serve it over HTTP
//! - check: validate a configuration and print the catalog

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check, load_config, run, run_command, serve};
pub use errors::{CliError, CliErrorCode, CliResult};
