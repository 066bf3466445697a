//! CLI module for aerolog
//!
//! Offline tools over a log stream data directory:
//! - inspect: recovery view of both keyspaces
//! - scan: committed entries in a GLSN range
//! - config-check: validate an executor config file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{config_check, inspect, run, run_command, scan};
pub use errors::{CliError, CliResult};
