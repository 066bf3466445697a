//! CLI argument definitions using clap
//!
//! Commands:
//! - aerolog inspect --data-dir <path>
//! - aerolog scan --data-dir <path> --begin <glsn> --end <glsn>
//! - aerolog config-check --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aerolog - per-replica log stream storage tools
#[derive(Parser, Debug)]
#[command(name = "aerolog")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the recovery view of a log stream data directory
    Inspect {
        /// Log stream data directory
        #[arg(long)]
        data_dir: PathBuf,
    },

    /// Print committed entries in [begin, end)
    Scan {
        /// Log stream data directory
        #[arg(long)]
        data_dir: PathBuf,

        /// First GLSN
        #[arg(long, default_value_t = 1)]
        begin: u64,

        /// Exclusive end GLSN
        #[arg(long, default_value_t = u64::MAX)]
        end: u64,
    },

    /// Validate an executor configuration file
    ConfigCheck {
        /// Path to configuration file
        #[arg(long, default_value = "./aerolog.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
