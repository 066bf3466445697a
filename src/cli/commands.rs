//! CLI command implementations
//!
//! Commands open storage directly and never start an executor, so they are
//! meant for stopped replicas.

use std::path::Path;

use serde_json::{json, Value};

use crate::executor::ExecutorConfig;
use crate::storage::{Storage, StorageConfig};
use crate::types::{Glsn, LogEntry};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments, run the command and print its JSON result
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    match run_command(cli.command) {
        Ok(data) => write_response(data),
        Err(err) => {
            write_error(err.code(), &err.to_string())?;
            Err(err)
        }
    }
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<Value> {
    match cmd {
        Command::Inspect { data_dir } => inspect(&data_dir),
        Command::Scan {
            data_dir,
            begin,
            end,
        } => scan(&data_dir, Glsn(begin), Glsn(end)),
        Command::ConfigCheck { config } => config_check(&config),
    }
}

fn open_existing(data_dir: &Path) -> CliResult<Storage> {
    if !data_dir.is_dir() {
        return Err(CliError::config_error(format!(
            "data directory {} does not exist",
            data_dir.display()
        )));
    }
    Ok(Storage::open(
        StorageConfig::new(data_dir).with_sync_writes(false),
    )?)
}

/// Recovery view plus the live cursors derived from it
pub fn inspect(data_dir: &Path) -> CliResult<Value> {
    let storage = open_existing(data_dir)?;
    let info = storage.read_recovery_info()?;
    let value = json!({
        "recovery": info,
        "write_progress": storage.write_progress(),
        "commit_progress": storage.commit_progress(),
    });
    storage.close()?;
    Ok(value)
}

/// Committed entries in `[begin, end)`
pub fn scan(data_dir: &Path, begin: Glsn, end: Glsn) -> CliResult<Value> {
    let storage = open_existing(data_dir)?;
    let entries = storage
        .scan(begin, end)?
        .map(|entry| entry.map(|entry| entry_json(&entry)))
        .collect::<Result<Vec<_>, _>>()?;
    storage.close()?;
    Ok(json!({ "count": entries.len(), "entries": entries }))
}

/// Loads and validates an executor config
pub fn config_check(config_path: &Path) -> CliResult<Value> {
    let config = ExecutorConfig::load(config_path)?;
    Ok(serde_json::to_value(&config)?)
}

fn entry_json(entry: &LogEntry) -> Value {
    json!({
        "glsn": entry.glsn,
        "llsn": entry.llsn,
        "len": entry.data.len(),
        "data": String::from_utf8_lossy(&entry.data),
    })
}
