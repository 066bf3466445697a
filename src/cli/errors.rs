//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit code.

use std::io;

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl CliError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable error code string
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "AERO_CLI_CONFIG_ERROR",
            CliError::Io(_) | CliError::Json(_) => "AERO_CLI_IO_ERROR",
            CliError::Storage(err) => err.code(),
            CliError::Executor(err) => err.code(),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
