//! Storage error types
//!
//! Error codes:
//! - AERO_STORAGE_IO_ERROR (ERROR severity)
//! - AERO_STORAGE_INVALID (ERROR severity)
//! - AERO_STORAGE_NO_ENTRY (ERROR severity)
//! - AERO_STORAGE_CLOSED (ERROR severity)
//! - AERO_STORAGE_INCONSISTENT_BATCH (FATAL severity)
//! - AERO_STORAGE_INCOMPLETE_BATCH (FATAL severity)
//! - AERO_DATA_CORRUPTION (FATAL severity)
//! - AERO_STORAGE_POISONED (FATAL severity)

use std::fmt;
use std::io;

use thiserror::Error;

use crate::types::Glsn;

/// Severity levels for storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, the stream continues
    Error,
    /// The stream must stop; indicates a bug or on-disk damage
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Storage engine error
#[derive(Debug, Error)]
pub enum StorageError {
    /// Disk I/O failure
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Malformed argument or a request outside the allowed range
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Requested entry does not exist (trimmed or not yet committed)
    #[error("no entry: {0}")]
    NoEntry(String),

    /// Engine already closed
    #[error("storage is closed")]
    Closed,

    /// Cursor snapshot taken by a batch no longer matches the engine
    #[error("inconsistent batch: {0}")]
    InconsistentBatch(String),

    /// Commit batch does not cover its whole commit context
    #[error("incomplete commit batch: expected to reach glsn {expected}, reached {reached}")]
    IncompleteBatch { expected: Glsn, reached: Glsn },

    /// Checksum failure or disagreement between the data and commit keyspaces
    #[error("data corruption: {0}")]
    Corrupt(String),

    /// A failed append could not be rolled back; the journal refuses writes
    #[error("journal {0} is poisoned by an unrecoverable append failure")]
    Poisoned(&'static str),
}

impl StorageError {
    /// Create an I/O error with context
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentBatch(message.into())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Corruption with the byte offset where it was detected
    pub fn corrupt_at_offset(file: &str, offset: u64, reason: impl fmt::Display) -> Self {
        Self::Corrupt(format!("{} (file: {}, byte_offset: {})", reason, file, offset))
    }

    /// Returns the stable error code string
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Io { .. } => "AERO_STORAGE_IO_ERROR",
            StorageError::Invalid(_) => "AERO_STORAGE_INVALID",
            StorageError::NoEntry(_) => "AERO_STORAGE_NO_ENTRY",
            StorageError::Closed => "AERO_STORAGE_CLOSED",
            StorageError::InconsistentBatch(_) => "AERO_STORAGE_INCONSISTENT_BATCH",
            StorageError::IncompleteBatch { .. } => "AERO_STORAGE_INCOMPLETE_BATCH",
            StorageError::Corrupt(_) => "AERO_DATA_CORRUPTION",
            StorageError::Poisoned(_) => "AERO_STORAGE_POISONED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StorageError::InconsistentBatch(_)
            | StorageError::IncompleteBatch { .. }
            | StorageError::Corrupt(_)
            | StorageError::Poisoned(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether this error indicates a bug or damaged data
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_no_entry(&self) -> bool {
        matches!(self, StorageError::NoEntry(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
