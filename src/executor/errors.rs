//! Executor error types
//!
//! Error codes:
//! - AERO_EXECUTOR_INVALID (ERROR severity)
//! - AERO_EXECUTOR_CLOSED (ERROR severity)
//! - AERO_EXECUTOR_NOT_MUTABLE (ERROR severity)
//! - AERO_EXECUTOR_SEALED (ERROR severity)
//! - AERO_EXECUTOR_SEQUENCE_MISMATCH (FATAL severity)
//! - AERO_EXECUTOR_PROTOCOL_VIOLATION (FATAL severity)
//! - AERO_EXECUTOR_REPLICATION (ERROR severity)
//! - AERO_EXECUTOR_INTERNAL (FATAL severity)
//! - storage errors keep their own code
//!
//! Errors are `Clone` so one failure can be delivered to every task of a batch.

use std::sync::Arc;

use thiserror::Error;

use super::state::ExecutorState;
use crate::storage::{Severity, StorageError};
use crate::types::Llsn;

#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// Malformed request or a request the stream's role does not accept
    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("log stream executor is closed")]
    Closed,

    /// Admission refused because the stream is not Mutable
    #[error("log stream is {0}, not mutable")]
    NotMutable(ExecutorState),

    /// Work abandoned because the stream sealed
    #[error("log stream is sealed")]
    Sealed,

    /// A backup task's pre-assigned LLSN disagrees with the local order
    #[error("llsn mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: Llsn, actual: Llsn },

    /// This replica and the cluster disagree about committed history
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("storage error: {0}")]
    Storage(#[source] Arc<StorageError>),

    #[error("replication failed: {0}")]
    Replication(String),

    /// A blocking storage task panicked or was aborted
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutorError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::Invalid(_) => "AERO_EXECUTOR_INVALID",
            ExecutorError::Closed => "AERO_EXECUTOR_CLOSED",
            ExecutorError::NotMutable(_) => "AERO_EXECUTOR_NOT_MUTABLE",
            ExecutorError::Sealed => "AERO_EXECUTOR_SEALED",
            ExecutorError::SequenceMismatch { .. } => "AERO_EXECUTOR_SEQUENCE_MISMATCH",
            ExecutorError::ProtocolViolation(_) => "AERO_EXECUTOR_PROTOCOL_VIOLATION",
            ExecutorError::Storage(e) => e.code(),
            ExecutorError::Replication(_) => "AERO_EXECUTOR_REPLICATION",
            ExecutorError::Internal(_) => "AERO_EXECUTOR_INTERNAL",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ExecutorError::SequenceMismatch { .. }
            | ExecutorError::ProtocolViolation(_)
            | ExecutorError::Internal(_) => Severity::Fatal,
            ExecutorError::Storage(e) => e.severity(),
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_no_entry(&self) -> bool {
        matches!(self, ExecutorError::Storage(e) if e.is_no_entry())
    }
}

impl From<StorageError> for ExecutorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Invalid(message) => ExecutorError::Invalid(message),
            StorageError::Closed => ExecutorError::Closed,
            other => ExecutorError::Storage(Arc::new(other)),
        }
    }
}

impl From<tokio::task::JoinError> for ExecutorError {
    fn from(err: tokio::task::JoinError) -> Self {
        ExecutorError::Internal(format!("storage task failed: {}", err))
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_executor_errors() {
        assert!(matches!(
            ExecutorError::from(StorageError::invalid("x")),
            ExecutorError::Invalid(_)
        ));
        assert!(matches!(
            ExecutorError::from(StorageError::Closed),
            ExecutorError::Closed
        ));

        let corrupt = ExecutorError::from(StorageError::corrupt("bad crc"));
        assert_eq!(corrupt.code(), "AERO_DATA_CORRUPTION");
        assert!(corrupt.is_fatal());

        let missing = ExecutorError::from(StorageError::NoEntry("glsn 4".into()));
        assert!(missing.is_no_entry());
        assert!(!missing.is_fatal());
    }

    #[test]
    fn test_clone_shares_storage_error() {
        let err = ExecutorError::from(StorageError::inconsistent("cursor moved"));
        let copy = err.clone();
        match (&err, &copy) {
            (ExecutorError::Storage(a), ExecutorError::Storage(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected storage errors"),
        }
    }

    #[test]
    fn test_ordering_errors_are_fatal() {
        let mismatch = ExecutorError::SequenceMismatch {
            expected: Llsn(3),
            actual: Llsn(5),
        };
        assert!(mismatch.is_fatal());
        assert!(mismatch.to_string().contains("expected 3, got 5"));
        assert!(!ExecutorError::NotMutable(ExecutorState::Sealing).is_fatal());
        assert_eq!(
            ExecutorError::NotMutable(ExecutorState::Sealed).to_string(),
            "log stream is sealed, not mutable"
        );
    }
}
