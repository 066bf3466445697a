//! Observable events
//!
//! Every structured log line names one of these.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Storage lifecycle
    StorageOpen,
    StorageClose,
    /// A torn final journal record was cut off during replay
    JournalTornTail,
    /// A journal failed its checksum before the end of the file
    JournalCorruption,
    /// A failed append was cut back off the journal
    JournalRollback,
    /// A failed append could not be cut back; the journal refuses writes
    JournalPoisoned,
    TrimCommitted,
    TruncateUncommitted,
    StorageRestored,

    // Write pipeline
    DispatcherStart,
    DispatcherStop,
    /// The dispatcher task panicked or was aborted
    DispatcherFailed,
    BatchWritten,
    BatchFailed,

    // Commit
    CommitApplied,
    CommitStale,

    // Seal / unseal
    SealBegin,
    SealComplete,
    Unseal,
    /// The stream hit an ordering invariant violation
    ProtocolViolation,

    // Executor lifecycle
    ExecutorOpen,
    ExecutorClose,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StorageOpen => "STORAGE_OPEN",
            Event::StorageClose => "STORAGE_CLOSE",
            Event::JournalTornTail => "JOURNAL_TORN_TAIL",
            Event::JournalCorruption => "JOURNAL_CORRUPTION",
            Event::JournalRollback => "JOURNAL_ROLLBACK",
            Event::JournalPoisoned => "JOURNAL_POISONED",
            Event::TrimCommitted => "TRIM_COMMITTED",
            Event::TruncateUncommitted => "TRUNCATE_UNCOMMITTED",
            Event::StorageRestored => "STORAGE_RESTORED",

            Event::DispatcherStart => "DISPATCHER_START",
            Event::DispatcherStop => "DISPATCHER_STOP",
            Event::DispatcherFailed => "DISPATCHER_FAILED",
            Event::BatchWritten => "BATCH_WRITTEN",
            Event::BatchFailed => "BATCH_FAILED",

            Event::CommitApplied => "COMMIT_APPLIED",
            Event::CommitStale => "COMMIT_STALE",

            Event::SealBegin => "SEAL_BEGIN",
            Event::SealComplete => "SEAL_COMPLETE",
            Event::Unseal => "UNSEAL",
            Event::ProtocolViolation => "PROTOCOL_VIOLATION",

            Event::ExecutorOpen => "EXECUTOR_OPEN",
            Event::ExecutorClose => "EXECUTOR_CLOSE",
        }
    }

    /// Default severity for this event
    pub fn severity(&self) -> Severity {
        match self {
            Event::JournalCorruption
            | Event::JournalPoisoned
            | Event::DispatcherFailed
            | Event::ProtocolViolation => Severity::Fatal,
            Event::BatchFailed | Event::JournalRollback => Severity::Error,
            Event::JournalTornTail | Event::CommitStale => Severity::Warn,
            Event::BatchWritten | Event::CommitApplied => Severity::Trace,
            _ => Severity::Info,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_upper_snake() {
        let events = [
            Event::StorageOpen,
            Event::StorageClose,
            Event::JournalTornTail,
            Event::JournalCorruption,
            Event::JournalRollback,
            Event::JournalPoisoned,
            Event::TrimCommitted,
            Event::TruncateUncommitted,
            Event::StorageRestored,
            Event::DispatcherStart,
            Event::DispatcherStop,
            Event::DispatcherFailed,
            Event::BatchWritten,
            Event::BatchFailed,
            Event::CommitApplied,
            Event::CommitStale,
            Event::SealBegin,
            Event::SealComplete,
            Event::Unseal,
            Event::ProtocolViolation,
            Event::ExecutorOpen,
            Event::ExecutorClose,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::ProtocolViolation.is_fatal());
        assert!(Event::JournalCorruption.is_fatal());
        assert!(Event::JournalPoisoned.is_fatal());
        assert!(Event::DispatcherFailed.is_fatal());
        assert!(!Event::SealComplete.is_fatal());
        assert_eq!(Event::JournalTornTail.severity(), Severity::Warn);
    }
}
