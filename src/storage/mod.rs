//! Storage engine for one log stream replica
//!
//! Two keyspaces, each backed by an append-only checksummed journal:
//!
//! - data (`data.log`): LLSN -> payload, written by `WriteBatch`
//! - commit (`commit.log`): GLSN -> LLSN plus `CommitContext`s, written by `CommitBatch`
//!
//! Every applied batch is a single journal frame. Indexes live in memory and
//! are rebuilt from the journals on open. `read_recovery_info` cross-checks
//! the two keyspaces after a restart.
//!
//! Invariants:
//!
//! - LLSNs in the data keyspace are gapless from the first untrimmed entry
//! - a commit batch binds a contiguous LLSN range starting right after the
//!   last committed LLSN, and never covers unwritten data
//! - a batch whose cursor snapshot went stale is rejected, never merged

mod batch;
mod checksum;
mod config;
mod engine;
mod errors;
mod journal;
mod progress;
mod record;
mod recovery;

pub use batch::{CommitBatch, WriteBatch};
pub use config::StorageConfig;
pub use engine::{Scanner, Storage};
pub use errors::{Severity, StorageError, StorageResult};
pub use progress::{CommitProgress, WriteProgress};
pub use recovery::{LogEntryBoundary, RecoveryInfo, UncommittedBoundary};
