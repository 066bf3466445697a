//! Recovery scan across both keyspaces
//!
//! Recovery answers three questions after a restart: what was last committed,
//! which entries are still readable, and which written entries never got a
//! GLSN. The two keyspaces must agree on the answer; any disagreement is
//! reported as corruption rather than repaired.

use serde::Serialize;

use super::engine::{lock, Storage};
use super::errors::{StorageError, StorageResult};
use crate::types::{CommitContext, Glsn, LogEntry, Llsn};

/// First and last readable committed entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntryBoundary {
    pub first: LogEntry,
    pub last: LogEntry,
}

/// First and last written LLSNs without a GLSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UncommittedBoundary {
    pub first: Llsn,
    pub last: Llsn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryInfo {
    /// Latest commit context, possibly empty
    pub last_commit_context: Option<CommitContext>,
    /// Latest commit context that bound at least one entry
    pub last_non_empty_commit_context: Option<CommitContext>,
    pub log_entry_boundary: Option<LogEntryBoundary>,
    pub uncommitted_boundary: Option<UncommittedBoundary>,
}

impl RecoveryInfo {
    pub fn last_committed_llsn(&self) -> Llsn {
        self.last_non_empty_commit_context
            .map(|cc| cc.last_llsn())
            .unwrap_or(Llsn::INVALID)
    }

    pub fn last_committed_glsn(&self) -> Glsn {
        self.last_non_empty_commit_context
            .map(|cc| cc.last_glsn())
            .unwrap_or(Glsn::INVALID)
    }

    /// Last written LLSN, committed or not.
    pub fn last_written_llsn(&self) -> Llsn {
        match self.uncommitted_boundary {
            Some(boundary) => boundary.last,
            None => self.last_committed_llsn(),
        }
    }

    pub fn high_watermark(&self) -> Glsn {
        self.last_commit_context
            .map(|cc| cc.high_watermark)
            .unwrap_or(Glsn::INVALID)
    }
}

impl Storage {
    /// Reads and cross-checks the durable state of both keyspaces.
    pub fn read_recovery_info(&self) -> StorageResult<RecoveryInfo> {
        self.ensure_open()?;

        let (last_context, last_non_empty, trimmed_below, first_pos, last_pos) = {
            let commit = lock(&self.commit);
            (
                commit.last_context,
                commit.last_non_empty_context,
                commit.trimmed_below,
                commit.index.iter().next().map(|(g, l)| (*g, *l)),
                commit.index.iter().next_back().map(|(g, l)| (*g, *l)),
            )
        };

        let log_entry_boundary = match (first_pos, last_pos) {
            (Some((first_glsn, first_llsn)), Some((last_glsn, last_llsn))) => {
                Some(LogEntryBoundary {
                    first: self.read_entry(first_glsn, first_llsn)?,
                    last: self.read_entry(last_glsn, last_llsn)?,
                })
            }
            _ => None,
        };

        match (&last_non_empty, &log_entry_boundary) {
            (Some(cc), Some(boundary)) => {
                if boundary.last.glsn != cc.last_glsn() || boundary.last.llsn != cc.last_llsn() {
                    return Err(StorageError::corrupt(format!(
                        "last commit context ends at glsn {} llsn {}, last entry is glsn {} llsn {}",
                        cc.last_glsn(),
                        cc.last_llsn(),
                        boundary.last.glsn,
                        boundary.last.llsn
                    )));
                }
            }
            (Some(cc), None) => {
                if cc.committed_glsn_end > trimmed_below {
                    return Err(StorageError::corrupt(format!(
                        "commit context ends at glsn {} but no committed entry exists",
                        cc.last_glsn()
                    )));
                }
            }
            (None, Some(boundary)) => {
                return Err(StorageError::corrupt(format!(
                    "committed entry at glsn {} has no commit context",
                    boundary.last.glsn
                )));
            }
            (None, None) => {}
        }

        let committed_llsn = last_non_empty
            .map(|cc| cc.last_llsn())
            .unwrap_or(Llsn::INVALID);

        let uncommitted_boundary = {
            let data = lock(&self.data);
            let mut uncommitted = data.index.range(committed_llsn.next()..).map(|(l, _)| *l);
            match uncommitted.next() {
                Some(first) => {
                    let last = data.last_llsn;
                    if first != committed_llsn.next() {
                        return Err(StorageError::corrupt(format!(
                            "gap between committed llsn {} and uncommitted llsn {}",
                            committed_llsn, first
                        )));
                    }
                    Some(UncommittedBoundary { first, last })
                }
                None => {
                    if data.last_llsn > committed_llsn {
                        return Err(StorageError::corrupt(format!(
                            "written llsn {} is missing from the data keyspace",
                            data.last_llsn
                        )));
                    }
                    None
                }
            }
        };

        Ok(RecoveryInfo {
            last_commit_context: last_context,
            last_non_empty_commit_context: last_non_empty,
            log_entry_boundary,
            uncommitted_boundary,
        })
    }
}
