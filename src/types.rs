//! Core identifiers and records shared by the storage engine and the executor.
//!
//! - `Llsn`: local, per-replica write order (gapless, starts at 1)
//! - `Glsn`: global commit order assigned by the sequencer
//! - `CommitContext`: binding of a contiguous LLSN range to a contiguous GLSN range
//!
//! The value 0 is reserved as "none" for both sequence types.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Local log sequence number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Llsn(pub u64);

impl Llsn {
    /// Reserved "no entry" value.
    pub const INVALID: Llsn = Llsn(0);
    /// First LLSN assigned in a stream.
    pub const MIN: Llsn = Llsn(1);

    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> Llsn {
        Llsn(self.0 + 1)
    }

    /// Previous value, saturating at `INVALID`.
    pub fn prev(self) -> Llsn {
        Llsn(self.0.saturating_sub(1))
    }

    pub fn add(self, n: u64) -> Llsn {
        Llsn(self.0 + n)
    }
}

impl fmt::Display for Llsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global log sequence number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Glsn(pub u64);

impl Glsn {
    /// Reserved "no entry" value.
    pub const INVALID: Glsn = Glsn(0);
    /// Upper bound usable as an open scan end.
    pub const MAX: Glsn = Glsn(u64::MAX);

    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> Glsn {
        Glsn(self.0 + 1)
    }

    /// Previous value, saturating at `INVALID`.
    pub fn prev(self) -> Glsn {
        Glsn(self.0.saturating_sub(1))
    }

    pub fn add(self, n: u64) -> Glsn {
        Glsn(self.0 + n)
    }
}

impl fmt::Display for Glsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageNodeId(pub u32);

/// Log stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogStreamId(pub u32);

impl fmt::Display for StorageNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sn{}", self.0)
    }
}

impl fmt::Display for LogStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ls{}", self.0)
    }
}

/// One member of a log stream's replica set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replica {
    pub storage_node_id: StorageNodeId,
    pub log_stream_id: LogStreamId,
    /// Transport address of the storage node. Opaque to this crate.
    #[serde(default)]
    pub address: String,
}

impl Replica {
    pub fn new(
        storage_node_id: StorageNodeId,
        log_stream_id: LogStreamId,
        address: impl Into<String>,
    ) -> Self {
        Self {
            storage_node_id,
            log_stream_id,
            address: address.into(),
        }
    }
}

/// Checks that a replica set is well-formed and contains `(self_node, self_stream)`.
///
/// Well-formed means: non-empty, one entry per storage node, and every entry
/// names the same log stream.
pub fn validate_replica_set(
    replicas: &[Replica],
    self_node: StorageNodeId,
    self_stream: LogStreamId,
) -> Result<(), String> {
    if replicas.is_empty() {
        return Err("replica set is empty".to_string());
    }

    let mut seen = HashSet::with_capacity(replicas.len());
    let mut found_self = false;
    for replica in replicas {
        if replica.log_stream_id != self_stream {
            return Err(format!(
                "replica {} belongs to {}, expected {}",
                replica.storage_node_id, replica.log_stream_id, self_stream
            ));
        }
        if !seen.insert(replica.storage_node_id) {
            return Err(format!(
                "duplicate storage node {} in replica set",
                replica.storage_node_id
            ));
        }
        if replica.storage_node_id == self_node {
            found_self = true;
        }
    }

    if !found_self {
        return Err(format!(
            "replica set does not include {}/{}",
            self_node, self_stream
        ));
    }
    Ok(())
}

/// A committed log entry. Callers receive owned copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub llsn: Llsn,
    pub glsn: Glsn,
    pub data: Vec<u8>,
}

/// Position of one appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub llsn: Llsn,
    /// `Glsn::INVALID` until the record is committed.
    pub glsn: Glsn,
}

/// Binding of a contiguous LLSN range to a contiguous GLSN range.
///
/// `committed_glsn_end` is exclusive. A context with `begin == end` is empty:
/// it only advances the high watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitContext {
    pub version: u64,
    pub high_watermark: Glsn,
    pub prev_high_watermark: Glsn,
    pub committed_glsn_begin: Glsn,
    pub committed_glsn_end: Glsn,
    pub committed_llsn_begin: Llsn,
}

impl CommitContext {
    pub fn is_empty(&self) -> bool {
        self.committed_glsn_begin == self.committed_glsn_end
    }

    /// Number of entries covered. Zero for malformed ranges.
    pub fn num_entries(&self) -> u64 {
        self.committed_glsn_end
            .0
            .saturating_sub(self.committed_glsn_begin.0)
    }

    /// Last GLSN covered, or `INVALID` for an empty context.
    pub fn last_glsn(&self) -> Glsn {
        if self.is_empty() {
            Glsn::INVALID
        } else {
            self.committed_glsn_end.prev()
        }
    }

    /// Last LLSN covered, or `INVALID` for an empty context.
    pub fn last_llsn(&self) -> Llsn {
        if self.is_empty() {
            Llsn::INVALID
        } else {
            self.committed_llsn_begin.add(self.num_entries() - 1)
        }
    }
}
