//! Per-stream counters
//!
//! Counters only, monotonic, reset on process start. Relaxed atomics: readers
//! may see a slightly stale value.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    appended_records: AtomicU64,
    appended_bytes: AtomicU64,
    replicated_records: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    commits_applied: AtomicU64,
    committed_records: AtomicU64,
    seals: AtomicU64,
    unseals: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one durable batch of `records` entries totalling `bytes`.
    pub fn record_batch(&self, records: u64, bytes: u64) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.appended_records.fetch_add(records, Ordering::Relaxed);
        self.appended_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_replicated(&self, records: u64) {
        self.replicated_records.fetch_add(records, Ordering::Relaxed);
    }

    pub fn increment_batches_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self, records: u64) {
        self.commits_applied.fetch_add(1, Ordering::Relaxed);
        self.committed_records.fetch_add(records, Ordering::Relaxed);
    }

    pub fn increment_seals(&self) {
        self.seals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_unseals(&self) {
        self.unseals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            appended_records: self.appended_records.load(Ordering::Relaxed),
            appended_bytes: self.appended_bytes.load(Ordering::Relaxed),
            replicated_records: self.replicated_records.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            commits_applied: self.commits_applied.load(Ordering::Relaxed),
            committed_records: self.committed_records.load(Ordering::Relaxed),
            seals: self.seals.load(Ordering::Relaxed),
            unseals: self.unseals.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub appended_records: u64,
    pub appended_bytes: u64,
    pub replicated_records: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub commits_applied: u64,
    pub committed_records: u64,
    pub seals: u64,
    pub unseals: u64,
}
