//! Shared helpers for executor integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use aerolog::executor::{ChannelReplicator, ExecutorConfig, LogStreamExecutor, SealStatus};
use aerolog::storage::StorageConfig;
use aerolog::types::{CommitContext, Glsn, LogStreamId, Replica, StorageNodeId};

pub const STREAM: LogStreamId = LogStreamId(7);

pub fn replica(node: u32) -> Replica {
    Replica::new(StorageNodeId(node), STREAM, format!("sn{}", node))
}

pub fn config(dir: &Path, node: u32) -> ExecutorConfig {
    let mut config = ExecutorConfig::new(
        StorageNodeId(node),
        STREAM,
        StorageConfig::new(dir).with_sync_writes(false),
    );
    config.batch_size = 16;
    config
}

pub fn payloads(prefix: &str, n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("{}-{}", prefix, i).into_bytes()).collect()
}

/// Opens an executor with no backups to replicate to.
pub async fn open(dir: &Path, node: u32) -> LogStreamExecutor {
    let config = config(dir, node);
    let (replicator, _receiver) = ChannelReplicator::for_config(&config);
    LogStreamExecutor::open(config, Arc::new(replicator))
        .await
        .unwrap()
}

/// Seals at the executor's own watermark, then unseals with `replicas`.
pub async fn make_mutable(executor: &LogStreamExecutor, replicas: Vec<Replica>) {
    let hwm = executor.metadata().high_watermark;
    let (status, _) = executor.seal(hwm).await.unwrap();
    assert_eq!(status, SealStatus::Sealed);
    executor.unseal(replicas).await.unwrap();
}

/// Stand-in for the cluster sequencer: assigns GLSNs to the range every
/// replica has written and commits it everywhere.
pub struct Sequencer {
    version: u64,
    next_glsn: u64,
    high_watermark: Glsn,
}

impl Sequencer {
    pub fn new(first_glsn: u64) -> Self {
        Self {
            version: 0,
            next_glsn: first_glsn,
            high_watermark: Glsn::INVALID,
        }
    }

    /// Resumes after whatever `executor` already committed.
    pub fn resume(executor: &LogStreamExecutor) -> Self {
        let report = executor.report().unwrap();
        Self {
            version: report.version,
            next_glsn: report.high_watermark.0 + 1,
            high_watermark: report.high_watermark,
        }
    }

    pub fn high_watermark(&self) -> Glsn {
        self.high_watermark
    }

    /// Commits the uncommitted prefix written by every replica. Returns the
    /// number of entries committed.
    pub async fn commit_round(&mut self, replicas: &[&LogStreamExecutor]) -> u64 {
        let reports: Vec<_> = replicas.iter().map(|r| r.report().unwrap()).collect();
        let Some(first) = reports.first() else {
            return 0;
        };
        let offset = first.uncommitted_llsn_offset;
        let count = reports
            .iter()
            .map(|r| r.uncommitted_llsn_end().0.saturating_sub(offset.0))
            .min()
            .unwrap_or(0);
        if count == 0 {
            return 0;
        }

        self.version += 1;
        let begin = Glsn(self.next_glsn);
        let cc = CommitContext {
            version: self.version,
            high_watermark: begin.add(count - 1),
            prev_high_watermark: self.high_watermark,
            committed_glsn_begin: begin,
            committed_glsn_end: begin.add(count),
            committed_llsn_begin: offset,
        };
        for replica in replicas {
            replica.commit(cc).await.unwrap();
        }
        self.next_glsn += count;
        self.high_watermark = cc.high_watermark;
        count
    }
}
