//! Log stream executor
//!
//! Owns one replica of one log stream: the storage engine, the write
//! pipeline, the commit stage and the seal/unseal state machine.
//!
//! A freshly opened executor is Sealing. The cluster seals it with the last
//! committed GLSN, then unseals it with a replica set; the first replica in
//! the set is the primary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use super::commit_wait::CommitWaitQueue;
use super::committer::Committer;
use super::config::ExecutorConfig;
use super::context::StreamContext;
use super::errors::{ExecutorError, ExecutorResult};
use super::pool::Pool;
use super::replicator::Replicator;
use super::state::{ExecutorState, StateMachine};
use super::task::{AppendTask, TaskRole};
use super::writer::{DrainOutcome, Writer};
use crate::observability::{log_event, Event, MetricsRegistry, MetricsSnapshot};
use crate::storage::{Storage, StorageResult};
use crate::types::{
    CommitContext, Glsn, LogEntry, LogPosition, LogStreamId, Llsn, Replica, StorageNodeId,
};

/// State shared by every stage of one executor.
pub(crate) struct Shared {
    pub config: ExecutorConfig,
    pub storage: Arc<Storage>,
    pub state: StateMachine,
    pub context: StreamContext,
    pub commit_wait: CommitWaitQueue,
    pub append_pool: Pool<AppendTask>,
    pub replicator: Arc<dyn Replicator>,
    pub replicas: RwLock<Vec<Replica>>,
    pub metrics: MetricsRegistry,
    pub closed: AtomicBool,
}

impl Shared {
    pub fn ensure_open(&self) -> ExecutorResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutorError::Closed);
        }
        Ok(())
    }

    pub fn replicas(&self) -> Vec<Replica> {
        self.replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_peers(&self) -> bool {
        self.replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|replica| replica.storage_node_id != self.config.storage_node_id)
    }

    /// Appends the replica set members other than this one to `peers`.
    pub fn peers_into(&self, peers: &mut Vec<Replica>) {
        peers.extend(
            self.replicas
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|replica| replica.storage_node_id != self.config.storage_node_id)
                .cloned(),
        );
    }

    /// `Some(true)` for the primary, `Some(false)` for a backup, `None`
    /// before the first unseal.
    pub fn is_primary(&self) -> Option<bool> {
        self.replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .map(|replica| replica.storage_node_id == self.config.storage_node_id)
    }
}

/// Uncommitted tail reported to the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UncommittedReport {
    pub log_stream_id: LogStreamId,
    pub version: u64,
    pub high_watermark: Glsn,
    /// First LLSN without a GLSN
    pub uncommitted_llsn_offset: Llsn,
    pub uncommitted_llsn_length: u64,
}

impl UncommittedReport {
    /// Exclusive end of the uncommitted range.
    pub fn uncommitted_llsn_end(&self) -> Llsn {
        self.uncommitted_llsn_offset.add(self.uncommitted_llsn_length)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogStreamMetadata {
    pub storage_node_id: StorageNodeId,
    pub log_stream_id: LogStreamId,
    pub state: ExecutorState,
    pub version: u64,
    pub high_watermark: Glsn,
    pub committed_llsn_end: Llsn,
    pub uncommitted_llsn_end: Llsn,
    pub replicas: Vec<Replica>,
    pub is_primary: bool,
    pub inflight: usize,
    /// Durable primary appends waiting for their GLSNs
    pub waiting_for_commit: usize,
}

pub struct LogStreamExecutor {
    pub(super) shared: Arc<Shared>,
    pub(super) writer: Writer,
    pub(super) committer: Committer,
    pub(super) seal_lock: tokio::sync::Mutex<()>,
}

impl LogStreamExecutor {
    /// Opens storage, recovers cursors and starts the dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(
        config: ExecutorConfig,
        replicator: Arc<dyn Replicator>,
    ) -> ExecutorResult<Self> {
        config.validate()?;

        let storage_config = config.storage.clone();
        let (storage, info) = tokio::task::spawn_blocking(move || -> StorageResult<_> {
            let storage = Storage::open(storage_config)?;
            let info = storage.read_recovery_info()?;
            Ok((storage, info))
        })
        .await??;

        let context = StreamContext::new(
            info.last_written_llsn().next(),
            info.last_committed_llsn().next(),
            info.high_watermark(),
            info.last_commit_context.map(|cc| cc.version).unwrap_or(0),
        );

        let shared = Arc::new(Shared {
            storage: Arc::new(storage),
            state: StateMachine::new(ExecutorState::Sealing),
            context,
            commit_wait: CommitWaitQueue::new(config.queue_capacity),
            append_pool: Pool::new(config.queue_capacity),
            replicator,
            replicas: RwLock::new(Vec::new()),
            metrics: MetricsRegistry::new(),
            closed: AtomicBool::new(false),
            config,
        });

        log_event(
            Event::ExecutorOpen,
            &[
                ("sn", &shared.config.storage_node_id.to_string()),
                ("ls", &shared.config.log_stream_id.to_string()),
                ("next_llsn", &shared.context.next_llsn().to_string()),
                ("hwm", &shared.context.high_watermark().to_string()),
            ],
        );

        Ok(Self {
            writer: Writer::start(Arc::clone(&shared)),
            committer: Committer::new(Arc::clone(&shared)),
            seal_lock: tokio::sync::Mutex::new(()),
            shared,
        })
    }

    pub fn storage_node_id(&self) -> StorageNodeId {
        self.shared.config.storage_node_id
    }

    pub fn log_stream_id(&self) -> LogStreamId {
        self.shared.config.log_stream_id
    }

    pub fn state(&self) -> ExecutorState {
        self.shared.state.load()
    }

    /// Appends `payloads` on the primary. Resolves with their positions once
    /// they are committed.
    pub async fn append(&self, payloads: Vec<Vec<u8>>) -> ExecutorResult<Vec<LogPosition>> {
        if self.shared.is_primary() == Some(false) {
            return Err(ExecutorError::invalid("append sent to a backup replica"));
        }
        let mut task = self.shared.append_pool.get();
        let completion = task.prepare(TaskRole::Primary, payloads);
        self.writer.submit(task).await?;
        completion.await.map_err(|_| ExecutorError::Closed)?
    }

    /// Writes entries the primary already ordered, starting at `begin_llsn`.
    /// Resolves once they are durable here; GLSNs are not yet known.
    pub async fn replicate(
        &self,
        begin_llsn: Llsn,
        payloads: Vec<Vec<u8>>,
    ) -> ExecutorResult<Vec<LogPosition>> {
        if self.shared.is_primary() == Some(true) {
            return Err(ExecutorError::invalid("replicate sent to the primary replica"));
        }
        let mut task = self.shared.append_pool.get();
        let completion = task.prepare(TaskRole::Backup { begin_llsn }, payloads);
        self.writer.submit(task).await?;
        completion.await.map_err(|_| ExecutorError::Closed)?
    }

    /// Applies a commit context from the sequencer.
    pub async fn commit(&self, cc: CommitContext) -> ExecutorResult<()> {
        self.shared.ensure_open()?;
        self.committer.commit(cc).await
    }

    /// Uncommitted tail for the sequencer.
    pub fn report(&self) -> ExecutorResult<UncommittedReport> {
        self.shared.ensure_open()?;
        let context = &self.shared.context;
        let version = context.version();
        let high_watermark = context.high_watermark();
        let offset = context.committed_llsn_end();
        let end = context.next_llsn();
        Ok(UncommittedReport {
            log_stream_id: self.shared.config.log_stream_id,
            version,
            high_watermark,
            uncommitted_llsn_offset: offset,
            uncommitted_llsn_length: end.0.saturating_sub(offset.0),
        })
    }

    /// Deletes committed entries at or below `glsn`.
    pub async fn trim(&self, glsn: Glsn) -> ExecutorResult<()> {
        self.shared.ensure_open()?;
        let storage = Arc::clone(&self.shared.storage);
        tokio::task::spawn_blocking(move || storage.delete_committed(glsn.next())).await??;
        Ok(())
    }

    pub async fn read(&self, glsn: Glsn) -> ExecutorResult<LogEntry> {
        self.shared.ensure_open()?;
        let storage = Arc::clone(&self.shared.storage);
        Ok(tokio::task::spawn_blocking(move || storage.read(glsn)).await??)
    }

    /// Committed entries in `[begin, end)`.
    pub async fn scan(&self, begin: Glsn, end: Glsn) -> ExecutorResult<Vec<LogEntry>> {
        self.shared.ensure_open()?;
        let storage = Arc::clone(&self.shared.storage);
        let entries = tokio::task::spawn_blocking(move || {
            storage.scan(begin, end)?.collect::<StorageResult<Vec<_>>>()
        })
        .await??;
        Ok(entries)
    }

    pub fn metadata(&self) -> LogStreamMetadata {
        let shared = &self.shared;
        LogStreamMetadata {
            storage_node_id: shared.config.storage_node_id,
            log_stream_id: shared.config.log_stream_id,
            state: shared.state.load(),
            version: shared.context.version(),
            high_watermark: shared.context.high_watermark(),
            committed_llsn_end: shared.context.committed_llsn_end(),
            uncommitted_llsn_end: shared.context.next_llsn(),
            replicas: shared.replicas(),
            is_primary: shared.is_primary().unwrap_or(false),
            inflight: self.writer.inflight(),
            waiting_for_commit: shared.commit_wait.len(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Waits for every admitted append to leave the pipeline, or for `cancel`.
    pub async fn wait_for_drainage<F: std::future::Future>(&self, cancel: F) -> DrainOutcome {
        self.writer.wait_for_drainage(cancel).await
    }

    /// Stops the pipeline, fails pending work with `Closed` and closes
    /// storage. Idempotent. Storage is closed even if the dispatcher failed;
    /// that failure is returned afterwards.
    pub async fn close(&self) -> ExecutorResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let stopped = self.writer.stop().await;
        self.shared.replicator.stop();
        self.shared.commit_wait.fail_all(&ExecutorError::Closed);

        let storage = Arc::clone(&self.shared.storage);
        tokio::task::spawn_blocking(move || storage.close()).await??;

        log_event(
            Event::ExecutorClose,
            &[("ls", &self.shared.config.log_stream_id.to_string())],
        );
        stopped
    }
}
