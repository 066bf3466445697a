//! Replication stage
//!
//! The executor hands every primary batch to a `Replicator`, which owns the
//! transport to the backups. `ChannelReplicator` is the in-process version:
//! batches go into a bounded queue and a transport task drains the
//! `ReplicationReceiver` end.
//!
//! Replicate tasks belong to the replicator's pool. The executor takes one
//! with `acquire`; the transport gives it back with `release` once the batch
//! has been forwarded. Payloads are shared with the local storage write.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, Notify};

use super::config::ExecutorConfig;
use super::errors::{ExecutorError, ExecutorResult};
use super::pool::{Pool, Reset};
use crate::types::{LogStreamId, Llsn, Replica};

/// A batch of entries for the backups, in LLSN order from `begin_llsn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicateTask {
    pub log_stream_id: LogStreamId,
    pub begin_llsn: Llsn,
    pub payloads: Arc<[Vec<u8>]>,
    /// Destination backups
    pub replicas: Vec<Replica>,
}

impl Default for ReplicateTask {
    fn default() -> Self {
        Self {
            log_stream_id: LogStreamId(0),
            begin_llsn: Llsn::INVALID,
            payloads: Arc::from(Vec::new()),
            replicas: Vec::new(),
        }
    }
}

impl Reset for ReplicateTask {
    fn reset(&mut self) {
        self.log_stream_id = LogStreamId(0);
        self.begin_llsn = Llsn::INVALID;
        self.payloads = Arc::from(Vec::new());
        self.replicas.clear();
    }
}

pub trait Replicator: Send + Sync + 'static {
    /// A cleared task for the next batch.
    fn acquire(&self) -> ReplicateTask {
        ReplicateTask::default()
    }

    /// Accepts a batch for delivery. Resolves once the batch is queued.
    fn send(&self, task: ReplicateTask) -> BoxFuture<'_, ExecutorResult<()>>;

    /// Refuses further batches.
    fn stop(&self);

    /// Resolves once every accepted batch has left the queue.
    fn drain_queue(&self) -> BoxFuture<'_, ()>;
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    drained: Notify,
}

impl Pending {
    fn release(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

pub struct ChannelReplicator {
    tx: mpsc::Sender<ReplicateTask>,
    pending: Arc<Pending>,
    pool: Arc<Pool<ReplicateTask>>,
    stopped: AtomicBool,
}

/// Receiving end of a `ChannelReplicator`, owned by the transport.
pub struct ReplicationReceiver {
    rx: mpsc::Receiver<ReplicateTask>,
    pending: Arc<Pending>,
    pool: Arc<Pool<ReplicateTask>>,
}

impl ChannelReplicator {
    pub fn new(capacity: usize) -> (Self, ReplicationReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(Pending::default());
        // Queued tasks plus one in the sender's hands and one in the transport's
        let pool = Arc::new(Pool::new(capacity.max(1) + 2));
        (
            Self {
                tx,
                pending: Arc::clone(&pending),
                pool: Arc::clone(&pool),
                stopped: AtomicBool::new(false),
            },
            ReplicationReceiver { rx, pending, pool },
        )
    }

    /// Replicator sized by `config.replicate_queue_capacity`.
    pub fn for_config(config: &ExecutorConfig) -> (Self, ReplicationReceiver) {
        Self::new(config.replicate_queue_capacity)
    }

    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }
}

impl Replicator for ChannelReplicator {
    fn acquire(&self) -> ReplicateTask {
        self.pool.get()
    }

    fn send(&self, task: ReplicateTask) -> BoxFuture<'_, ExecutorResult<()>> {
        async move {
            if self.stopped.load(Ordering::Acquire) {
                self.pool.put(task);
                return Err(ExecutorError::Closed);
            }
            self.pending.count.fetch_add(1, Ordering::AcqRel);
            if let Err(mpsc::error::SendError(task)) = self.tx.send(task).await {
                self.pending.release();
                self.pool.put(task);
                return Err(ExecutorError::Replication(
                    "replication receiver dropped".to_string(),
                ));
            }
            Ok(())
        }
        .boxed()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn drain_queue(&self) -> BoxFuture<'_, ()> {
        async move {
            loop {
                let drained = self.pending.drained.notified();
                tokio::pin!(drained);
                drained.as_mut().enable();
                if self.pending.count.load(Ordering::Acquire) == 0 || self.tx.is_closed() {
                    return;
                }
                drained.await;
            }
        }
        .boxed()
    }
}

impl ReplicationReceiver {
    /// Next batch, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<ReplicateTask> {
        let task = self.rx.recv().await;
        if task.is_some() {
            self.pending.release();
        }
        task
    }

    /// Returns a forwarded task to the replicator's pool.
    pub fn release(&self, task: ReplicateTask) {
        self.pool.put(task);
    }
}

impl Drop for ReplicationReceiver {
    fn drop(&mut self) {
        // Batches still queued will never be taken.
        self.rx.close();
        self.pending.drained.notify_waiters();
    }
}
