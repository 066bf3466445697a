//! Write pipeline
//!
//! Producers submit append tasks into a bounded queue. A single dispatcher
//! drains one task plus whatever else is already queued (up to `batch_size`),
//! assigns or verifies contiguous LLSNs, then runs two legs concurrently:
//!
//! - leg A: one storage write batch, then primary tasks move to commit-wait
//! - leg B: the batch goes to the replicator (primary with backups only)
//!
//! Both legs must succeed. Any failure is delivered to every task in the batch
//! and pushes the stream from Mutable to Sealing. A batch that left the queue
//! always runs to completion; cancellation only affects waiting callers.

use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::errors::{ExecutorError, ExecutorResult};
use super::executor::Shared;
use super::replicator::ReplicateTask;
use super::state::ExecutorState;
use super::task::{AppendTask, TaskRole};
use crate::observability::{log_event, Event};
use crate::types::Llsn;

/// Count of admitted tasks that have not left the pipeline.
#[derive(Default)]
pub(crate) struct Inflight {
    count: AtomicUsize,
    zero: Notify,
}

impl Inflight {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// Holds one in-flight slot; released on drop, including when the submitting
/// future is cancelled.
pub(crate) struct InflightGuard {
    inflight: Arc<Inflight>,
}

impl InflightGuard {
    fn acquire(inflight: &Arc<Inflight>) -> Self {
        inflight.count.fetch_add(1, Ordering::AcqRel);
        Self {
            inflight: Arc::clone(inflight),
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.inflight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inflight.zero.notify_waiters();
        }
    }
}

/// How `wait_for_drainage` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    Cancelled,
}

pub(crate) struct Writer {
    tx: mpsc::Sender<AppendTask>,
    closed: AtomicBool,
    inflight: Arc<Inflight>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl Writer {
    /// Starts the dispatcher on the current runtime.
    pub fn start(shared: Arc<Shared>) -> Self {
        let (tx, rx) = mpsc::channel(shared.config.queue_capacity);
        let shutdown = Arc::new(Notify::new());
        let dispatcher = Dispatcher {
            rx,
            shutdown: Arc::clone(&shutdown),
            shared: Arc::clone(&shared),
            batch: Vec::with_capacity(shared.config.batch_size),
        };
        let handle = tokio::spawn(dispatcher.run());

        Self {
            tx,
            closed: AtomicBool::new(false),
            inflight: Arc::new(Inflight::default()),
            shutdown,
            handle: Mutex::new(Some(handle)),
            shared,
        }
    }

    /// Admits and enqueues `task`, waiting for queue space. A refused task
    /// goes back to the pool.
    pub async fn submit(&self, mut task: AppendTask) -> ExecutorResult<()> {
        if let Err(err) = self.admit(&mut task) {
            self.shared.append_pool.put(task);
            return Err(err);
        }
        self.tx.send(task).await.map_err(|mpsc::error::SendError(task)| {
            self.shared.append_pool.put(task);
            ExecutorError::Closed
        })
    }

    fn admit(&self, task: &mut AppendTask) -> ExecutorResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutorError::Closed);
        }
        task.validate()?;

        let guard = self
            .shared
            .state
            .admit(|| InflightGuard::acquire(&self.inflight))?;
        task.set_inflight(guard);
        Ok(())
    }

    pub fn inflight(&self) -> usize {
        self.inflight.count()
    }

    /// Waits until no admitted task is left, or until `cancel` resolves.
    pub async fn wait_for_drainage<F: Future>(&self, cancel: F) -> DrainOutcome {
        tokio::pin!(cancel);
        loop {
            let zero = self.inflight.zero.notified();
            tokio::pin!(zero);
            zero.as_mut().enable();
            if self.inflight.count() == 0 {
                return DrainOutcome::Drained;
            }
            tokio::select! {
                _ = &mut zero => {}
                _ = &mut cancel => return DrainOutcome::Cancelled,
            }
        }
    }

    /// Stops the dispatcher and fails every queued task with `Closed`.
    /// Idempotent. Errors if the dispatcher task panicked or was aborted.
    pub async fn stop(&self) -> ExecutorResult<()> {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_one();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };
        handle.await.map_err(|err| {
            log_event(
                Event::DispatcherFailed,
                &[
                    ("ls", &self.shared.config.log_stream_id.to_string()),
                    ("error", &err.to_string()),
                ],
            );
            ExecutorError::Internal(format!("dispatcher task failed: {}", err))
        })
    }
}

struct Dispatcher {
    rx: mpsc::Receiver<AppendTask>,
    shutdown: Arc<Notify>,
    shared: Arc<Shared>,
    batch: Vec<AppendTask>,
}

impl Dispatcher {
    async fn run(mut self) {
        let ls = self.shared.config.log_stream_id.to_string();
        log_event(Event::DispatcherStart, &[("ls", &ls)]);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                task = self.rx.recv() => match task {
                    Some(task) => self.batch.push(task),
                    None => break,
                },
            }

            while self.batch.len() < self.shared.config.batch_size {
                match self.rx.try_recv() {
                    Ok(task) => self.batch.push(task),
                    Err(_) => break,
                }
            }

            self.dispatch().await;
        }

        self.rx.close();
        while let Ok(mut task) = self.rx.try_recv() {
            task.fail(ExecutorError::Closed);
            self.shared.append_pool.put(task);
        }
        log_event(Event::DispatcherStop, &[("ls", &ls)]);
    }

    /// Runs the current batch to completion and empties it.
    async fn dispatch(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut batch = mem::take(&mut self.batch);

        let begin = shared.context.next_llsn();
        match process(&shared, &mut batch, begin).await {
            Ok((end, bytes)) => {
                shared.metrics.record_batch(end.0 - begin.0, bytes);
                log_event(
                    Event::BatchWritten,
                    &[
                        ("begin_llsn", &begin.to_string()),
                        ("end_llsn", &end.to_string()),
                    ],
                );
            }
            Err(err) => fail_batch(&shared, &mut batch, begin, err),
        }

        // Resetting the tasks releases their in-flight slots.
        for task in batch.drain(..) {
            shared.append_pool.put(task);
        }
        self.batch = batch;
    }
}

/// Writes and replicates one batch starting at `begin`. Returns the end LLSN
/// and the payload byte count.
async fn process(
    shared: &Arc<Shared>,
    batch: &mut [AppendTask],
    begin: Llsn,
) -> ExecutorResult<(Llsn, u64)> {
    let mut expected = begin;
    for task in batch.iter_mut() {
        if let TaskRole::Backup { begin_llsn } = task.role {
            if begin_llsn != expected {
                return Err(ExecutorError::SequenceMismatch {
                    expected,
                    actual: begin_llsn,
                });
            }
        }
        task.begin_llsn = expected;
        expected = task.end_llsn();
    }
    let end = expected;

    let mut collected = Vec::with_capacity((end.0 - begin.0) as usize);
    for task in batch.iter_mut() {
        collected.extend(task.payloads.drain(..));
    }
    let payloads: Arc<[Vec<u8>]> = collected.into();
    let bytes = payloads.iter().map(|p| p.len() as u64).sum::<u64>();
    let replicate = replicate_task(shared, batch, begin, &payloads);
    let replicated = replicate.as_ref().map(|task| task.payloads.len() as u64);

    let storage_leg = async {
        let storage = Arc::clone(&shared.storage);
        let payloads = Arc::clone(&payloads);
        tokio::task::spawn_blocking(move || {
            let mut write_batch = storage.new_write_batch()?;
            for (i, payload) in payloads.iter().enumerate() {
                write_batch.put(begin.add(i as u64), payload)?;
            }
            write_batch.apply()
        })
        .await??;

        for task in batch.iter_mut().filter(|task| task.is_primary()) {
            if let Some(completion) = task.take_completion() {
                shared
                    .commit_wait
                    .push(task.begin_llsn, task.num_entries, completion);
            }
        }
        Ok::<(), ExecutorError>(())
    };

    let replication_leg = async {
        match replicate {
            Some(task) => shared.replicator.send(task).await,
            None => Ok(()),
        }
    };

    // A storage failure drops the replication leg. A replication failure
    // still waits for the local write, which is never abandoned once started.
    {
        tokio::pin!(storage_leg, replication_leg);
        tokio::select! {
            stored = &mut storage_leg => {
                stored?;
                replication_leg.await?;
            }
            sent = &mut replication_leg => {
                let stored = storage_leg.await;
                sent?;
                stored?;
            }
        }
    }

    if !shared.context.advance_next_llsn(begin, end) {
        return Err(ExecutorError::protocol_violation(format!(
            "next llsn moved while writing [{}, {})",
            begin, end
        )));
    }

    if let Some(records) = replicated {
        shared.metrics.add_replicated(records);
    }
    for task in batch.iter_mut().filter(|task| !task.is_primary()) {
        task.complete_written();
    }
    Ok((end, bytes))
}

/// Mirror of a primary batch for the backups, if there are any.
fn replicate_task(
    shared: &Shared,
    batch: &[AppendTask],
    begin: Llsn,
    payloads: &Arc<[Vec<u8>]>,
) -> Option<ReplicateTask> {
    if !batch.first().is_some_and(|task| task.is_primary()) || !shared.has_peers() {
        return None;
    }
    let mut task = shared.replicator.acquire();
    task.log_stream_id = shared.config.log_stream_id;
    task.begin_llsn = begin;
    task.payloads = Arc::clone(payloads);
    shared.peers_into(&mut task.replicas);
    Some(task)
}

fn fail_batch(shared: &Shared, batch: &mut [AppendTask], begin: Llsn, err: ExecutorError) {
    for task in batch.iter_mut() {
        task.fail(err.clone());
    }
    shared.commit_wait.fail_from(begin, &err);
    shared.metrics.increment_batches_failed();

    let escalated = shared
        .state
        .compare_and_transition(ExecutorState::Mutable, ExecutorState::Sealing);
    let event = if matches!(err, ExecutorError::ProtocolViolation(_)) {
        Event::ProtocolViolation
    } else {
        Event::BatchFailed
    };
    log_event(
        event,
        &[
            ("begin_llsn", &begin.to_string()),
            ("code", err.code()),
            ("error", &err.to_string()),
            ("sealing", if escalated { "true" } else { "false" }),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::pool::Pool;
    use crate::executor::task::TaskRole;
    use crate::executor::{ChannelReplicator, ExecutorConfig, LogStreamExecutor};
    use crate::storage::StorageConfig;
    use crate::types::{LogStreamId, StorageNodeId};
    use tempfile::TempDir;

    #[test]
    fn test_pooled_task_releases_inflight_slot() {
        let inflight = Arc::new(Inflight::default());
        let pool: Pool<AppendTask> = Pool::new(1);

        let mut task = pool.get();
        let _rx = task.prepare(TaskRole::Primary, vec![b"a".to_vec()]);
        task.set_inflight(InflightGuard::acquire(&inflight));
        assert_eq!(inflight.count(), 1);

        pool.put(task);
        assert_eq!(inflight.count(), 0);
    }

    #[tokio::test]
    async fn test_aborted_dispatcher_surfaces_on_close() {
        let dir = TempDir::new().unwrap();
        let config = ExecutorConfig::new(
            StorageNodeId(1),
            LogStreamId(1),
            StorageConfig::new(dir.path()).with_sync_writes(false),
        );
        let (replicator, _receiver) = ChannelReplicator::for_config(&config);
        let executor = LogStreamExecutor::open(config, Arc::new(replicator))
            .await
            .unwrap();

        if let Some(handle) = executor.writer.handle.lock().unwrap().as_ref() {
            handle.abort();
        }

        assert!(matches!(
            executor.close().await,
            Err(ExecutorError::Internal(_))
        ));
        // Storage was still closed, and a second close is a no-op
        assert!(executor.shared.storage.is_closed());
        executor.close().await.unwrap();
    }
}
