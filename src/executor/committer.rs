//! Commit stage
//!
//! Applies commit contexts from the sequencer one at a time: binds the local
//! LLSN range to its GLSN range in storage, advances the watermark and
//! resolves the primary tasks the range covers.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use super::errors::{ExecutorError, ExecutorResult};
use super::executor::Shared;
use super::state::ExecutorState;
use crate::observability::{log_event, Event};
use crate::types::CommitContext;

pub(crate) struct Committer {
    shared: Arc<Shared>,
    /// Serializes commits with each other and with the seal's truncation
    lock: Mutex<()>,
}

impl Committer {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            lock: Mutex::new(()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Applies `cc`. Contexts not newer than the current version are ignored.
    pub async fn commit(&self, cc: CommitContext) -> ExecutorResult<()> {
        let _serial = self.lock.lock().await;
        let shared = &self.shared;

        if shared.state.load() == ExecutorState::Sealed {
            return Err(ExecutorError::Sealed);
        }

        let current = shared.context.version();
        if cc.version <= current {
            log_event(
                Event::CommitStale,
                &[
                    ("version", &cc.version.to_string()),
                    ("current_version", &current.to_string()),
                ],
            );
            return Ok(());
        }

        let mut cc = cc;
        if !cc.is_empty() && cc.committed_llsn_begin.is_invalid() {
            cc.committed_llsn_begin = shared.context.committed_llsn_end();
        }

        let storage = Arc::clone(&shared.storage);
        let applied = tokio::task::spawn_blocking(move || {
            let mut batch = storage.new_commit_batch(cc)?;
            for i in 0..cc.num_entries() {
                batch.set(
                    cc.committed_glsn_begin.add(i),
                    cc.committed_llsn_begin.add(i),
                )?;
            }
            batch.apply()
        })
        .await
        .map_err(ExecutorError::from)
        .and_then(|result| result.map_err(ExecutorError::from));

        if let Err(err) = applied {
            if err.is_fatal()
                && shared
                    .state
                    .compare_and_transition(ExecutorState::Mutable, ExecutorState::Sealing)
            {
                log_event(
                    Event::BatchFailed,
                    &[("code", err.code()), ("error", &err.to_string())],
                );
            }
            return Err(err);
        }

        shared.context.set_version(cc.version);
        shared.context.set_high_watermark(cc.high_watermark);
        if !cc.is_empty() {
            shared
                .context
                .set_committed_llsn_end(cc.last_llsn().next());
        }
        shared.commit_wait.resolve(&cc);
        shared.metrics.record_commit(cc.num_entries());

        log_event(
            Event::CommitApplied,
            &[
                ("version", &cc.version.to_string()),
                ("hwm", &cc.high_watermark.to_string()),
                ("glsn_begin", &cc.committed_glsn_begin.to_string()),
                ("glsn_end", &cc.committed_glsn_end.to_string()),
            ],
        );
        Ok(())
    }
}
