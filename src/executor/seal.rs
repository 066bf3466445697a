//! Seal and unseal
//!
//! Sealing freezes a replica at the last GLSN the cluster agrees on. A replica
//! behind that point stays Sealing until commits catch it up; a replica ahead
//! of it has committed something the cluster never did, which is a protocol
//! violation. At the agreed point the pipeline is drained, uncommitted data is
//! truncated and the replica becomes Sealed.

use std::sync::{Arc, PoisonError};

use serde::Serialize;

use super::errors::{ExecutorError, ExecutorResult};
use super::executor::LogStreamExecutor;
use super::state::ExecutorState;
use crate::observability::{log_event, Event};
use crate::types::{validate_replica_set, Glsn, Replica};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SealStatus {
    Sealing,
    Sealed,
}

impl LogStreamExecutor {
    /// Seals at `last_committed_glsn`. Returns the resulting status and the
    /// local high watermark.
    pub async fn seal(&self, last_committed_glsn: Glsn) -> ExecutorResult<(SealStatus, Glsn)> {
        let _seal = self.seal_lock.lock().await;
        let shared = &self.shared;
        shared.ensure_open()?;

        let local = shared.context.high_watermark();
        if shared.state.load() == ExecutorState::Sealed {
            return Ok((SealStatus::Sealed, local));
        }

        if shared.state.transition(ExecutorState::Sealing) == ExecutorState::Mutable {
            log_event(
                Event::SealBegin,
                &[
                    ("ls", &shared.config.log_stream_id.to_string()),
                    ("last_committed_glsn", &last_committed_glsn.to_string()),
                ],
            );
        }

        if local > last_committed_glsn {
            return Err(self.seal_violation(local, last_committed_glsn));
        }
        if local < last_committed_glsn {
            return Ok((SealStatus::Sealing, local));
        }

        // No new admissions from here on; wait out the ones already in flight.
        self.writer
            .wait_for_drainage(std::future::pending::<()>())
            .await;
        shared.replicator.drain_queue().await;

        let _commits = self.committer.lock().await;
        let local = shared.context.high_watermark();
        if local != last_committed_glsn {
            return Err(self.seal_violation(local, last_committed_glsn));
        }

        shared.commit_wait.fail_all(&ExecutorError::Sealed);

        let committed_llsn = shared.context.committed_llsn_end().prev();
        let storage = Arc::clone(&shared.storage);
        tokio::task::spawn_blocking(move || {
            let committed_glsn = storage.commit_progress().prev_committed_glsn;
            if storage.write_progress().prev_written_llsn > committed_llsn {
                storage.delete_uncommitted(committed_llsn.next())?;
            }
            storage.restore_storage(committed_llsn, committed_llsn, committed_glsn)
        })
        .await??;

        shared.context.reset_next_llsn(committed_llsn.next());
        shared.state.transition(ExecutorState::Sealed);
        shared.metrics.increment_seals();

        log_event(
            Event::SealComplete,
            &[
                ("ls", &shared.config.log_stream_id.to_string()),
                ("hwm", &local.to_string()),
                ("committed_llsn", &committed_llsn.to_string()),
            ],
        );
        Ok((SealStatus::Sealed, local))
    }

    /// Reopens a Sealed replica for writes with a new replica set. The first
    /// replica is the primary.
    pub async fn unseal(&self, replicas: Vec<Replica>) -> ExecutorResult<()> {
        let _seal = self.seal_lock.lock().await;
        let shared = &self.shared;
        shared.ensure_open()?;

        validate_replica_set(
            &replicas,
            shared.config.storage_node_id,
            shared.config.log_stream_id,
        )
        .map_err(ExecutorError::Invalid)?;

        let state = shared.state.load();
        if state != ExecutorState::Sealed {
            return Err(ExecutorError::invalid(format!(
                "unseal requires a sealed replica, state is {}",
                state
            )));
        }

        let primary = replicas[0].storage_node_id;
        *shared
            .replicas
            .write()
            .unwrap_or_else(PoisonError::into_inner) = replicas;

        if !shared
            .state
            .compare_and_transition(ExecutorState::Sealed, ExecutorState::Mutable)
        {
            return Err(ExecutorError::invalid("replica left the sealed state during unseal"));
        }
        shared.metrics.increment_unseals();

        log_event(
            Event::Unseal,
            &[
                ("ls", &shared.config.log_stream_id.to_string()),
                ("primary", &primary.to_string()),
            ],
        );
        Ok(())
    }

    fn seal_violation(&self, local: Glsn, last_committed_glsn: Glsn) -> ExecutorError {
        let err = ExecutorError::protocol_violation(format!(
            "local high watermark {} is past last committed glsn {}",
            local, last_committed_glsn
        ));
        log_event(
            Event::ProtocolViolation,
            &[
                ("ls", &self.shared.config.log_stream_id.to_string()),
                ("hwm", &local.to_string()),
                ("last_committed_glsn", &last_committed_glsn.to_string()),
            ],
        );
        err
    }
}
