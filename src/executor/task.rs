//! Append task records
//!
//! A primary task gets its LLSNs from the dispatcher and resolves once the
//! entries are committed. A backup task carries the LLSN the primary assigned
//! and resolves once the entries are durable locally.
//!
//! Tasks come from the executor's pool and go back to it once the dispatcher
//! is done with their batch. Reset drops the in-flight slot and any unsent
//! completion.

use tokio::sync::oneshot;

use super::errors::{ExecutorError, ExecutorResult};
use super::pool::Reset;
use super::writer::InflightGuard;
use crate::types::{Glsn, LogPosition, Llsn};

pub(crate) type Completion = oneshot::Sender<ExecutorResult<Vec<LogPosition>>>;
pub(crate) type CompletionReceiver = oneshot::Receiver<ExecutorResult<Vec<LogPosition>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum TaskRole {
    #[default]
    Primary,
    Backup { begin_llsn: Llsn },
}

#[derive(Default)]
pub(crate) struct AppendTask {
    pub role: TaskRole,
    /// Drained into the batch frame by the dispatcher
    pub payloads: Vec<Vec<u8>>,
    /// Payload count; payloads are moved out once the batch is built
    pub num_entries: u64,
    /// First LLSN, set by the dispatcher
    pub begin_llsn: Llsn,
    completion: Option<Completion>,
    inflight: Option<InflightGuard>,
}

impl Reset for AppendTask {
    fn reset(&mut self) {
        self.role = TaskRole::Primary;
        self.payloads.clear();
        self.num_entries = 0;
        self.begin_llsn = Llsn::INVALID;
        self.completion = None;
        self.inflight = None;
    }
}

impl AppendTask {
    /// Fills a cleared task for a new request.
    pub fn prepare(&mut self, role: TaskRole, payloads: Vec<Vec<u8>>) -> CompletionReceiver {
        let (tx, rx) = oneshot::channel();
        self.role = role;
        self.num_entries = payloads.len() as u64;
        self.payloads.extend(payloads);
        self.completion = Some(tx);
        rx
    }

    pub fn validate(&self) -> ExecutorResult<()> {
        if self.payloads.is_empty() {
            return Err(ExecutorError::invalid("append task has no payloads"));
        }
        if let TaskRole::Backup { begin_llsn } = self.role {
            if begin_llsn.is_invalid() {
                return Err(ExecutorError::invalid("backup task has no llsn"));
            }
        }
        Ok(())
    }

    pub fn is_primary(&self) -> bool {
        self.role == TaskRole::Primary
    }

    pub fn set_inflight(&mut self, guard: InflightGuard) {
        self.inflight = Some(guard);
    }

    /// Exclusive end of the task's LLSN range.
    pub fn end_llsn(&self) -> Llsn {
        self.begin_llsn.add(self.num_entries)
    }

    pub fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }

    /// Resolves the caller with uncommitted positions.
    pub fn complete_written(&mut self) {
        let positions = (0..self.num_entries)
            .map(|i| LogPosition {
                llsn: self.begin_llsn.add(i),
                glsn: Glsn::INVALID,
            })
            .collect();
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(Ok(positions));
        }
    }

    pub fn fail(&mut self, err: ExecutorError) {
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(Err(err));
        }
    }
}
