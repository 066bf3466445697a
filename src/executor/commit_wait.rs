//! Commit-wait stage
//!
//! Primary tasks wait here, in LLSN order, from the moment their entries are
//! durable until a commit context assigns them GLSNs. A commit that lands
//! between the storage write and the hand-off is remembered briefly so the
//! late task still resolves.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::errors::ExecutorError;
use super::pool::{Pool, Reset};
use super::task::Completion;
use crate::types::{CommitContext, Glsn, LogPosition, Llsn};

/// Commit contexts kept for tasks handed off after their commit applied
const RECENT_CONTEXTS: usize = 64;

#[derive(Default)]
pub(crate) struct CommitWaitTask {
    begin_llsn: Llsn,
    positions: Vec<LogPosition>,
    committed: usize,
    completion: Option<Completion>,
}

impl Reset for CommitWaitTask {
    fn reset(&mut self) {
        self.begin_llsn = Llsn::INVALID;
        self.positions.clear();
        self.committed = 0;
        self.completion = None;
    }
}

impl CommitWaitTask {
    fn end_llsn(&self) -> Llsn {
        self.begin_llsn.add(self.positions.len() as u64)
    }

    fn is_committed(&self) -> bool {
        self.committed == self.positions.len()
    }

    /// Fills in GLSNs for the entries `cc` covers.
    fn apply(&mut self, cc: &CommitContext) {
        if cc.is_empty() {
            return;
        }
        let cc_begin = cc.committed_llsn_begin;
        let cc_end = cc_begin.add(cc.num_entries());
        if cc_end <= self.begin_llsn || cc_begin >= self.end_llsn() {
            return;
        }

        for position in self.positions.iter_mut() {
            if position.glsn.is_invalid() && position.llsn >= cc_begin && position.llsn < cc_end {
                position.glsn = Glsn(cc.committed_glsn_begin.0 + (position.llsn.0 - cc_begin.0));
                self.committed += 1;
            }
        }
    }

    fn resolve(&mut self) {
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(Ok(self.positions.drain(..).collect()));
        }
    }

    fn fail(&mut self, err: ExecutorError) {
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(Err(err));
        }
    }
}

#[derive(Default)]
struct Queue {
    waiting: VecDeque<CommitWaitTask>,
    recent: VecDeque<CommitContext>,
}

pub(crate) struct CommitWaitQueue {
    queue: Mutex<Queue>,
    pool: Pool<CommitWaitTask>,
}

impl CommitWaitQueue {
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            pool: Pool::new(pool_capacity),
        }
    }

    /// Hands off `count` durable entries starting at `begin_llsn`.
    pub fn push(&self, begin_llsn: Llsn, count: u64, completion: Completion) {
        let mut task = self.pool.get();
        task.begin_llsn = begin_llsn;
        task.positions.extend((0..count).map(|i| LogPosition {
            llsn: begin_llsn.add(i),
            glsn: Glsn::INVALID,
        }));
        task.completion = Some(completion);

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        for cc in queue.recent.iter() {
            task.apply(cc);
        }
        if task.is_committed() {
            task.resolve();
            drop(queue);
            self.pool.put(task);
        } else {
            queue.waiting.push_back(task);
        }
    }

    /// Resolves every waiting task `cc` completes.
    pub fn resolve(&self, cc: &CommitContext) {
        if cc.is_empty() {
            return;
        }
        let mut resolved = Vec::new();
        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            for task in queue.waiting.iter_mut() {
                task.apply(cc);
            }
            while queue.waiting.front().is_some_and(|task| task.is_committed()) {
                if let Some(mut task) = queue.waiting.pop_front() {
                    task.resolve();
                    resolved.push(task);
                }
            }

            if queue.recent.len() == RECENT_CONTEXTS {
                queue.recent.pop_front();
            }
            queue.recent.push_back(*cc);
        }
        for task in resolved {
            self.pool.put(task);
        }
    }

    /// Fails tasks whose range starts at or after `llsn`.
    pub fn fail_from(&self, llsn: Llsn, err: &ExecutorError) {
        let mut failed = Vec::new();
        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            while queue.waiting.back().is_some_and(|task| task.begin_llsn >= llsn) {
                if let Some(task) = queue.waiting.pop_back() {
                    failed.push(task);
                }
            }
        }
        for mut task in failed {
            task.fail(err.clone());
            self.pool.put(task);
        }
    }

    /// Fails every waiting task and forgets remembered contexts.
    pub fn fail_all(&self, err: &ExecutorError) {
        let failed: Vec<_> = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.recent.clear();
            queue.waiting.drain(..).collect()
        };
        for mut task in failed {
            task.fail(err.clone());
            self.pool.put(task);
        }
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiting
            .len()
    }
}
