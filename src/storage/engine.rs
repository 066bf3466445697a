//! Storage engine: two journaled keyspaces with in-memory indexes
//!
//! - data keyspace (`data.log`): LLSN -> payload
//! - commit keyspace (`commit.log`): GLSN -> LLSN plus the commit contexts
//!
//! Lock order: commit progress, write progress, commit keyspace, data keyspace.
//! A poisoned lock is recovered: every mutation finishes its journal append
//! before touching the index, so the guarded state is never half-updated.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::batch::{CommitBatch, WriteBatch};
use super::checksum::verify_checksum;
use super::config::StorageConfig;
use super::errors::{StorageError, StorageResult};
use super::journal::Journal;
use super::progress::{CommitProgress, WriteProgress};
use super::record::{
    encode_trim_commit, encode_trim_data, encode_truncate_data, JournalRecord,
};
use crate::observability::{log_event, Event};
use crate::types::{CommitContext, Glsn, LogEntry, Llsn};

pub(super) const DATA_JOURNAL: &str = "data.log";
pub(super) const COMMIT_JOURNAL: &str = "commit.log";

/// Where a payload lives in the data journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PayloadLocation {
    pub offset: u64,
    pub len: u32,
    pub checksum: u32,
}

#[derive(Debug)]
pub(super) struct DataKeyspace {
    pub journal: Journal,
    pub index: BTreeMap<Llsn, PayloadLocation>,
    /// Highest LLSN still present, including trimmed-away prefixes
    pub last_llsn: Llsn,
}

#[derive(Debug)]
pub(super) struct CommitKeyspace {
    pub journal: Journal,
    pub index: BTreeMap<Glsn, Llsn>,
    pub last_context: Option<CommitContext>,
    pub last_non_empty_context: Option<CommitContext>,
    /// Everything below this GLSN has been trimmed
    pub trimmed_below: Glsn,
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Durable storage for one log stream replica.
#[derive(Debug)]
pub struct Storage {
    config: StorageConfig,
    pub(super) data: Mutex<DataKeyspace>,
    pub(super) commit: Mutex<CommitKeyspace>,
    pub(super) write_progress: Mutex<WriteProgress>,
    pub(super) commit_progress: Mutex<CommitProgress>,
    closed: AtomicBool,
}

impl Storage {
    /// Opens the keyspaces under `config.data_dir`, replaying both journals.
    ///
    /// Cursors start at the last durable write and the last non-empty commit
    /// context. Cross-keyspace consistency is checked by `read_recovery_info`.
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;

        let data = Self::replay_data(&config)?;
        let commit = Self::replay_commit(&config)?;

        let write_progress = WriteProgress {
            prev_written_llsn: data.last_llsn,
        };
        let commit_progress = match (commit.last_non_empty_context, commit.last_context) {
            (Some(non_empty), last) => CommitProgress {
                prev_committed_llsn: non_empty.last_llsn(),
                prev_committed_glsn: non_empty.last_glsn(),
                high_watermark: last.map(|cc| cc.high_watermark).unwrap_or_default(),
            },
            (None, last) => CommitProgress {
                high_watermark: last.map(|cc| cc.high_watermark).unwrap_or_default(),
                ..CommitProgress::default()
            },
        };

        log_event(
            Event::StorageOpen,
            &[
                ("data_dir", &config.data_dir.display().to_string()),
                ("written_llsn", &write_progress.prev_written_llsn.to_string()),
                (
                    "committed_glsn",
                    &commit_progress.prev_committed_glsn.to_string(),
                ),
            ],
        );

        Ok(Self {
            config,
            data: Mutex::new(data),
            commit: Mutex::new(commit),
            write_progress: Mutex::new(write_progress),
            commit_progress: Mutex::new(commit_progress),
            closed: AtomicBool::new(false),
        })
    }

    fn replay_data(config: &StorageConfig) -> StorageResult<DataKeyspace> {
        let (journal, records) =
            Journal::open(&config.data_log_path(), DATA_JOURNAL, config.sync_writes)?;
        let mut index = BTreeMap::new();
        let mut last_llsn = Llsn::INVALID;

        for replayed in records {
            match replayed.record {
                JournalRecord::Write { first_llsn, spans } => {
                    if first_llsn != last_llsn.next() {
                        return Err(StorageError::corrupt_at_offset(
                            DATA_JOURNAL,
                            replayed.offset,
                            format!(
                                "write batch starts at llsn {}, expected {}",
                                first_llsn,
                                last_llsn.next()
                            ),
                        ));
                    }
                    for (i, span) in spans.iter().enumerate() {
                        index.insert(
                            first_llsn.add(i as u64),
                            PayloadLocation {
                                offset: replayed.offset + span.offset as u64,
                                len: span.len,
                                checksum: span.checksum,
                            },
                        );
                    }
                    last_llsn = first_llsn.add(spans.len() as u64).prev();
                }
                JournalRecord::TruncateData { from } => {
                    index.retain(|llsn, _| *llsn < from);
                    last_llsn = last_llsn.min(from.prev());
                }
                JournalRecord::TrimData { below } => {
                    index = index.split_off(&below);
                }
                other => {
                    return Err(StorageError::corrupt_at_offset(
                        DATA_JOURNAL,
                        replayed.offset,
                        format!("unexpected record in data journal: {:?}", other),
                    ));
                }
            }
        }

        Ok(DataKeyspace {
            journal,
            index,
            last_llsn,
        })
    }

    fn replay_commit(config: &StorageConfig) -> StorageResult<CommitKeyspace> {
        let (journal, records) =
            Journal::open(&config.commit_log_path(), COMMIT_JOURNAL, config.sync_writes)?;
        let mut keyspace = CommitKeyspace {
            journal,
            index: BTreeMap::new(),
            last_context: None,
            last_non_empty_context: None,
            trimmed_below: Glsn::INVALID,
        };

        for replayed in records {
            match replayed.record {
                JournalRecord::Commit { context, entries } => {
                    keyspace.index.extend(entries);
                    keyspace.last_context = Some(context);
                    if !context.is_empty() {
                        keyspace.last_non_empty_context = Some(context);
                    }
                }
                JournalRecord::TrimCommit { below } => {
                    keyspace.index = keyspace.index.split_off(&below);
                    keyspace.trimmed_below = keyspace.trimmed_below.max(below);
                }
                other => {
                    return Err(StorageError::corrupt_at_offset(
                        COMMIT_JOURNAL,
                        replayed.offset,
                        format!("unexpected record in commit journal: {:?}", other),
                    ));
                }
            }
        }

        Ok(keyspace)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub(super) fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn write_progress(&self) -> WriteProgress {
        *lock(&self.write_progress)
    }

    pub fn commit_progress(&self) -> CommitProgress {
        *lock(&self.commit_progress)
    }

    /// Starts a write batch at the current write cursor.
    pub fn new_write_batch(&self) -> StorageResult<WriteBatch<'_>> {
        self.ensure_open()?;
        let snapshot = self.write_progress();
        Ok(WriteBatch::new(self, snapshot))
    }

    /// Starts a commit batch for `cc` at the current commit cursor.
    pub fn new_commit_batch(&self, cc: CommitContext) -> StorageResult<CommitBatch<'_>> {
        self.ensure_open()?;
        CommitBatch::new(self, cc, self.commit_progress())
    }

    /// Reads the committed entry at `glsn`.
    pub fn read(&self, glsn: Glsn) -> StorageResult<LogEntry> {
        self.ensure_open()?;
        let llsn = lock(&self.commit)
            .index
            .get(&glsn)
            .copied()
            .ok_or_else(|| StorageError::NoEntry(format!("glsn {}", glsn)))?;
        self.read_entry(glsn, llsn)
    }

    /// Reads the payload for `llsn` and wraps it as a committed entry.
    pub(super) fn read_entry(&self, glsn: Glsn, llsn: Llsn) -> StorageResult<LogEntry> {
        let data = self.read_payload(llsn)?.ok_or_else(|| {
            StorageError::corrupt(format!(
                "glsn {} maps to llsn {} which has no data",
                glsn, llsn
            ))
        })?;
        Ok(LogEntry { llsn, glsn, data })
    }

    /// Reads the payload stored for `llsn`, committed or not.
    pub(super) fn read_payload(&self, llsn: Llsn) -> StorageResult<Option<Vec<u8>>> {
        let mut data = lock(&self.data);
        let location = match data.index.get(&llsn) {
            Some(location) => *location,
            None => return Ok(None),
        };
        let bytes = data
            .journal
            .read_at(location.offset, location.len as usize)?;
        if !verify_checksum(&bytes, location.checksum) {
            return Err(StorageError::corrupt_at_offset(
                DATA_JOURNAL,
                location.offset,
                format!("payload checksum mismatch for llsn {}", llsn),
            ));
        }
        Ok(Some(bytes))
    }

    /// Forward iterator over committed entries in `[begin, end)`.
    ///
    /// The set of GLSNs is fixed when the scan starts; entries trimmed while
    /// iterating surface as errors.
    pub fn scan(&self, begin: Glsn, end: Glsn) -> StorageResult<Scanner<'_>> {
        self.ensure_open()?;
        let positions = if begin < end {
            lock(&self.commit)
                .index
                .range(begin..end)
                .map(|(glsn, llsn)| (*glsn, *llsn))
                .collect()
        } else {
            Vec::new()
        };
        Ok(Scanner {
            storage: self,
            positions: positions.into_iter(),
        })
    }

    /// Trims committed entries below `prefix_end`.
    pub fn delete_committed(&self, prefix_end: Glsn) -> StorageResult<()> {
        self.ensure_open()?;
        let progress = lock(&self.commit_progress);
        if prefix_end > progress.prev_committed_glsn.next() {
            return Err(StorageError::invalid(format!(
                "trim prefix end {} is past committed glsn {}",
                prefix_end, progress.prev_committed_glsn
            )));
        }

        let mut commit = lock(&self.commit);
        let last_trimmed = match commit.index.range(..prefix_end).next_back() {
            Some((_, llsn)) => *llsn,
            None => return Ok(()),
        };

        // Commit mappings go first so no GLSN ever points at trimmed data.
        commit.journal.append(&encode_trim_commit(prefix_end))?;
        commit.index = commit.index.split_off(&prefix_end);
        commit.trimmed_below = commit.trimmed_below.max(prefix_end);

        let data_below = last_trimmed.next();
        let mut data = lock(&self.data);
        data.journal.append(&encode_trim_data(data_below))?;
        data.index = data.index.split_off(&data_below);

        log_event(
            Event::TrimCommitted,
            &[
                ("below_glsn", &prefix_end.to_string()),
                ("below_llsn", &data_below.to_string()),
            ],
        );
        Ok(())
    }

    /// Discards uncommitted data at and after `suffix_begin`.
    ///
    /// Cursors are left alone; callers follow up with `restore_storage`.
    pub fn delete_uncommitted(&self, suffix_begin: Llsn) -> StorageResult<()> {
        self.ensure_open()?;
        let progress = lock(&self.commit_progress);
        if suffix_begin <= progress.prev_committed_llsn || suffix_begin.is_invalid() {
            return Err(StorageError::invalid(format!(
                "truncate from llsn {} would drop committed llsn {}",
                suffix_begin, progress.prev_committed_llsn
            )));
        }

        let mut data = lock(&self.data);
        if suffix_begin > data.last_llsn {
            return Ok(());
        }

        data.journal.append(&encode_truncate_data(suffix_begin))?;
        data.index.retain(|llsn, _| *llsn < suffix_begin);
        data.last_llsn = data.last_llsn.min(suffix_begin.prev());

        log_event(
            Event::TruncateUncommitted,
            &[("from_llsn", &suffix_begin.to_string())],
        );
        Ok(())
    }

    /// Resets the live cursors.
    pub fn restore_storage(
        &self,
        last_written_llsn: Llsn,
        last_committed_llsn: Llsn,
        last_committed_glsn: Glsn,
    ) -> StorageResult<()> {
        self.ensure_open()?;
        let mut commit_progress = lock(&self.commit_progress);
        let mut write_progress = lock(&self.write_progress);

        write_progress.prev_written_llsn = last_written_llsn;
        commit_progress.prev_committed_llsn = last_committed_llsn;
        commit_progress.prev_committed_glsn = last_committed_glsn;

        log_event(
            Event::StorageRestored,
            &[
                ("written_llsn", &last_written_llsn.to_string()),
                ("committed_llsn", &last_committed_llsn.to_string()),
                ("committed_glsn", &last_committed_glsn.to_string()),
            ],
        );
        Ok(())
    }

    /// Syncs both journals; later calls fail with `Closed`. Idempotent.
    pub fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        lock(&self.commit).journal.sync()?;
        lock(&self.data).journal.sync()?;
        log_event(
            Event::StorageClose,
            &[("data_dir", &self.config.data_dir.display().to_string())],
        );
        Ok(())
    }
}

/// Iterator returned by `Storage::scan`.
pub struct Scanner<'a> {
    storage: &'a Storage,
    positions: std::vec::IntoIter<(Glsn, Llsn)>,
}

impl Iterator for Scanner<'_> {
    type Item = StorageResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let (glsn, llsn) = self.positions.next()?;
        if let Err(e) = self.storage.ensure_open() {
            return Some(Err(e));
        }
        Some(self.storage.read_entry(glsn, llsn))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.positions.size_hint()
    }
}
