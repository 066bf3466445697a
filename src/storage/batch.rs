//! Write and commit batches
//!
//! A batch snapshots its cursor when created and is rejected with
//! `InconsistentBatch` at apply time if the cursor moved in between. Each
//! applied batch is one journal frame, so it is durable as a whole or not at
//! all, and the in-memory state changes only after the append succeeded.

use super::engine::{lock, PayloadLocation, Storage};
use super::errors::{StorageError, StorageResult};
use super::progress::{CommitProgress, WriteProgress};
use super::record::{encode_commit, WriteFrameBuilder};
use crate::types::{CommitContext, Glsn, Llsn};

/// Payloads for contiguous LLSNs following the write cursor. Payloads are
/// encoded into the journal frame as they are added.
pub struct WriteBatch<'a> {
    storage: &'a Storage,
    snapshot: WriteProgress,
    frame: WriteFrameBuilder,
}

impl<'a> WriteBatch<'a> {
    pub(super) fn new(storage: &'a Storage, snapshot: WriteProgress) -> Self {
        Self {
            storage,
            snapshot,
            frame: WriteFrameBuilder::new(snapshot.prev_written_llsn.next()),
        }
    }

    /// Next LLSN this batch accepts.
    pub fn next_llsn(&self) -> Llsn {
        self.snapshot
            .prev_written_llsn
            .add(self.frame.len() as u64 + 1)
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Adds the payload for `llsn`, which must be exactly `next_llsn()`.
    pub fn put(&mut self, llsn: Llsn, data: impl AsRef<[u8]>) -> StorageResult<()> {
        let expected = self.next_llsn();
        if llsn != expected {
            return Err(StorageError::invalid(format!(
                "write batch expects llsn {}, got {}",
                expected, llsn
            )));
        }
        self.frame.push(data.as_ref());
        Ok(())
    }

    /// Persists every payload and advances the write cursor.
    pub fn apply(self) -> StorageResult<()> {
        self.storage.ensure_open()?;
        if self.frame.is_empty() {
            return Ok(());
        }

        let mut progress = lock(&self.storage.write_progress);
        if *progress != self.snapshot {
            return Err(StorageError::inconsistent(format!(
                "write cursor moved from {} to {}",
                self.snapshot.prev_written_llsn, progress.prev_written_llsn
            )));
        }

        let first_llsn = self.snapshot.prev_written_llsn.next();
        let last_llsn = first_llsn.add(self.frame.len() as u64 - 1);
        let (frame, spans) = self.frame.finish();

        let mut data = lock(&self.storage.data);
        let offset = data.journal.append(&frame)?;
        for (i, span) in spans.iter().enumerate() {
            data.index.insert(
                first_llsn.add(i as u64),
                PayloadLocation {
                    offset: offset + span.offset as u64,
                    len: span.len,
                    checksum: span.checksum,
                },
            );
        }
        data.last_llsn = last_llsn;
        progress.prev_written_llsn = last_llsn;
        Ok(())
    }
}

/// GLSN -> LLSN mappings for one commit context.
pub struct CommitBatch<'a> {
    storage: &'a Storage,
    snapshot: CommitProgress,
    context: CommitContext,
    entries: Vec<(Glsn, Llsn)>,
}

impl<'a> CommitBatch<'a> {
    pub(super) fn new(
        storage: &'a Storage,
        context: CommitContext,
        snapshot: CommitProgress,
    ) -> StorageResult<Self> {
        if context.committed_glsn_begin > context.committed_glsn_end {
            return Err(StorageError::invalid(format!(
                "commit range [{}, {}) is reversed",
                context.committed_glsn_begin, context.committed_glsn_end
            )));
        }
        if context.committed_glsn_begin <= snapshot.prev_committed_glsn {
            return Err(StorageError::inconsistent(format!(
                "commit range begins at {} but glsn {} is already committed",
                context.committed_glsn_begin, snapshot.prev_committed_glsn
            )));
        }
        if context.high_watermark < snapshot.high_watermark {
            return Err(StorageError::inconsistent(format!(
                "high watermark {} is behind {}",
                context.high_watermark, snapshot.high_watermark
            )));
        }
        if context.high_watermark < context.last_glsn() {
            return Err(StorageError::invalid(format!(
                "high watermark {} is below last committed glsn {}",
                context.high_watermark,
                context.last_glsn()
            )));
        }

        Ok(Self {
            storage,
            snapshot,
            context,
            entries: Vec::with_capacity(context.num_entries() as usize),
        })
    }

    pub fn context(&self) -> &CommitContext {
        &self.context
    }

    /// Records one mapping. Mappings must be contiguous in both sequences and
    /// stay inside the context's GLSN range.
    pub fn set(&mut self, glsn: Glsn, llsn: Llsn) -> StorageResult<()> {
        let (expected_glsn, expected_llsn) = match self.entries.last() {
            Some((g, l)) => (g.next(), Some(l.next())),
            None => (self.context.committed_glsn_begin, None),
        };

        if glsn != expected_glsn || glsn >= self.context.committed_glsn_end {
            return Err(StorageError::invalid(format!(
                "commit batch expects glsn {} below {}, got {}",
                expected_glsn, self.context.committed_glsn_end, glsn
            )));
        }
        if llsn.is_invalid() || expected_llsn.is_some_and(|expected| expected != llsn) {
            return Err(StorageError::invalid(format!(
                "commit batch llsn {} is not contiguous",
                llsn
            )));
        }

        self.entries.push((glsn, llsn));
        Ok(())
    }

    /// Persists the context with its mappings and advances the commit cursor.
    /// The watermark checks made at construction hold as long as the cursor
    /// still matches the snapshot.
    pub fn apply(self) -> StorageResult<()> {
        self.storage.ensure_open()?;

        let reached = self
            .entries
            .last()
            .map(|(glsn, _)| *glsn)
            .unwrap_or(Glsn::INVALID);
        if !self.context.is_empty() && reached != self.context.last_glsn() {
            return Err(StorageError::IncompleteBatch {
                expected: self.context.last_glsn(),
                reached,
            });
        }

        let mut progress = lock(&self.storage.commit_progress);
        if *progress != self.snapshot {
            return Err(StorageError::inconsistent(format!(
                "commit cursor moved from glsn {} to {}",
                self.snapshot.prev_committed_glsn, progress.prev_committed_glsn
            )));
        }

        if let (Some((_, first_llsn)), Some((last_glsn, last_llsn))) =
            (self.entries.first(), self.entries.last())
        {
            if *first_llsn != progress.prev_committed_llsn.next() {
                return Err(StorageError::inconsistent(format!(
                    "commit starts at llsn {}, expected {}",
                    first_llsn,
                    progress.prev_committed_llsn.next()
                )));
            }
            if !self.context.committed_llsn_begin.is_invalid()
                && self.context.committed_llsn_begin != *first_llsn
            {
                return Err(StorageError::inconsistent(format!(
                    "commit context names llsn {} but batch starts at {}",
                    self.context.committed_llsn_begin, first_llsn
                )));
            }
            let written = lock(&self.storage.write_progress).prev_written_llsn;
            if *last_llsn > written {
                return Err(StorageError::inconsistent(format!(
                    "commit covers llsn {} but only {} is written",
                    last_llsn, written
                )));
            }

            let mut commit = lock(&self.storage.commit);
            commit.journal.append(&encode_commit(&self.context, &self.entries))?;
            commit.index.extend(self.entries.iter().copied());
            commit.last_context = Some(self.context);
            commit.last_non_empty_context = Some(self.context);

            progress.prev_committed_llsn = *last_llsn;
            progress.prev_committed_glsn = *last_glsn;
        } else {
            let mut commit = lock(&self.storage.commit);
            commit.journal.append(&encode_commit(&self.context, &[]))?;
            commit.last_context = Some(self.context);
        }

        progress.high_watermark = self.context.high_watermark;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Storage {
        Storage::open(StorageConfig::new(dir.path()).with_sync_writes(false)).unwrap()
    }

    fn context(glsn_begin: u64, glsn_end: u64, llsn_begin: u64) -> CommitContext {
        CommitContext {
            version: 1,
            high_watermark: Glsn(glsn_end.saturating_sub(1)),
            prev_high_watermark: Glsn::INVALID,
            committed_glsn_begin: Glsn(glsn_begin),
            committed_glsn_end: Glsn(glsn_end),
            committed_llsn_begin: Llsn(llsn_begin),
        }
    }

    fn write_n(storage: &Storage, n: u64) {
        let mut batch = storage.new_write_batch().unwrap();
        let first = batch.next_llsn();
        for i in 0..n {
            batch.put(first.add(i), vec![i as u8]).unwrap();
        }
        batch.apply().unwrap();
    }

    #[test]
    fn test_put_requires_contiguous_llsn() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let mut batch = storage.new_write_batch().unwrap();

        assert!(matches!(
            batch.put(Llsn(2), vec![]),
            Err(StorageError::Invalid(_))
        ));
        batch.put(Llsn(1), vec![1]).unwrap();
        assert!(matches!(
            batch.put(Llsn(1), vec![1]),
            Err(StorageError::Invalid(_))
        ));
        batch.put(Llsn(2), vec![2]).unwrap();
        batch.apply().unwrap();

        assert_eq!(storage.write_progress().prev_written_llsn, Llsn(2));
    }

    #[test]
    fn test_concurrent_write_batches_conflict() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);

        let mut first = storage.new_write_batch().unwrap();
        let mut second = storage.new_write_batch().unwrap();
        first.put(Llsn(1), b"a".to_vec()).unwrap();
        second.put(Llsn(1), b"b".to_vec()).unwrap();

        first.apply().unwrap();
        assert!(matches!(
            second.apply(),
            Err(StorageError::InconsistentBatch(_))
        ));
        assert_eq!(storage.read_payload(Llsn(1)).unwrap().unwrap(), b"a");
    }

    #[test]
    fn test_commit_batch_rejects_reversed_range() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        assert!(matches!(
            storage.new_commit_batch(context(5, 4, 1)),
            Err(StorageError::Invalid(_))
        ));
    }

    #[test]
    fn test_commit_batch_rejects_covered_begin() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_n(&storage, 4);

        let mut batch = storage.new_commit_batch(context(10, 12, 1)).unwrap();
        batch.set(Glsn(10), Llsn(1)).unwrap();
        batch.set(Glsn(11), Llsn(2)).unwrap();
        batch.apply().unwrap();

        assert!(matches!(
            storage.new_commit_batch(context(11, 13, 3)),
            Err(StorageError::InconsistentBatch(_))
        ));
    }

    #[test]
    fn test_incomplete_commit_batch() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_n(&storage, 3);

        let mut batch = storage.new_commit_batch(context(1, 4, 1)).unwrap();
        batch.set(Glsn(1), Llsn(1)).unwrap();
        batch.set(Glsn(2), Llsn(2)).unwrap();
        match batch.apply() {
            Err(StorageError::IncompleteBatch { expected, reached }) => {
                assert_eq!(expected, Glsn(3));
                assert_eq!(reached, Glsn(2));
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert_eq!(storage.commit_progress(), CommitProgress::default());
    }

    #[test]
    fn test_commit_must_follow_committed_llsn() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_n(&storage, 4);

        let mut batch = storage.new_commit_batch(context(1, 3, 2)).unwrap();
        batch.set(Glsn(1), Llsn(2)).unwrap();
        batch.set(Glsn(2), Llsn(3)).unwrap();
        assert!(matches!(
            batch.apply(),
            Err(StorageError::InconsistentBatch(_))
        ));
    }

    #[test]
    fn test_commit_cannot_cover_unwritten() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_n(&storage, 1);

        let mut batch = storage.new_commit_batch(context(1, 3, 1)).unwrap();
        batch.set(Glsn(1), Llsn(1)).unwrap();
        batch.set(Glsn(2), Llsn(2)).unwrap();
        assert!(matches!(
            batch.apply(),
            Err(StorageError::InconsistentBatch(_))
        ));
    }

    #[test]
    fn test_set_outside_range_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let mut batch = storage.new_commit_batch(context(1, 2, 1)).unwrap();

        assert!(batch.set(Glsn(2), Llsn(1)).is_err());
        batch.set(Glsn(1), Llsn(1)).unwrap();
        assert!(batch.set(Glsn(2), Llsn(2)).is_err());
    }

    #[test]
    fn test_concurrent_commit_batches_conflict() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_n(&storage, 2);

        let mut first = storage.new_commit_batch(context(1, 2, 1)).unwrap();
        let mut second = storage.new_commit_batch(context(1, 2, 1)).unwrap();
        first.set(Glsn(1), Llsn(1)).unwrap();
        second.set(Glsn(1), Llsn(1)).unwrap();

        first.apply().unwrap();
        assert!(matches!(
            second.apply(),
            Err(StorageError::InconsistentBatch(_))
        ));
    }

    #[test]
    fn test_empty_context_only_moves_watermark() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_n(&storage, 1);

        let mut batch = storage.new_commit_batch(context(1, 2, 1)).unwrap();
        batch.set(Glsn(1), Llsn(1)).unwrap();
        batch.apply().unwrap();

        let empty = CommitContext {
            high_watermark: Glsn(9),
            ..context(2, 2, 2)
        };
        storage.new_commit_batch(empty).unwrap().apply().unwrap();

        let progress = storage.commit_progress();
        assert_eq!(progress.prev_committed_glsn, Glsn(1));
        assert_eq!(progress.prev_committed_llsn, Llsn(1));
        assert_eq!(progress.high_watermark, Glsn(9));
    }

    #[test]
    fn test_stale_empty_context_rejected() {
        let dir = TempDir::new().unwrap();
        {
            let storage = open(&dir);
            write_n(&storage, 3);

            let mut batch = storage.new_commit_batch(context(1, 4, 1)).unwrap();
            for i in 1..=3 {
                batch.set(Glsn(i), Llsn(i)).unwrap();
            }
            batch.apply().unwrap();

            let stale = CommitContext {
                version: 2,
                high_watermark: Glsn(1),
                ..context(1, 1, 4)
            };
            assert!(matches!(
                storage.new_commit_batch(stale),
                Err(StorageError::InconsistentBatch(_))
            ));
            assert_eq!(storage.commit_progress().high_watermark, Glsn(3));
        }

        let progress = open(&dir).commit_progress();
        assert_eq!(progress.high_watermark, Glsn(3));
        assert_eq!(progress.prev_committed_glsn, Glsn(3));
    }

    #[test]
    fn test_high_watermark_never_regresses() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_n(&storage, 1);

        let mut batch = storage.new_commit_batch(CommitContext {
            high_watermark: Glsn(5),
            ..context(1, 2, 1)
        })
        .unwrap();
        batch.set(Glsn(1), Llsn(1)).unwrap();
        batch.apply().unwrap();

        let behind = CommitContext {
            high_watermark: Glsn(4),
            ..context(6, 6, 2)
        };
        assert!(matches!(
            storage.new_commit_batch(behind),
            Err(StorageError::InconsistentBatch(_))
        ));

        let same = CommitContext {
            high_watermark: Glsn(5),
            ..context(6, 6, 2)
        };
        storage.new_commit_batch(same).unwrap().apply().unwrap();
        assert_eq!(storage.commit_progress().high_watermark, Glsn(5));
    }

    #[test]
    fn test_high_watermark_must_cover_range() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_n(&storage, 3);

        let short = CommitContext {
            high_watermark: Glsn(2),
            ..context(1, 4, 1)
        };
        assert!(matches!(
            storage.new_commit_batch(short),
            Err(StorageError::Invalid(_))
        ));
    }

    #[test]
    fn test_commit_may_skip_glsns() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_n(&storage, 2);

        let mut batch = storage.new_commit_batch(context(1, 2, 1)).unwrap();
        batch.set(Glsn(1), Llsn(1)).unwrap();
        batch.apply().unwrap();

        // GLSN 2 went to another log stream
        let mut batch = storage.new_commit_batch(context(3, 4, 2)).unwrap();
        batch.set(Glsn(3), Llsn(2)).unwrap();
        batch.apply().unwrap();

        let progress = storage.commit_progress();
        assert_eq!(progress.prev_committed_glsn, Glsn(3));
        assert_eq!(progress.prev_committed_llsn, Llsn(2));
        assert_eq!(progress.high_watermark, Glsn(3));
    }
}
