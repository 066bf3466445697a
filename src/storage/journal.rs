//! Append-only checksummed journal
//!
//! A journal is one file of frames (see `record`). Appends go to the end and
//! are synced when `sync_writes` is set; nothing is ever rewritten in place.
//! A failed append is cut back off the file so the next frame lands where the
//! in-memory length says it does. If that cut fails the journal is poisoned.
//!
//! Replay reads every frame in order. A final frame that is cut short or fails
//! its checksum is a torn write: it is truncated away and logged. A bad frame
//! with more data after it is corruption.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{StorageError, StorageResult};
use super::record::{decode_frame, frame_length, JournalRecord, MIN_FRAME_SIZE};
use crate::observability::{log_event, Event};

/// A decoded record with the byte offset of its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedRecord {
    pub offset: u64,
    pub record: JournalRecord,
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    name: &'static str,
    /// Append handle
    file: File,
    /// Separate handle for positioned reads
    reader: File,
    len: u64,
    sync_writes: bool,
    poisoned: bool,
}

impl Journal {
    /// Opens or creates the journal at `path` and replays it.
    pub fn open(
        path: &Path,
        name: &'static str,
        sync_writes: bool,
    ) -> StorageResult<(Self, Vec<ReplayedRecord>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StorageError::io(format!("failed to open {}", path.display()), e))?;

        let (records, valid_len, file_len) = Self::replay(path, name)?;

        if valid_len < file_len {
            file.set_len(valid_len).map_err(|e| {
                StorageError::io(format!("failed to truncate torn tail of {}", name), e)
            })?;
            file.sync_all()
                .map_err(|e| StorageError::io(format!("failed to sync {}", name), e))?;
            log_event(
                Event::JournalTornTail,
                &[
                    ("journal", name),
                    ("valid_len", &valid_len.to_string()),
                    ("file_len", &file_len.to_string()),
                ],
            );
        }

        let reader = File::open(path)
            .map_err(|e| StorageError::io(format!("failed to open {}", path.display()), e))?;

        Ok((
            Self {
                path: path.to_path_buf(),
                name,
                file,
                reader,
                len: valid_len,
                sync_writes,
                poisoned: false,
            },
            records,
        ))
    }

    /// Reads every frame. Returns the records, the length of the valid prefix
    /// and the file length.
    fn replay(path: &Path, name: &'static str) -> StorageResult<(Vec<ReplayedRecord>, u64, u64)> {
        let file = File::open(path)
            .map_err(|e| StorageError::io(format!("failed to open {}", path.display()), e))?;
        let file_len = file
            .metadata()
            .map_err(|e| StorageError::io(format!("failed to stat {}", name), e))?
            .len();

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut offset = 0u64;

        while offset < file_len {
            let remaining = file_len - offset;
            if remaining < 4 {
                break;
            }

            let mut header = [0u8; 4];
            reader
                .read_exact(&mut header)
                .map_err(|e| StorageError::io(format!("failed to read {}", name), e))?;
            let len = frame_length(&header);

            if len < MIN_FRAME_SIZE {
                // A zeroed or garbled length on the last bytes of the file is a torn write.
                if remaining < MIN_FRAME_SIZE as u64 {
                    break;
                }
                return Err(Self::corruption(
                    name,
                    offset,
                    format!("invalid frame length {}", len),
                ));
            }
            if len as u64 > remaining {
                break;
            }

            let mut frame = vec![0u8; len];
            frame[..4].copy_from_slice(&header);
            reader
                .read_exact(&mut frame[4..])
                .map_err(|e| StorageError::io(format!("failed to read {}", name), e))?;

            match decode_frame(&frame) {
                Ok(record) => records.push(ReplayedRecord { offset, record }),
                Err(_) if offset + len as u64 == file_len => break,
                Err(e) => return Err(Self::corruption(name, offset, e)),
            }
            offset += len as u64;
        }

        Ok((records, offset, file_len))
    }

    fn corruption(name: &str, offset: u64, reason: impl std::fmt::Display) -> StorageError {
        let err = StorageError::corrupt_at_offset(name, offset, reason);
        log_event(
            Event::JournalCorruption,
            &[("journal", name), ("error", &err.to_string())],
        );
        err
    }

    /// Appends one frame and returns its offset.
    pub fn append(&mut self, frame: &[u8]) -> StorageResult<u64> {
        if self.poisoned {
            return Err(StorageError::Poisoned(self.name));
        }
        let offset = self.len;
        if let Err(err) = self.write_frame(frame) {
            self.roll_back(&err);
            return Err(err);
        }
        self.len += frame.len() as u64;
        Ok(offset)
    }

    fn write_frame(&mut self, frame: &[u8]) -> StorageResult<()> {
        self.file
            .write_all(frame)
            .map_err(|e| StorageError::io(format!("failed to append to {}", self.name), e))?;
        if self.sync_writes {
            self.file
                .sync_data()
                .map_err(|e| StorageError::io(format!("failed to sync {}", self.name), e))?;
        }
        Ok(())
    }

    /// Cuts the file back to the end of the last complete frame.
    fn roll_back(&mut self, cause: &StorageError) {
        let len = self.len;
        let sync_writes = self.sync_writes;
        let cut = self.file.set_len(len).and_then(|()| {
            if sync_writes {
                self.file.sync_all()
            } else {
                Ok(())
            }
        });

        match cut {
            Ok(()) => log_event(
                Event::JournalRollback,
                &[
                    ("journal", self.name),
                    ("len", &len.to_string()),
                    ("error", &cause.to_string()),
                ],
            ),
            Err(e) => {
                self.poisoned = true;
                log_event(
                    Event::JournalPoisoned,
                    &[
                        ("journal", self.name),
                        ("len", &len.to_string()),
                        ("error", &cause.to_string()),
                        ("rollback_error", &e.to_string()),
                    ],
                );
            }
        }
    }

    /// Reads `len` bytes at `offset`.
    pub fn read_at(&mut self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        if offset + len as u64 > self.len {
            return Err(StorageError::corrupt_at_offset(
                self.name,
                offset,
                format!("read of {} bytes past end of journal", len),
            ));
        }
        let mut buf = vec![0u8; len];
        self.reader
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.reader.read_exact(&mut buf))
            .map_err(|e| StorageError::io(format!("failed to read {}", self.name), e))?;
        Ok(buf)
    }

    pub fn sync(&self) -> StorageResult<()> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::io(format!("failed to sync {}", self.name), e))
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::{encode_trim_data, encode_truncate_data};
    use crate::types::Llsn;
    use tempfile::TempDir;

    fn journal_path(dir: &TempDir) -> PathBuf {
        dir.path().join("data.log")
    }

    #[test]
    fn test_append_then_replay() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);

        {
            let (mut journal, records) = Journal::open(&path, "data.log", true).unwrap();
            assert!(records.is_empty());
            assert_eq!(journal.append(&encode_truncate_data(Llsn(3))).unwrap(), 0);
            journal.append(&encode_trim_data(Llsn(2))).unwrap();
        }

        let (journal, records) = Journal::open(&path, "data.log", true).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].record,
            JournalRecord::TruncateData { from: Llsn(3) }
        );
        assert_eq!(records[1].offset, encode_truncate_data(Llsn(3)).len() as u64);
        assert_eq!(journal.len(), fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let first = encode_truncate_data(Llsn(3));

        {
            let (mut journal, _) = Journal::open(&path, "data.log", true).unwrap();
            journal.append(&first).unwrap();
        }

        // Half of a second frame
        let second = encode_trim_data(Llsn(2));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&second[..second.len() / 2]).unwrap();
        drop(file);

        let (journal, records) = Journal::open(&path, "data.log", true).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(journal.len(), first.len() as u64);
        assert_eq!(fs::metadata(&path).unwrap().len(), first.len() as u64);
    }

    #[test]
    fn test_mid_file_damage_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);

        {
            let (mut journal, _) = Journal::open(&path, "data.log", true).unwrap();
            journal.append(&encode_truncate_data(Llsn(3))).unwrap();
            journal.append(&encode_trim_data(Llsn(2))).unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        bytes[6] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = Journal::open(&path, "data.log", true).err().unwrap();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[test]
    fn test_read_at_bounds() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let (mut journal, _) = Journal::open(&path, "data.log", false).unwrap();
        let frame = encode_truncate_data(Llsn(9));
        journal.append(&frame).unwrap();

        assert_eq!(journal.read_at(0, frame.len()).unwrap(), frame);
        assert!(journal.read_at(1, frame.len()).is_err());
    }

    // =========================================================================
    // Failed appends
    // =========================================================================

    #[test]
    fn test_rollback_cuts_partial_frame() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let first = encode_truncate_data(Llsn(3));
        let second = encode_trim_data(Llsn(2));

        {
            let (mut journal, _) = Journal::open(&path, "data.log", true).unwrap();
            journal.append(&first).unwrap();

            // Bytes a failed write left behind
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&second[..second.len() / 2]).unwrap();
            drop(file);

            journal.roll_back(&StorageError::invalid("short write"));
            assert_eq!(fs::metadata(&path).unwrap().len(), first.len() as u64);

            let offset = journal.append(&second).unwrap();
            assert_eq!(offset, first.len() as u64);
            assert_eq!(journal.read_at(offset, second.len()).unwrap(), second);
        }

        let (journal, records) = Journal::open(&path, "data.log", true).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].record, JournalRecord::TrimData { below: Llsn(2) });
        assert_eq!(journal.len(), (first.len() + second.len()) as u64);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unrecoverable_append_poisons_journal() {
        let path = Path::new("/dev/full");
        if OpenOptions::new().append(true).open(path).is_err() {
            return;
        }

        // Writes fail with ENOSPC and a character device cannot be truncated
        let (mut journal, records) = Journal::open(path, "full.log", false).unwrap();
        assert!(records.is_empty());

        let frame = encode_truncate_data(Llsn(1));
        assert!(matches!(
            journal.append(&frame),
            Err(StorageError::Io { .. })
        ));
        assert!(matches!(
            journal.append(&frame),
            Err(StorageError::Poisoned("full.log"))
        ));
        assert_eq!(journal.len(), 0);
    }
}
