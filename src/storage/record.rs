//! Journal record framing and encoding
//!
//! Every journal frame is laid out as:
//! - Frame Length (u32 LE), total length including this field and the checksum
//! - Record Type (u8)
//! - Body (variable)
//! - Checksum (u32 LE) over length, type and body
//!
//! One frame holds one whole batch, so a batch is either fully present after
//! replay or not at all.
//!
//! Bodies by record type:
//! - Write: first_llsn (u64), count (u32), then per payload len (u32), crc (u32), bytes
//! - TruncateData: from_llsn (u64)
//! - TrimData: below_llsn (u64)
//! - Commit: context (6 x u64), count (u32), then per entry glsn (u64), llsn (u64)
//! - TrimCommit: below_glsn (u64)

use std::io;

use super::checksum::{compute_checksum, compute_checksum_parts};
use crate::types::{CommitContext, Glsn, Llsn};

/// Bytes before the body: length + type
pub const FRAME_HEADER_SIZE: usize = 4 + 1;
/// Bytes after the body: checksum
pub const FRAME_TRAILER_SIZE: usize = 4;
/// Smallest legal frame (empty body)
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE;

/// Journal record types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Write = 1,
    TruncateData = 2,
    TrimData = 3,
    Commit = 4,
    TrimCommit = 5,
}

impl RecordType {
    /// Convert from u8, returns None for invalid values
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::Write),
            2 => Some(RecordType::TruncateData),
            3 => Some(RecordType::TrimData),
            4 => Some(RecordType::Commit),
            5 => Some(RecordType::TrimCommit),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Location of one payload inside a Write frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSpan {
    /// Offset of the payload bytes relative to the frame start
    pub offset: u32,
    pub len: u32,
    pub checksum: u32,
}

/// Decoded journal record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// Payloads for contiguous LLSNs starting at `first_llsn`.
    /// Only spans are kept; payload bytes stay on disk.
    Write {
        first_llsn: Llsn,
        spans: Vec<PayloadSpan>,
    },
    /// Data at and after `from` was discarded.
    TruncateData { from: Llsn },
    /// Data below `below` was trimmed.
    TrimData { below: Llsn },
    /// A commit context and the GLSN -> LLSN mappings it binds.
    Commit {
        context: CommitContext,
        entries: Vec<(Glsn, Llsn)>,
    },
    /// Commit mappings below `below` were trimmed.
    TrimCommit { below: Glsn },
}

/// Wraps a body into a checksummed frame.
fn frame(record_type: RecordType, body: &[u8]) -> Vec<u8> {
    let frame_len = (FRAME_HEADER_SIZE + body.len() + FRAME_TRAILER_SIZE) as u32;
    let len_bytes = frame_len.to_le_bytes();
    let type_byte = [record_type.as_u8()];
    let checksum = compute_checksum_parts(&[&len_bytes, &type_byte, body]);

    let mut out = Vec::with_capacity(frame_len as usize);
    out.extend_from_slice(&len_bytes);
    out.extend_from_slice(&type_byte);
    out.extend_from_slice(body);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}

/// Write frame built one payload at a time, directly in its final buffer.
pub struct WriteFrameBuilder {
    buf: Vec<u8>,
    spans: Vec<PayloadSpan>,
}

impl WriteFrameBuilder {
    pub fn new(first_llsn: Llsn) -> Self {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + 12 + FRAME_TRAILER_SIZE);
        buf.extend_from_slice(&[0u8; FRAME_HEADER_SIZE]);
        buf.extend_from_slice(&first_llsn.0.to_le_bytes());
        // Payload count, filled in by `finish`
        buf.extend_from_slice(&0u32.to_le_bytes());
        Self {
            buf,
            spans: Vec::new(),
        }
    }

    pub fn push(&mut self, payload: &[u8]) {
        let checksum = compute_checksum(payload);
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&checksum.to_le_bytes());
        self.spans.push(PayloadSpan {
            offset: self.buf.len() as u32,
            len: payload.len() as u32,
            checksum,
        });
        self.buf.extend_from_slice(payload);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Returns the frame bytes and the payload spans.
    pub fn finish(self) -> (Vec<u8>, Vec<PayloadSpan>) {
        let Self { mut buf, spans } = self;
        let count_at = FRAME_HEADER_SIZE + 8;
        buf[count_at..count_at + 4].copy_from_slice(&(spans.len() as u32).to_le_bytes());

        let frame_len = (buf.len() + FRAME_TRAILER_SIZE) as u32;
        buf[..4].copy_from_slice(&frame_len.to_le_bytes());
        buf[4] = RecordType::Write.as_u8();
        let checksum = compute_checksum(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        (buf, spans)
    }
}

pub fn encode_truncate_data(from: Llsn) -> Vec<u8> {
    frame(RecordType::TruncateData, &from.0.to_le_bytes())
}

pub fn encode_trim_data(below: Llsn) -> Vec<u8> {
    frame(RecordType::TrimData, &below.0.to_le_bytes())
}

pub fn encode_trim_commit(below: Glsn) -> Vec<u8> {
    frame(RecordType::TrimCommit, &below.0.to_le_bytes())
}

pub fn encode_commit(context: &CommitContext, entries: &[(Glsn, Llsn)]) -> Vec<u8> {
    let mut body = Vec::with_capacity(6 * 8 + 4 + entries.len() * 16);
    body.extend_from_slice(&context.version.to_le_bytes());
    body.extend_from_slice(&context.high_watermark.0.to_le_bytes());
    body.extend_from_slice(&context.prev_high_watermark.0.to_le_bytes());
    body.extend_from_slice(&context.committed_glsn_begin.0.to_le_bytes());
    body.extend_from_slice(&context.committed_glsn_end.0.to_le_bytes());
    body.extend_from_slice(&context.committed_llsn_begin.0.to_le_bytes());
    body.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (glsn, llsn) in entries {
        body.extend_from_slice(&glsn.0.to_le_bytes());
        body.extend_from_slice(&llsn.0.to_le_bytes());
    }
    frame(RecordType::Commit, &body)
}

/// Reads the frame length from the first four bytes.
pub fn frame_length(header: &[u8; 4]) -> usize {
    u32::from_le_bytes(*header) as usize
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Cursor over a frame body with bounds-checked little-endian reads.
struct BodyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("record body truncated at {}", self.pos),
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> io::Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> io::Result<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn finish(&self) -> io::Result<()> {
        if self.pos != self.data.len() {
            return Err(invalid_data(format!(
                "{} trailing bytes in record body",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

/// Decodes a complete frame, verifying its checksum.
pub fn decode_frame(frame: &[u8]) -> io::Result<JournalRecord> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "frame too short",
        ));
    }

    let declared = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if declared != frame.len() {
        return Err(invalid_data(format!(
            "frame length mismatch: declared {}, got {}",
            declared,
            frame.len()
        )));
    }

    let checksum_offset = frame.len() - FRAME_TRAILER_SIZE;
    let stored = u32::from_le_bytes([
        frame[checksum_offset],
        frame[checksum_offset + 1],
        frame[checksum_offset + 2],
        frame[checksum_offset + 3],
    ]);
    let computed = compute_checksum(&frame[..checksum_offset]);
    if stored != computed {
        return Err(invalid_data(format!(
            "checksum mismatch: computed {:08x}, stored {:08x}",
            computed, stored
        )));
    }

    let record_type = RecordType::from_u8(frame[4])
        .ok_or_else(|| invalid_data(format!("invalid record type: {}", frame[4])))?;
    let body = &frame[FRAME_HEADER_SIZE..checksum_offset];
    let mut reader = BodyReader::new(body);

    let record = match record_type {
        RecordType::Write => {
            let first_llsn = Llsn(reader.u64()?);
            let count = reader.u32()? as usize;
            let mut spans = Vec::with_capacity(count);
            for _ in 0..count {
                let len = reader.u32()?;
                let checksum = reader.u32()?;
                let offset = (FRAME_HEADER_SIZE + reader.pos) as u32;
                reader.take(len as usize)?;
                spans.push(PayloadSpan {
                    offset,
                    len,
                    checksum,
                });
            }
            JournalRecord::Write { first_llsn, spans }
        }
        RecordType::TruncateData => JournalRecord::TruncateData {
            from: Llsn(reader.u64()?),
        },
        RecordType::TrimData => JournalRecord::TrimData {
            below: Llsn(reader.u64()?),
        },
        RecordType::TrimCommit => JournalRecord::TrimCommit {
            below: Glsn(reader.u64()?),
        },
        RecordType::Commit => {
            let context = CommitContext {
                version: reader.u64()?,
                high_watermark: Glsn(reader.u64()?),
                prev_high_watermark: Glsn(reader.u64()?),
                committed_glsn_begin: Glsn(reader.u64()?),
                committed_glsn_end: Glsn(reader.u64()?),
                committed_llsn_begin: Llsn(reader.u64()?),
            };
            let count = reader.u32()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let glsn = Glsn(reader.u64()?);
                let llsn = Llsn(reader.u64()?);
                entries.push((glsn, llsn));
            }
            JournalRecord::Commit { context, entries }
        }
    };

    reader.finish()?;
    Ok(record)
}
