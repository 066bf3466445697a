//! Live write and commit cursors

use serde::Serialize;

use crate::types::{Glsn, Llsn};

/// Last LLSN made durable in the data keyspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteProgress {
    pub prev_written_llsn: Llsn,
}

/// Last entry bound by a commit context, and the latest high watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitProgress {
    pub prev_committed_llsn: Llsn,
    pub prev_committed_glsn: Glsn,
    pub high_watermark: Glsn,
}
