//! Lock-free stream cursors shared by every stage

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Glsn, Llsn};

#[derive(Debug, Default)]
pub(crate) struct StreamContext {
    /// Next LLSN the dispatcher assigns; end of written data
    next_llsn: AtomicU64,
    /// First LLSN not yet bound to a GLSN
    committed_llsn_end: AtomicU64,
    high_watermark: AtomicU64,
    version: AtomicU64,
}

impl StreamContext {
    pub fn new(
        next_llsn: Llsn,
        committed_llsn_end: Llsn,
        high_watermark: Glsn,
        version: u64,
    ) -> Self {
        Self {
            next_llsn: AtomicU64::new(next_llsn.0),
            committed_llsn_end: AtomicU64::new(committed_llsn_end.0),
            high_watermark: AtomicU64::new(high_watermark.0),
            version: AtomicU64::new(version),
        }
    }

    pub fn next_llsn(&self) -> Llsn {
        Llsn(self.next_llsn.load(Ordering::Acquire))
    }

    /// Advances the next LLSN from `current` to `new`. False if another
    /// writer moved it first.
    pub fn advance_next_llsn(&self, current: Llsn, new: Llsn) -> bool {
        self.next_llsn
            .compare_exchange(current.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn reset_next_llsn(&self, llsn: Llsn) {
        self.next_llsn.store(llsn.0, Ordering::Release);
    }

    pub fn committed_llsn_end(&self) -> Llsn {
        Llsn(self.committed_llsn_end.load(Ordering::Acquire))
    }

    pub fn set_committed_llsn_end(&self, llsn: Llsn) {
        self.committed_llsn_end.store(llsn.0, Ordering::Release);
    }

    pub fn high_watermark(&self) -> Glsn {
        Glsn(self.high_watermark.load(Ordering::Acquire))
    }

    pub fn set_high_watermark(&self, glsn: Glsn) {
        self.high_watermark.store(glsn.0, Ordering::Release);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_version(&self, version: u64) {
        self.version.store(version, Ordering::Release);
    }
}
