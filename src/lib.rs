//! aerolog - per-replica write path of a distributed log storage node
//!
//! A log stream replica accepts appends, assigns local sequence numbers,
//! persists entries, forwards them to backup replicas and binds them to
//! global sequence numbers when the sequencer commits.

pub mod cli;
pub mod executor;
pub mod observability;
pub mod storage;
pub mod types;
