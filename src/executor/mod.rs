//! Log stream executor subsystem
//!
//! One executor per replica of a log stream. It accepts appends on the
//! primary and replicated writes on backups, persists them through the
//! storage engine, applies commit contexts from the sequencer and carries the
//! replica through seal and unseal.
//!
//! # Flow
//!
//! 1. `append` / `replicate` are admitted only while Mutable
//! 2. The dispatcher assigns contiguous LLSNs and writes one batch
//! 3. The primary forwards the batch to its backups concurrently
//! 4. `commit` binds LLSNs to GLSNs and resolves waiting appends
//! 5. `seal` drains, truncates the uncommitted tail and freezes the replica

mod commit_wait;
mod committer;
mod config;
mod context;
mod errors;
mod executor;
mod pool;
mod replicator;
mod seal;
mod state;
mod task;
mod writer;

pub use config::ExecutorConfig;
pub use errors::{ExecutorError, ExecutorResult};
pub use executor::{LogStreamExecutor, LogStreamMetadata, UncommittedReport};
pub use replicator::{ChannelReplicator, ReplicateTask, ReplicationReceiver, Replicator};
pub use seal::SealStatus;
pub use state::ExecutorState;
pub use writer::DrainOutcome;
