//! Storage engine configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{StorageError, StorageResult};

/// Storage engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `data.log` and `commit.log`
    pub data_dir: PathBuf,

    /// fsync every applied batch before acknowledging it (default: true)
    ///
    /// Only tests and benchmarks should turn this off.
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
}

fn default_sync_writes() -> bool {
    true
}

impl StorageConfig {
    /// Config rooted at `data_dir` with durable writes.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            sync_writes: default_sync_writes(),
        }
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn data_log_path(&self) -> PathBuf {
        self.data_dir.join("data.log")
    }

    pub fn commit_log_path(&self) -> PathBuf {
        self.data_dir.join("commit.log")
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(StorageError::invalid("data_dir must not be empty"));
        }
        Ok(())
    }
}
