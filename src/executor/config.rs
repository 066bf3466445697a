//! Executor configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::{ExecutorError, ExecutorResult};
use crate::storage::StorageConfig;
use crate::types::{LogStreamId, StorageNodeId};

/// Configuration for one log stream executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub storage_node_id: StorageNodeId,
    pub log_stream_id: LogStreamId,

    /// Bound of the append queue (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Most tasks the dispatcher folds into one storage batch (default: 128)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Bound of the in-process replication queue (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub replicate_queue_capacity: usize,

    pub storage: StorageConfig,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_batch_size() -> usize {
    128
}

impl ExecutorConfig {
    pub fn new(
        storage_node_id: StorageNodeId,
        log_stream_id: LogStreamId,
        storage: StorageConfig,
    ) -> Self {
        Self {
            storage_node_id,
            log_stream_id,
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            replicate_queue_capacity: default_queue_capacity(),
            storage,
        }
    }

    /// Loads a JSON config file and validates it.
    pub fn load(path: &Path) -> ExecutorResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ExecutorError::invalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ExecutorError::invalid(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ExecutorResult<()> {
        if self.queue_capacity == 0 {
            return Err(ExecutorError::invalid("queue_capacity must be positive"));
        }
        if self.batch_size == 0 {
            return Err(ExecutorError::invalid("batch_size must be positive"));
        }
        if self.replicate_queue_capacity == 0 {
            return Err(ExecutorError::invalid(
                "replicate_queue_capacity must be positive",
            ));
        }
        self.storage.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("executor.json");
        fs::write(
            &path,
            r#"{"storage_node_id": 1, "log_stream_id": 7, "storage": {"data_dir": "/var/lib/aerolog/ls7"}}"#,
        )
        .unwrap();

        let config = ExecutorConfig::load(&path).unwrap();
        assert_eq!(config.storage_node_id, StorageNodeId(1));
        assert_eq!(config.log_stream_id, LogStreamId(7));
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.batch_size, 128);
        assert!(config.storage.sync_writes);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = ExecutorConfig::new(
            StorageNodeId(1),
            LogStreamId(1),
            StorageConfig::new("/tmp/ls1"),
        );
        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(ExecutorError::Invalid(_))));
    }

    #[test]
    fn test_malformed_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("executor.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(
            ExecutorConfig::load(&path),
            Err(ExecutorError::Invalid(_))
        ));
    }
}
