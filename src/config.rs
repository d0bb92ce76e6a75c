//! Configuration for the store.

use crate::{LockrError, LockrResult};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::LockrStore`].
#[derive(Debug, Clone)]
pub struct LockrConfig {
    /// Directory holding `wal.log` and the segment files. Created mode 0700
    /// on open if absent.
    pub data_dir: PathBuf,

    /// Maximum MemTable size in bytes (sum of key and value lengths) before
    /// it is flushed to a segment. Default: 1 MiB.
    pub memtable_size_limit: usize,

    /// Capacity of the read cache in entries. Default: 1000.
    pub cache_capacity: usize,

    /// Whether WAL appends are fsync'd before the write returns.
    /// Default: true.
    pub sync_writes: bool,

    /// How often the background compactor wakes up on its own, in addition
    /// to being notified after every flush. Default: 10 seconds.
    pub compaction_interval: Duration,

    /// Whether the background compaction task runs. When disabled,
    /// compaction only happens through explicit
    /// [`crate::LockrStore::compact`] calls. Default: true.
    pub auto_compaction: bool,
}

impl LockrConfig {
    /// Create a config for the given data directory with default tunables.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            memtable_size_limit: 1024 * 1024, // 1 MiB
            cache_capacity: 1000,
            sync_writes: true,
            compaction_interval: Duration::from_secs(10),
            auto_compaction: true,
        }
    }

    /// Builder-style: set the MemTable flush threshold in bytes.
    pub fn with_memtable_size_limit(mut self, bytes: usize) -> Self {
        self.memtable_size_limit = bytes;
        self
    }

    /// Builder-style: set the read-cache capacity in entries.
    pub fn with_cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = entries;
        self
    }

    /// Builder-style: enable or disable fsync on WAL appends.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Builder-style: set the compactor wake-up interval.
    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Builder-style: enable or disable the background compaction task.
    pub fn with_auto_compaction(mut self, enabled: bool) -> Self {
        self.auto_compaction = enabled;
        self
    }

    /// Create the data directory (mode 0700 on Unix) if it does not exist.
    pub fn ensure_data_dir(&self) -> LockrResult<()> {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(&self.data_dir)
            .map_err(|e| LockrError::io(&self.data_dir, e))
    }
}
