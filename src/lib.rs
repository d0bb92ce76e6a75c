//! Lockr: an embedded LSM-tree key-value store.
//!
//! Writes land in an in-memory buffer after being appended to a write-ahead
//! log; when the buffer fills it is flushed as an immutable sorted run on
//! disk, and a background task merges the oldest runs back together.
//!
//! # Architecture
//!
//! ```text
//! Writes → WAL (wal.log) → MemTable (RAM) → Segments (sstable_<nanos>.dat)
//! Reads  → Cache → MemTable → Segments (newest to oldest, Bloom-filtered)
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use lockr::{LockrConfig, LockrStore};
//!
//! # async fn example() -> Result<(), lockr::LockrError> {
//! let store = LockrStore::open(LockrConfig::new("/tmp/lockr-data")).await?;
//!
//! store.set("key1", "value1").await?;
//! let val = store.get("key1").await?;
//! assert_eq!(val.as_deref(), Some("value1"));
//!
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod bloom;
pub mod cache;
pub mod config;
pub mod memtable;
pub mod segment;
pub mod store;
pub mod wal;

pub use config::LockrConfig;
pub use store::LockrStore;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur in the store.
#[derive(Error, Debug)]
pub enum LockrError {
    /// An I/O failure, tagged with the file it happened on.
    #[error("io error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Delete of a key whose current effective value is empty.
    #[error("key not found")]
    KeyNotFound,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Keys may not contain `,` or newlines (the line format cannot
    /// represent them).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Values may not contain newlines.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl LockrError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        LockrError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type alias for store operations.
pub type LockrResult<T> = Result<T, LockrError>;
