//! Write-Ahead Log for crash-safe durability.
//!
//! Every write is appended to `wal.log` *before* it enters the MemTable. On
//! startup the log is replayed to rebuild the buffer, and it is truncated
//! after a successful flush so it always reflects only the current buffer.
//!
//! ## Format
//!
//! One operation per line:
//!
//! ```text
//! key,value\n
//! ```
//!
//! The key runs up to the first comma; the value is everything after it, so
//! values may themselves contain commas. An empty value is a tombstone.
//! There are no checksums and no framing beyond the newline; a torn final
//! line after a crash either parses as a shorter value or is dropped.

use crate::{LockrError, LockrResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// File name of the log inside the data directory.
const WAL_FILE: &str = "wal.log";

/// Appends write operations to `wal.log` and replays them on recovery.
pub struct Wal {
    path: PathBuf,
    file: File,
    /// Whether appends are fsync'd before returning.
    sync_writes: bool,
}

impl Wal {
    /// Open (or create, mode 0600) the log in the given data directory.
    pub async fn open(data_dir: &Path, sync_writes: bool) -> LockrResult<Self> {
        let path = data_dir.join(WAL_FILE);

        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options
            .open(&path)
            .await
            .map_err(|e| LockrError::io(&path, e))?;

        Ok(Self {
            path,
            file,
            sync_writes,
        })
    }

    /// Append one operation. An empty value records a tombstone.
    pub async fn append(&mut self, key: &str, value: &str) -> LockrResult<()> {
        let line = format!("{},{}\n", key, value);
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| LockrError::io(&self.path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| LockrError::io(&self.path, e))?;
        if self.sync_writes {
            self.file
                .sync_data()
                .await
                .map_err(|e| LockrError::io(&self.path, e))?;
        }
        Ok(())
    }

    /// Read the whole log, later lines shadowing earlier ones.
    ///
    /// Returns an empty map when the file does not exist. Lines without a
    /// comma (a torn tail, typically) are dropped.
    pub async fn recover(&self) -> LockrResult<BTreeMap<String, String>> {
        let mut entries = BTreeMap::new();

        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(LockrError::io(&self.path, e)),
        };

        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| LockrError::io(&self.path, e))?
        {
            match line.split_once(',') {
                Some((key, value)) => {
                    entries.insert(key.to_string(), value.to_string());
                }
                None => {
                    tracing::warn!("dropping malformed line in {}", self.path.display());
                }
            }
        }

        Ok(entries)
    }

    /// Truncate the log to zero length.
    pub async fn clear(&mut self) -> LockrResult<()> {
        self.file
            .set_len(0)
            .await
            .map_err(|e| LockrError::io(&self.path, e))
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
