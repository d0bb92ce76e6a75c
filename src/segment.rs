//! Immutable sorted runs ("segments") on disk.
//!
//! A segment is one flush (or compaction) worth of entries, written once and
//! never mutated, with the same `key,value\n` line format as the WAL. Each
//! segment keeps a dense in-memory index from key to the byte offset of its
//! line, plus a Bloom filter, both built while the file is written and
//! rebuilt by a scan when an existing file is loaded on startup. Neither is
//! persisted.
//!
//! File names are `sstable_<unix-nanos>.dat`; the timestamp orders segments
//! by creation when they are rediscovered.

use crate::bloom::BloomFilter;
use crate::{LockrError, LockrResult};
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};

/// An immutable sorted run backed by one data file.
pub struct Segment {
    path: PathBuf,
    /// Byte offset of each key's line in the file.
    index: BTreeMap<String, u64>,
    filter: BloomFilter,
    /// Creation timestamp from the file name (unix nanoseconds).
    created_ns: u128,
}

impl Segment {
    /// Write a new segment into `data_dir` from sorted entries.
    ///
    /// Entries are written in key order, one line each; the index and filter
    /// are populated as lines go out. The file is fsync'd before returning
    /// so the WAL can be truncated safely afterwards.
    pub async fn create(
        data_dir: &Path,
        entries: &BTreeMap<String, String>,
    ) -> LockrResult<Segment> {
        let created_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos();
        Self::create_at(data_dir, entries, created_ns).await
    }

    /// Write a new segment whose file name starts from the given timestamp,
    /// bumping past collisions.
    ///
    /// Rediscovery orders segments by this name component, so a compaction
    /// passes the replaced pair's oldest timestamp to keep the merged run in
    /// its place; flushes pass the current time.
    pub async fn create_at(
        data_dir: &Path,
        entries: &BTreeMap<String, String>,
        mut created_ns: u128,
    ) -> LockrResult<Segment> {
        // Coarse clocks can hand two rapid flushes the same timestamp; bump
        // until the name is free rather than overwrite an existing run.
        let mut path = data_dir.join(format!("sstable_{}.dat", created_ns));
        while tokio::fs::try_exists(&path)
            .await
            .map_err(|e| LockrError::io(&path, e))?
        {
            created_ns += 1;
            path = data_dir.join(format!("sstable_{}.dat", created_ns));
        }

        let mut index = BTreeMap::new();
        let mut filter = BloomFilter::new();
        let mut buf = String::new();
        let mut offset = 0u64;

        for (key, value) in entries {
            let line = format!("{},{}\n", key, value);
            index.insert(key.clone(), offset);
            filter.add(key);
            offset += line.len() as u64;
            buf.push_str(&line);
        }

        let mut file = File::create(&path)
            .await
            .map_err(|e| LockrError::io(&path, e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| LockrError::io(&path, e))?;
        file.sync_all()
            .await
            .map_err(|e| LockrError::io(&path, e))?;

        Ok(Segment {
            path,
            index,
            filter,
            created_ns,
        })
    }

    /// Load an existing segment file, rebuilding its index and filter.
    ///
    /// `created_ns` is the timestamp parsed out of the file name (see
    /// [`Segment::parse_file_name`]). Malformed lines are skipped.
    pub async fn load(path: PathBuf, created_ns: u128) -> LockrResult<Segment> {
        let file = File::open(&path)
            .await
            .map_err(|e| LockrError::io(&path, e))?;
        let mut reader = BufReader::new(file);

        let mut index = BTreeMap::new();
        let mut filter = BloomFilter::new();
        let mut offset = 0u64;
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| LockrError::io(&path, e))?;
            if n == 0 {
                break;
            }
            match line.trim_end_matches('\n').split_once(',') {
                Some((key, _)) => {
                    filter.add(key);
                    index.insert(key.to_string(), offset);
                }
                None => {
                    tracing::debug!("skipping malformed line in {}", path.display());
                }
            }
            offset += n as u64;
        }

        Ok(Segment {
            path,
            index,
            filter,
            created_ns,
        })
    }

    /// Extract the `<unix-nanos>` component of a segment file name.
    ///
    /// Returns `None` for files that are not segments.
    pub fn parse_file_name(name: &str) -> Option<u128> {
        name.strip_prefix("sstable_")?
            .strip_suffix(".dat")?
            .parse()
            .ok()
    }

    /// Point lookup.
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key present; an empty value is a tombstone
    /// - `Ok(None)`: key not in this segment
    pub async fn get(&self, key: &str) -> LockrResult<Option<String>> {
        if !self.filter.might_contain(key) {
            return Ok(None);
        }
        let Some(&offset) = self.index.get(key) else {
            return Ok(None);
        };

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| LockrError::io(&self.path, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| LockrError::io(&self.path, e))?;

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| LockrError::io(&self.path, e))?;

        match line.trim_end_matches('\n').split_once(',') {
            Some((stored_key, value)) if stored_key == key => Ok(Some(value.to_string())),
            _ => Ok(None),
        }
    }

    /// Scan all live entries, dropping tombstones and malformed lines.
    pub async fn live_entries(&self) -> LockrResult<BTreeMap<String, String>> {
        let mut entries = self.all_entries().await?;
        entries.retain(|_, value| !value.is_empty());
        Ok(entries)
    }

    /// Scan every entry including tombstones (for compaction merges and
    /// lookup shadowing). Malformed lines are skipped.
    pub async fn all_entries(&self) -> LockrResult<BTreeMap<String, String>> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| LockrError::io(&self.path, e))?;
        let mut lines = BufReader::new(file).lines();

        let mut entries = BTreeMap::new();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| LockrError::io(&self.path, e))?
        {
            if let Some((key, value)) = line.split_once(',') {
                entries.insert(key.to_string(), value.to_string());
            }
        }
        Ok(entries)
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creation timestamp (unix nanoseconds, from the file name).
    pub fn created_ns(&self) -> u128 {
        self.created_ns
    }

    /// Number of keys in the segment (tombstones included).
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the segment holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
