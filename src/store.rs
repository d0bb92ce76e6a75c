//! The main LockrStore: coordinates WAL, MemTable, segments, cache, and the
//! background compactor.
//!
//! Writes are serialized on the WAL lock: append to the log, insert into the
//! MemTable, mirror into the cache, and flush the buffer into a new segment
//! once it crosses the size threshold. Reads cascade cache → MemTable →
//! segments newest to oldest, with each segment's Bloom filter skipping runs
//! that cannot contain the key. A dedicated task merges the two oldest
//! segments whenever at least two exist.

use crate::cache::ReadCache;
use crate::config::LockrConfig;
use crate::memtable::MemTable;
use crate::segment::Segment;
use crate::wal::Wal;
use crate::{LockrError, LockrResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};

/// In-memory state: the active buffer and the segment registry.
///
/// Guarded by a [`RwLock`] that is never held across an await point; disk
/// reads clone the segment list out first.
struct State {
    memtable: MemTable,
    /// Segments oldest first; newer segments win on lookup.
    segments: Vec<Arc<Segment>>,
    /// Bumped on every logical write. A lookup that was off reading a
    /// segment file compares this before back-filling the cache, so a
    /// racing write can never be shadowed by a stale disk value.
    version: u64,
}

/// An embedded LSM-tree key-value store.
///
/// Thread-safe: reads run concurrently, writes serialize on the WAL lock.
pub struct LockrStore {
    config: LockrConfig,

    state: Arc<RwLock<State>>,

    /// The write-path lock. Held across WAL appends and flushes, so writes
    /// are totally ordered and the log always reflects the current buffer.
    wal: Arc<AsyncMutex<Wal>>,

    /// Recency cache fronting the lookup cascade.
    cache: Arc<ReadCache>,

    /// Flag indicating the store is open.
    is_open: Arc<AtomicBool>,

    /// Wakes the compactor after each flush.
    compaction_notify: Arc<Notify>,

    /// Serializes compaction rounds: only one merge may rearrange the front
    /// of the registry at a time.
    compaction_lock: Arc<AsyncMutex<()>>,

    /// Handle to the background compaction task.
    compaction_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LockrStore {
    /// Open or create a store in the configured data directory.
    ///
    /// Existing segment files are rediscovered (index and filter rebuilt by
    /// scanning each one), the WAL is replayed into the buffer, and the
    /// compaction task is started.
    pub async fn open(config: LockrConfig) -> LockrResult<Self> {
        config.ensure_data_dir()?;

        let segments = Self::discover_segments(&config.data_dir).await?;
        if !segments.is_empty() {
            tracing::info!("rediscovered {} segment(s)", segments.len());
        }

        let wal = Wal::open(&config.data_dir, config.sync_writes).await?;

        let state = Arc::new(RwLock::new(State {
            memtable: MemTable::new(),
            segments,
            version: 0,
        }));
        let is_open = Arc::new(AtomicBool::new(true));
        let compaction_notify = Arc::new(Notify::new());
        let compaction_lock = Arc::new(AsyncMutex::new(()));

        let store = Self {
            cache: Arc::new(ReadCache::new(config.cache_capacity)),
            state: state.clone(),
            wal: Arc::new(AsyncMutex::new(wal)),
            is_open: is_open.clone(),
            compaction_notify: compaction_notify.clone(),
            compaction_lock: compaction_lock.clone(),
            compaction_handle: parking_lot::Mutex::new(None),
            config: config.clone(),
        };

        store.recover().await?;

        // Background compaction: woken after each flush, with a periodic
        // fallback tick.
        if config.auto_compaction {
            let compaction_handle = {
                let state = state.clone();
                let data_dir = config.data_dir.clone();
                let interval = config.compaction_interval;

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = compaction_notify.notified() => {}
                            _ = tokio::time::sleep(interval) => {}
                        }

                        if !is_open.load(Ordering::SeqCst) {
                            break;
                        }

                        let _guard = compaction_lock.lock().await;
                        if let Err(e) = Self::compact_once(&state, &data_dir).await {
                            tracing::error!("compaction error: {}", e);
                        }
                    }
                })
            };
            *store.compaction_handle.lock() = Some(compaction_handle);
        }

        tracing::info!("lockr store opened at {}", store.config.data_dir.display());
        Ok(store)
    }

    /// Set a key to a value.
    ///
    /// The write is appended to the WAL before it reaches the buffer. An
    /// empty value writes a tombstone.
    pub async fn set(&self, key: &str, value: &str) -> LockrResult<()> {
        self.check_open()?;
        validate_key(key)?;
        validate_value(value)?;

        let mut wal = self.wal.lock().await;
        wal.append(key, value).await?;

        let should_flush = {
            let mut state = self.state.write();
            state.memtable.insert(key.to_string(), value.to_string());
            state.version += 1;
            // Cache and memtable change together under the write guard: a
            // reader trusting a cache hit must never see a value older
            // than the buffer's.
            self.cache.insert(key, value);
            state.memtable.size_bytes() >= self.config.memtable_size_limit
        };

        if should_flush {
            self.flush_locked(&mut wal).await?;
        }
        Ok(())
    }

    /// Get the value for a key.
    ///
    /// `Ok(None)` means the key is absent or tombstoned; that is not an
    /// error.
    pub async fn get(&self, key: &str) -> LockrResult<Option<String>> {
        self.check_open()?;
        self.lookup(key).await
    }

    /// Delete a key by writing a tombstone.
    ///
    /// Fails with [`LockrError::KeyNotFound`] when the key's current
    /// effective value is already empty.
    pub async fn delete(&self, key: &str) -> LockrResult<()> {
        self.check_open()?;
        validate_key(key)?;

        // Take the write-path lock once; the existence probe below shares
        // the lock-free lookup helper with `get`.
        let mut wal = self.wal.lock().await;
        if self.lookup(key).await?.is_none() {
            return Err(LockrError::KeyNotFound);
        }

        wal.append(key, "").await?;
        let should_flush = {
            let mut state = self.state.write();
            state.memtable.insert(key.to_string(), String::new());
            state.version += 1;
            // The tombstone reaches cache and memtable atomically, as in
            // `set`.
            self.cache.insert(key, "");
            state.memtable.size_bytes() >= self.config.memtable_size_limit
        };

        if should_flush {
            self.flush_locked(&mut wal).await?;
        }
        Ok(())
    }

    /// List every live entry.
    ///
    /// A key whose newest occurrence across buffer and segments is a
    /// tombstone does not appear, even when older segments still hold a
    /// value for it.
    pub async fn list(&self) -> LockrResult<BTreeMap<String, String>> {
        self.check_open()?;

        let (mut result, mut seen, segments) = {
            let state = self.state.read();
            let mut result = BTreeMap::new();
            let mut seen = HashSet::new();
            for (key, value) in state.memtable.iter() {
                seen.insert(key.clone());
                if !value.is_empty() {
                    result.insert(key.clone(), value.clone());
                }
            }
            (result, seen, state.segments.clone())
        };

        for segment in segments.iter().rev() {
            for (key, value) in segment.all_entries().await? {
                if seen.insert(key.clone()) && !value.is_empty() {
                    result.insert(key, value);
                }
            }
        }

        Ok(result)
    }

    /// Replay the WAL into the buffer, then truncate it.
    ///
    /// Tombstones replay as empty values. Idempotent: a second call finds
    /// an empty log and replays nothing.
    pub async fn recover(&self) -> LockrResult<()> {
        self.check_open()?;

        let mut wal = self.wal.lock().await;
        let entries = wal.recover().await?;
        if entries.is_empty() {
            return Ok(());
        }

        let replayed = entries.len();
        {
            let mut state = self.state.write();
            for (key, value) in entries {
                state.memtable.insert(key, value);
            }
            state.version += 1;
        }
        wal.clear().await?;

        tracing::info!("recovered {} entries from the write-ahead log", replayed);
        Ok(())
    }

    /// Force a flush of the current buffer into a new segment.
    pub async fn flush(&self) -> LockrResult<()> {
        self.check_open()?;
        let mut wal = self.wal.lock().await;
        self.flush_locked(&mut wal).await
    }

    /// Run one compaction round now instead of waiting for the background
    /// task. Returns whether a merge happened.
    pub async fn compact(&self) -> LockrResult<bool> {
        self.check_open()?;
        let _guard = self.compaction_lock.lock().await;
        Self::compact_once(&self.state, &self.config.data_dir).await
    }

    /// Close the store: drain the buffer, truncate the WAL, and stop the
    /// compaction task. Further operations fail with
    /// [`LockrError::Closed`].
    pub async fn close(&self) -> LockrResult<()> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let mut wal = self.wal.lock().await;
            self.flush_locked(&mut wal).await?;
            wal.clear().await?;
        }

        self.compaction_notify.notify_one();
        if let Some(handle) = self.compaction_handle.lock().take() {
            let _ = handle.await;
        }

        tracing::info!("lockr store closed");
        Ok(())
    }

    /// Store statistics for monitoring.
    pub fn stats(&self) -> StoreStats {
        let state = self.state.read();
        StoreStats {
            memtable_entries: state.memtable.len(),
            memtable_bytes: state.memtable.size_bytes(),
            segment_count: state.segments.len(),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            cache_hit_rate: self.cache.hit_rate(),
        }
    }

    /// The lookup cascade: cache → MemTable → segments newest to oldest.
    ///
    /// Takes no write-path lock, so `delete` can probe under it. The first
    /// present value stops the cascade; an empty one is a tombstone and
    /// resolves to `None`.
    async fn lookup(&self, key: &str) -> LockrResult<Option<String>> {
        if let Some(value) = self.cache.get(key) {
            return Ok(non_tombstone(value));
        }

        let (segments, version) = {
            let state = self.state.read();
            if let Some(value) = state.memtable.get(key) {
                // Filling the cache while the guard is held keeps it in
                // step with the buffer; writers hold the write side for
                // both.
                let value = value.to_string();
                self.cache.insert(key, &value);
                return Ok(non_tombstone(value));
            }
            (state.segments.clone(), state.version)
        };

        for segment in segments.iter().rev() {
            if let Some(value) = segment.get(key).await? {
                {
                    // Back-fill only if no write landed while the segment
                    // was being read; the cache may already hold a newer
                    // value than this run does.
                    let state = self.state.read();
                    if state.version == version {
                        self.cache.insert(key, &value);
                    }
                }
                return Ok(non_tombstone(value));
            }
        }

        Ok(None)
    }

    /// Flush the buffer into a new segment. Caller holds the WAL lock, so
    /// the buffer cannot change underneath the snapshot.
    ///
    /// The segment file is fsync'd before the WAL is truncated; after this
    /// returns the log again reflects exactly the (now empty) buffer.
    async fn flush_locked(&self, wal: &mut Wal) -> LockrResult<()> {
        let entries = {
            let state = self.state.read();
            if state.memtable.is_empty() {
                return Ok(());
            }
            state.memtable.snapshot()
        };

        let segment = Segment::create(&self.config.data_dir, &entries).await?;
        tracing::info!(
            "flushed {} entries to {}",
            entries.len(),
            segment.path().display()
        );

        {
            let mut state = self.state.write();
            state.segments.push(Arc::new(segment));
            state.memtable = MemTable::new();
        }
        wal.clear().await?;

        self.compaction_notify.notify_one();
        Ok(())
    }

    /// Merge the two oldest segments into one, newest of the pair winning
    /// on key collisions. Tombstones are dropped from the result: nothing
    /// older remains for them to mask.
    async fn compact_once(state: &RwLock<State>, data_dir: &Path) -> LockrResult<bool> {
        let (oldest, second) = {
            let state = state.read();
            if state.segments.len() < 2 {
                return Ok(false);
            }
            (state.segments[0].clone(), state.segments[1].clone())
        };

        let mut merged = oldest.all_entries().await?;
        for (key, value) in second.all_entries().await? {
            merged.insert(key, value);
        }
        merged.retain(|_, value| !value.is_empty());

        // Name the merged run from the replaced pair's oldest timestamp so
        // it keeps its registry position across a restart.
        let segment = Segment::create_at(data_dir, &merged, oldest.created_ns()).await?;
        tracing::info!(
            "compacted {} and {} into {} ({} live entries)",
            oldest.path().display(),
            second.path().display(),
            segment.path().display(),
            merged.len()
        );

        {
            // Only the compactor removes from the front of the registry, so
            // the two segments read above are still slots 0 and 1.
            let mut state = state.write();
            state.segments.drain(0..2);
            state.segments.insert(0, Arc::new(segment));
        }

        for old in [&oldest, &second] {
            if let Err(e) = tokio::fs::remove_file(old.path()).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        "failed to remove compacted segment {}: {}",
                        old.path().display(),
                        e
                    );
                }
            }
        }

        Ok(true)
    }

    /// Scan the data directory for segment files, oldest first.
    async fn discover_segments(data_dir: &Path) -> LockrResult<Vec<Arc<Segment>>> {
        let mut dir = tokio::fs::read_dir(data_dir)
            .await
            .map_err(|e| LockrError::io(data_dir, e))?;

        let mut segments = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| LockrError::io(data_dir, e))?
        {
            let name = entry.file_name();
            let Some(created_ns) = Segment::parse_file_name(&name.to_string_lossy()) else {
                continue;
            };
            segments.push(Arc::new(Segment::load(entry.path(), created_ns).await?));
        }

        segments.sort_by_key(|segment| segment.created_ns());
        Ok(segments)
    }

    fn check_open(&self) -> LockrResult<()> {
        if self.is_open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LockrError::Closed)
        }
    }
}

/// Map the empty-string tombstone to absence.
fn non_tombstone(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn validate_key(key: &str) -> LockrResult<()> {
    if key.contains(',') || key.contains('\n') {
        return Err(LockrError::InvalidKey(
            "keys may not contain ',' or newlines".to_string(),
        ));
    }
    Ok(())
}

fn validate_value(value: &str) -> LockrResult<()> {
    if value.contains('\n') {
        return Err(LockrError::InvalidValue(
            "values may not contain newlines".to_string(),
        ));
    }
    Ok(())
}

/// Store statistics for monitoring.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub memtable_entries: usize,
    pub memtable_bytes: usize,
    pub segment_count: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MemTable: {} entries ({}B) | Segments: {} | Cache: {}/{} ({:.1}%)",
            self.memtable_entries,
            self.memtable_bytes,
            self.segment_count,
            self.cache_hits,
            self.cache_hits + self.cache_misses,
            self.cache_hit_rate * 100.0,
        )
    }
}
