//! Persistent cold tier.
//!
//! Layout under the configured directory:
//!
//! ```text
//! geometries/<sha256(id)>.geo   gzip(bincode(AirspaceGeometry))
//! tiles/<step>_<lat>_<lon>.tile gzip(bincode(TileMetadata))
//! journal.log                   metadata journal (see `journal`)
//! ```
//!
//! The metadata index (fetch time, access stats, sizes) lives in memory and
//! is rebuilt from the journal on open, or from the payload files when the
//! journal is missing. Entries past their TTL are misses even while their
//! files still exist; the maintenance sweep removes them.
//!
//! Storage failures never reach readers: an unreadable entry is purged,
//! logged and reported as a miss.
//!
//! # Concurrency
//!
//! I/O for one key is serialised through a striped set of async locks;
//! distinct keys proceed in parallel. File access and (de)compression run
//! on the blocking pool. Index updates and their journal records are made
//! together under the journal lock, which is only taken on blocking threads.

mod codec;
mod journal;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ColdCacheConfig;
use crate::model::AirspaceGeometry;
use crate::tiling::{TileKey, TileMetadata};
use crate::time::{duration_millis, Clock};

pub use journal::EntryMeta;
use journal::{Journal, JournalRecord};

const GEOMETRY_DIR: &str = "geometries";
const TILE_DIR: &str = "tiles";
const JOURNAL_FILE: &str = "journal.log";

/// Cold tier errors.
#[derive(Debug, Error)]
pub enum ColdCacheError {
    #[error("Cold cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt cold cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Failed to encode cold cache entry: {0}")]
    Encode(String),

    #[error("Cold cache task failed: {0}")]
    Spawn(String),
}

impl From<tokio::task::JoinError> for ColdCacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        ColdCacheError::Spawn(e.to_string())
    }
}

/// Counters and occupancy of the cold tier.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ColdCacheStats {
    pub geometry_entries: usize,
    pub tile_entries: usize,
    /// Compressed bytes on disk.
    pub stored_bytes: u64,
    /// Uncompressed content bytes.
    pub content_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub corruptions: u64,
    pub journal_records: u64,
    pub fragmentation: f64,
}

/// Per-geometry access statistics, used to pick promotion candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub id: String,
    pub meta: EntryMeta,
    pub expired: bool,
}

/// Result of a TTL sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub geometries_removed: usize,
    pub tiles_removed: usize,
    pub batches: usize,
}

/// Result of a compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub records_before: u64,
    pub records_after: u64,
    pub orphans_removed: usize,
}

/// Identity of a cold entry of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntryKey {
    Geometry(String),
    Tile(TileKey),
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKey::Geometry(id) => write!(f, "geometry:{}", id),
            EntryKey::Tile(key) => write!(f, "tile:{}", key),
        }
    }
}

impl EntryKey {
    fn put_record(&self, meta: EntryMeta) -> JournalRecord {
        match self {
            EntryKey::Geometry(id) => JournalRecord::PutGeometry {
                id: id.clone(),
                meta,
            },
            EntryKey::Tile(key) => JournalRecord::PutTile { key: *key, meta },
        }
    }

    fn touch_record(&self, at: i64) -> JournalRecord {
        match self {
            EntryKey::Geometry(id) => JournalRecord::TouchGeometry { id: id.clone(), at },
            EntryKey::Tile(key) => JournalRecord::TouchTile { key: *key, at },
        }
    }

    fn remove_record(&self) -> JournalRecord {
        match self {
            EntryKey::Geometry(id) => JournalRecord::RemoveGeometry { id: id.clone() },
            EntryKey::Tile(key) => JournalRecord::RemoveTile { key: *key },
        }
    }
}

struct ColdInner {
    geometry_dir: PathBuf,
    tile_dir: PathBuf,
    geometry_ttl_ms: i64,
    tile_ttl_ms: i64,
    clock: Arc<dyn Clock>,
    geometries: DashMap<String, EntryMeta>,
    tiles: DashMap<TileKey, EntryMeta>,
    journal: Mutex<Journal>,
    journal_records: AtomicU64,
    stripes: Vec<tokio::sync::Mutex<()>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    corruptions: AtomicU64,
}

impl ColdInner {
    fn stripe(&self, key: &EntryKey) -> &tokio::sync::Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        &self.stripes[index]
    }

    fn path_for(&self, key: &EntryKey) -> PathBuf {
        match key {
            EntryKey::Geometry(id) => self.geometry_dir.join(codec::geometry_file_name(id)),
            EntryKey::Tile(key) => self.tile_dir.join(codec::tile_file_name(key)),
        }
    }

    fn meta(&self, key: &EntryKey) -> Option<EntryMeta> {
        match key {
            EntryKey::Geometry(id) => self.geometries.get(id).map(|m| *m),
            EntryKey::Tile(key) => self.tiles.get(key).map(|m| *m),
        }
    }

    fn ttl_ms(&self, key: &EntryKey) -> i64 {
        match key {
            EntryKey::Geometry(_) => self.geometry_ttl_ms,
            EntryKey::Tile(_) => self.tile_ttl_ms,
        }
    }

    fn is_expired(&self, key: &EntryKey, meta: &EntryMeta, now: i64) -> bool {
        now.saturating_sub(meta.fetched_at) >= self.ttl_ms(key)
    }

    fn apply(&self, record: &JournalRecord) {
        match record {
            JournalRecord::PutGeometry { id, meta } => {
                self.geometries.insert(id.clone(), *meta);
            }
            JournalRecord::PutTile { key, meta } => {
                self.tiles.insert(*key, *meta);
            }
            JournalRecord::TouchGeometry { id, at } => {
                if let Some(mut m) = self.geometries.get_mut(id) {
                    m.access_count += 1;
                    m.last_accessed = *at;
                }
            }
            JournalRecord::TouchTile { key, at } => {
                if let Some(mut m) = self.tiles.get_mut(key) {
                    m.access_count += 1;
                    m.last_accessed = *at;
                }
            }
            JournalRecord::RemoveGeometry { id } => {
                self.geometries.remove(id);
            }
            JournalRecord::RemoveTile { key } => {
                self.tiles.remove(key);
            }
            JournalRecord::Clear => {
                self.geometries.clear();
                self.tiles.clear();
            }
        }
    }

    /// Apply a record to the index and append it to the journal. Blocking.
    fn commit(&self, record: JournalRecord) -> io::Result<()> {
        let mut journal = self.journal.lock();
        self.apply(&record);
        let result = journal.append(&record);
        self.journal_records
            .store(journal.record_count(), Ordering::Relaxed);
        result
    }

    /// Record a read. Returns the updated metadata. Blocking.
    fn touch(&self, key: &EntryKey, now: i64) -> Option<EntryMeta> {
        if let Err(e) = self.commit(key.touch_record(now)) {
            warn!(entry = %key, error = %e, "Failed to journal cold cache access");
        }
        self.meta(key)
    }

    /// Drop an entry from the index and disk. Blocking.
    fn remove_entry(&self, key: &EntryKey) -> io::Result<()> {
        self.commit(key.remove_record())?;
        match std::fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Purge an unreadable entry. Blocking.
    fn purge(&self, key: &EntryKey, reason: String) {
        self.corruptions.fetch_add(1, Ordering::Relaxed);
        let err = ColdCacheError::Corrupt {
            key: key.to_string(),
            reason,
        };
        warn!(error = %err, "Purging cold cache entry");
        if let Err(e) = self.remove_entry(key) {
            warn!(entry = %key, error = %e, "Failed to purge cold cache entry");
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &EntryKey) -> Result<T, String> {
        let bytes = std::fs::read(self.path_for(key)).map_err(|e| format!("read failed: {}", e))?;
        codec::decode(&bytes)
    }

    fn fragmentation(&self) -> f64 {
        let records = self.journal_records.load(Ordering::Relaxed);
        if records == 0 {
            return 0.0;
        }
        let live = (self.geometries.len() + self.tiles.len()) as u64;
        records.saturating_sub(live) as f64 / records as f64
    }

    fn snapshot_records(&self) -> Vec<JournalRecord> {
        let mut records: Vec<JournalRecord> = self
            .geometries
            .iter()
            .map(|e| JournalRecord::PutGeometry {
                id: e.key().clone(),
                meta: *e.value(),
            })
            .collect();
        records.extend(self.tiles.iter().map(|e| JournalRecord::PutTile {
            key: *e.key(),
            meta: *e.value(),
        }));
        records
    }

    /// Remove payload files that no index entry refers to. Blocking; the
    /// caller holds the journal lock so no new entries appear meanwhile.
    fn remove_orphans(&self) -> io::Result<usize> {
        let expected_geometries: HashSet<String> = self
            .geometries
            .iter()
            .map(|e| codec::geometry_file_name(e.key()))
            .collect();
        let expected_tiles: HashSet<String> = self
            .tiles
            .iter()
            .map(|e| codec::tile_file_name(e.key()))
            .collect();

        let mut removed = 0;
        for (dir, expected) in [
            (&self.geometry_dir, &expected_geometries),
            (&self.tile_dir, &expected_tiles),
        ] {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                let is_temp = path
                    .extension()
                    .is_some_and(|ext| ext == codec::TEMP_EXTENSION);
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if is_temp || expected.contains(&name) {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphan"),
                }
            }
        }
        Ok(removed)
    }
}

/// Durable, TTL-bound store for geometries and tile mappings.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct ColdCache {
    inner: Arc<ColdInner>,
}

impl ColdCache {
    /// Open the store, creating its directory layout if needed.
    pub async fn open(
        config: &ColdCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ColdCacheError> {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Self::open_blocking(&config, clock)).await?
    }

    fn open_blocking(
        config: &ColdCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ColdCacheError> {
        let root = config.directory.as_path();
        let geometry_dir = root.join(GEOMETRY_DIR);
        let tile_dir = root.join(TILE_DIR);
        std::fs::create_dir_all(&geometry_dir)?;
        std::fs::create_dir_all(&tile_dir)?;
        remove_temp_files(&geometry_dir)?;
        remove_temp_files(&tile_dir)?;

        let journal_path = root.join(JOURNAL_FILE);
        let journal_existed = journal_path.exists();
        let (journal, records) = Journal::open(&journal_path)?;

        let inner = ColdInner {
            geometry_dir,
            tile_dir,
            geometry_ttl_ms: duration_millis(config.geometry_ttl),
            tile_ttl_ms: duration_millis(config.tile_ttl),
            clock,
            geometries: DashMap::new(),
            tiles: DashMap::new(),
            journal_records: AtomicU64::new(journal.record_count()),
            journal: Mutex::new(journal),
            stripes: (0..config.lock_stripes.max(1))
                .map(|_| tokio::sync::Mutex::new(()))
                .collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            corruptions: AtomicU64::new(0),
        };

        if journal_existed {
            for record in &records {
                inner.apply(record);
            }
        } else {
            rebuild_from_files(&inner)?;
        }

        info!(
            directory = %root.display(),
            geometries = inner.geometries.len(),
            tiles = inner.tiles.len(),
            journal_records = inner.journal_records.load(Ordering::Relaxed),
            "Cold cache opened"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    async fn read_entry<T>(&self, key: EntryKey, touch: bool) -> Option<(T, EntryMeta)>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let inner = &self.inner;
        let _guard = inner.stripe(&key).lock().await;

        let Some(meta) = inner.meta(&key) else {
            inner.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        let now = inner.clock.now_millis();
        if inner.is_expired(&key, &meta, now) {
            debug!(entry = %key, "Cold cache entry expired");
            inner.expired.fetch_add(1, Ordering::Relaxed);
            inner.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let task_inner = Arc::clone(inner);
        let result = tokio::task::spawn_blocking(move || match task_inner.read::<T>(&key) {
            Ok(value) => {
                let meta = if touch {
                    task_inner.touch(&key, now).unwrap_or(meta)
                } else {
                    meta
                };
                Some((value, meta))
            }
            Err(reason) => {
                task_inner.purge(&key, reason);
                None
            }
        })
        .await;

        match result {
            Ok(Some(found)) => {
                inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(found)
            }
            Ok(None) => {
                inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(error = %e, "Cold cache read task failed");
                inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn write_entry<T>(
        &self,
        key: EntryKey,
        value: T,
        fetched_at: i64,
        size_bytes: u64,
    ) -> Result<(), ColdCacheError>
    where
        T: Serialize + Send + 'static,
    {
        let _guard = self.inner.stripe(&key).lock().await;
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || -> Result<(), ColdCacheError> {
            let bytes = codec::encode(&value).map_err(ColdCacheError::Encode)?;
            let now = inner.clock.now_millis();
            let access_count = inner.meta(&key).map_or(0, |m| m.access_count);
            let meta = EntryMeta {
                fetched_at,
                last_accessed: now,
                access_count,
                stored_bytes: bytes.len() as u64,
                size_bytes,
            };

            // Indexed before the file lands so compaction never sees it as an orphan.
            inner.commit(key.put_record(meta))?;
            if let Err(e) = codec::write_atomic(&inner.path_for(&key), &bytes) {
                if let Err(undo) = inner.commit(key.remove_record()) {
                    warn!(entry = %key, error = %undo, "Failed to roll back cold cache write");
                }
                return Err(ColdCacheError::Io(e));
            }
            Ok(())
        })
        .await?
    }

    /// Read a geometry, updating its access statistics.
    pub async fn get_geometry(&self, id: &str) -> Option<AirspaceGeometry> {
        let (mut geometry, meta): (AirspaceGeometry, EntryMeta) = self
            .read_entry(EntryKey::Geometry(id.to_string()), true)
            .await?;
        geometry.access_count = meta.access_count;
        geometry.last_accessed = meta.last_accessed;
        Some(geometry)
    }

    /// Read a geometry without touching access statistics.
    pub async fn peek_geometry(&self, id: &str) -> Option<AirspaceGeometry> {
        let (mut geometry, meta): (AirspaceGeometry, EntryMeta) = self
            .read_entry(EntryKey::Geometry(id.to_string()), false)
            .await?;
        geometry.access_count = meta.access_count;
        geometry.last_accessed = meta.last_accessed;
        Some(geometry)
    }

    /// Read a tile mapping, updating its access statistics.
    pub async fn get_tile(&self, key: &TileKey) -> Option<TileMetadata> {
        self.read_entry(EntryKey::Tile(*key), true)
            .await
            .map(|(tile, _)| tile)
    }

    /// Insert or replace a geometry keyed by its id.
    pub async fn store_geometry(&self, geometry: &AirspaceGeometry) -> Result<(), ColdCacheError> {
        self.write_entry(
            EntryKey::Geometry(geometry.id.clone()),
            geometry.clone(),
            geometry.fetched_at,
            geometry.size_bytes,
        )
        .await
    }

    /// Insert or replace a tile mapping.
    pub async fn store_tile(&self, tile: &TileMetadata) -> Result<(), ColdCacheError> {
        self.write_entry(
            EntryKey::Tile(tile.key),
            tile.clone(),
            tile.fetched_at,
            tile.size_bytes(),
        )
        .await
    }

    pub fn geometry_meta(&self, id: &str) -> Option<EntryMeta> {
        self.inner.geometries.get(id).map(|m| *m)
    }

    pub fn tile_meta(&self, key: &TileKey) -> Option<EntryMeta> {
        self.inner.tiles.get(key).map(|m| *m)
    }

    /// Access statistics of every indexed geometry, most accessed first.
    pub fn access_statistics(&self) -> Vec<AccessRecord> {
        let now = self.inner.clock.now_millis();
        let mut records: Vec<AccessRecord> = self
            .inner
            .geometries
            .iter()
            .map(|e| {
                let key = EntryKey::Geometry(e.key().clone());
                AccessRecord {
                    id: e.key().clone(),
                    meta: *e.value(),
                    expired: self.inner.is_expired(&key, e.value(), now),
                }
            })
            .collect();
        records.sort_by(|a, b| {
            b.meta
                .access_count
                .cmp(&a.meta.access_count)
                .then_with(|| b.meta.last_accessed.cmp(&a.meta.last_accessed))
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Remove every expired entry, `batch_size` entries at a time, yielding
    /// to other tasks between batches.
    pub async fn delete_expired(&self, batch_size: usize) -> Result<SweepReport, ColdCacheError> {
        let now = self.inner.clock.now_millis();
        let mut expired: Vec<EntryKey> = self
            .inner
            .geometries
            .iter()
            .filter(|e| now.saturating_sub(e.value().fetched_at) >= self.inner.geometry_ttl_ms)
            .map(|e| EntryKey::Geometry(e.key().clone()))
            .collect();
        expired.extend(
            self.inner
                .tiles
                .iter()
                .filter(|e| now.saturating_sub(e.value().fetched_at) >= self.inner.tile_ttl_ms)
                .map(|e| EntryKey::Tile(*e.key())),
        );

        let mut report = SweepReport::default();
        for batch in expired.chunks(batch_size.max(1)) {
            for key in batch {
                let _guard = self.inner.stripe(key).lock().await;
                // Re-check: the entry may have been refreshed since the scan.
                match self.inner.meta(key) {
                    Some(meta) if self.inner.is_expired(key, &meta, now) => {}
                    _ => continue,
                }
                let inner = Arc::clone(&self.inner);
                let task_key = key.clone();
                let removed = tokio::task::spawn_blocking(move || inner.remove_entry(&task_key))
                    .await
                    .map_err(io::Error::other)
                    .and_then(|r| r);
                if let Err(e) = removed {
                    warn!(entry = %key, error = %e, "Failed to remove expired cold cache entry");
                    continue;
                }
                match key {
                    EntryKey::Geometry(_) => report.geometries_removed += 1,
                    EntryKey::Tile(_) => report.tiles_removed += 1,
                }
            }
            report.batches += 1;
            tokio::task::yield_now().await;
        }

        if report.geometries_removed + report.tiles_removed > 0 {
            debug!(
                geometries = report.geometries_removed,
                tiles = report.tiles_removed,
                "Removed expired cold cache entries"
            );
        }
        Ok(report)
    }

    /// Share of journal records superseded by later ones.
    pub fn fragmentation(&self) -> f64 {
        self.inner.fragmentation()
    }

    /// Rewrite the journal as a snapshot of live entries and delete
    /// payload files nothing refers to.
    pub async fn compact(&self) -> Result<CompactionReport, ColdCacheError> {
        let inner = Arc::clone(&self.inner);
        let report = tokio::task::spawn_blocking(move || -> Result<_, ColdCacheError> {
            let mut journal = inner.journal.lock();
            journal.flush()?;
            let records_before = journal.record_count();
            let snapshot = inner.snapshot_records();
            journal.rewrite(&snapshot)?;
            inner
                .journal_records
                .store(journal.record_count(), Ordering::Relaxed);
            let orphans_removed = inner.remove_orphans()?;
            Ok(CompactionReport {
                records_before,
                records_after: snapshot.len() as u64,
                orphans_removed,
            })
        })
        .await??;

        info!(
            records_before = report.records_before,
            records_after = report.records_after,
            orphans_removed = report.orphans_removed,
            "Cold cache compacted"
        );
        Ok(report)
    }

    /// Remove every entry.
    pub async fn clear(&self) -> Result<(), ColdCacheError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || -> Result<(), ColdCacheError> {
            let mut journal = inner.journal.lock();
            inner.apply(&JournalRecord::Clear);
            journal.rewrite(&[])?;
            inner.journal_records.store(0, Ordering::Relaxed);
            for dir in [&inner.geometry_dir, &inner.tile_dir] {
                std::fs::remove_dir_all(dir)?;
                std::fs::create_dir_all(dir)?;
            }
            Ok(())
        })
        .await??;
        info!("Cold cache cleared");
        Ok(())
    }

    /// Persist buffered journal records.
    pub async fn flush(&self) -> Result<(), ColdCacheError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.journal.lock().flush()).await??;
        Ok(())
    }

    pub fn stats(&self) -> ColdCacheStats {
        let inner = &self.inner;
        let (mut stored_bytes, mut content_bytes) = (0u64, 0u64);
        for m in inner.geometries.iter() {
            stored_bytes += m.stored_bytes;
            content_bytes += m.size_bytes;
        }
        for m in inner.tiles.iter() {
            stored_bytes += m.stored_bytes;
            content_bytes += m.size_bytes;
        }
        ColdCacheStats {
            geometry_entries: inner.geometries.len(),
            tile_entries: inner.tiles.len(),
            stored_bytes,
            content_bytes,
            hits: inner.hits.load(Ordering::Relaxed),
            misses: inner.misses.load(Ordering::Relaxed),
            expired: inner.expired.load(Ordering::Relaxed),
            corruptions: inner.corruptions.load(Ordering::Relaxed),
            journal_records: inner.journal_records.load(Ordering::Relaxed),
            fragmentation: inner.fragmentation(),
        }
    }
}

fn remove_temp_files(dir: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path
            .extension()
            .is_some_and(|ext| ext == codec::TEMP_EXTENSION)
        {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Rebuild the index by decoding every payload file, then write a fresh
/// journal snapshot. Unreadable files are deleted.
fn rebuild_from_files(inner: &ColdInner) -> Result<(), ColdCacheError> {
    for entry in std::fs::read_dir(&inner.geometry_dir)? {
        let path = entry?.path();
        let decoded = std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                codec::decode::<AirspaceGeometry>(&bytes).map(|g| (g, bytes.len() as u64))
            });
        match decoded {
            Ok((g, stored_bytes)) => {
                inner.geometries.insert(
                    g.id.clone(),
                    EntryMeta {
                        fetched_at: g.fetched_at,
                        last_accessed: g.last_accessed,
                        access_count: g.access_count,
                        stored_bytes,
                        size_bytes: g.size_bytes,
                    },
                );
            }
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "Deleting unreadable geometry file");
                std::fs::remove_file(&path)?;
            }
        }
    }

    for entry in std::fs::read_dir(&inner.tile_dir)? {
        let path = entry?.path();
        let decoded = std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                codec::decode::<TileMetadata>(&bytes).map(|t| (t, bytes.len() as u64))
            });
        match decoded {
            Ok((t, stored_bytes)) => {
                inner.tiles.insert(
                    t.key,
                    EntryMeta {
                        fetched_at: t.fetched_at,
                        last_accessed: t.fetched_at,
                        access_count: 0,
                        stored_bytes,
                        size_bytes: t.size_bytes(),
                    },
                );
            }
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "Deleting unreadable tile file");
                std::fs::remove_file(&path)?;
            }
        }
    }

    let mut journal = inner.journal.lock();
    journal.rewrite(&inner.snapshot_records())?;
    inner
        .journal_records
        .store(journal.record_count(), Ordering::Relaxed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AirspaceClass, Ring, VerticalLimit};
    use crate::time::ManualClock;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn geometry(id: &str, fetched_at: i64) -> AirspaceGeometry {
        AirspaceGeometry::new(
            id,
            format!("{} name", id),
            AirspaceClass::D,
            VerticalLimit::ground(),
            VerticalLimit::feet_msl(3000.0),
            vec![Ring::from_lon_lat(&[
                (7.0, 46.0),
                (7.5, 46.0),
                (7.5, 46.5),
                (7.0, 46.5),
            ])],
            fetched_at,
        )
    }

    fn tile(lat: i64, ids: &[&str], fetched_at: i64) -> TileMetadata {
        TileMetadata::new(
            TileKey {
                step_micro: 500_000,
                lat_index: lat,
                lon_index: 14,
            },
            ids.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            fetched_at,
        )
    }

    async fn open(dir: &TempDir, clock: Arc<ManualClock>) -> ColdCache {
        ColdCache::open(&ColdCacheConfig::new(dir.path()), clock)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_and_get_geometry() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let cold = open(&dir, clock.clone()).await;

        let g = geometry("LSGG", 1_000);
        cold.store_geometry(&g).await.unwrap();

        clock.advance(Duration::from_secs(5));
        let read = cold.get_geometry("LSGG").await.unwrap();
        assert_eq!(read.content_digest(), g.content_digest());
        assert_eq!(read.access_count, 1);
        assert_eq!(read.last_accessed, 6_000);

        let read = cold.get_geometry("LSGG").await.unwrap();
        assert_eq!(read.access_count, 2);

        let peeked = cold.peek_geometry("LSGG").await.unwrap();
        assert_eq!(peeked.access_count, 2);
        assert_eq!(cold.geometry_meta("LSGG").unwrap().access_count, 2);

        assert!(cold.get_geometry("missing").await.is_none());
        let stats = cold.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let dir = TempDir::new().unwrap();
        let cold = open(&dir, Arc::new(ManualClock::new(0))).await;
        cold.store_geometry(&geometry("A", 0)).await.unwrap();
        let mut changed = geometry("A", 0);
        changed.name = "renamed".into();
        cold.store_geometry(&changed).await.unwrap();

        assert_eq!(cold.get_geometry("A").await.unwrap().name, "renamed");
        assert_eq!(cold.stats().geometry_entries, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_logical_miss() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cold = open(&dir, clock.clone()).await;

        cold.store_geometry(&geometry("A", 0)).await.unwrap();
        cold.store_tile(&tile(92, &["A"], 0)).await.unwrap();

        clock.advance(DAY + Duration::from_secs(1));
        assert!(cold.get_tile(&tile(92, &[], 0).key).await.is_none());
        assert!(cold.get_geometry("A").await.is_some());
        // Still physically present until swept.
        assert_eq!(cold.stats().tile_entries, 1);

        clock.advance(7 * DAY);
        assert!(cold.get_geometry("A").await.is_none());
        assert_eq!(cold.stats().expired, 2);
    }

    #[tokio::test]
    async fn test_delete_expired_in_batches() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cold = open(&dir, clock.clone()).await;

        for i in 0..5 {
            cold.store_tile(&tile(i, &[], 0)).await.unwrap();
        }
        cold.store_geometry(&geometry("A", 0)).await.unwrap();
        clock.advance(2 * DAY);
        cold.store_tile(&tile(50, &[], clock.now_millis())).await.unwrap();

        let report = cold.delete_expired(2).await.unwrap();
        assert_eq!(report.tiles_removed, 5);
        assert_eq!(report.geometries_removed, 0);
        assert_eq!(report.batches, 3);
        assert_eq!(cold.stats().tile_entries, 1);
        assert_eq!(std::fs::read_dir(dir.path().join(TILE_DIR)).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_delete_expired_continues_past_failed_removal() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cold = open(&dir, clock.clone()).await;

        for i in 0..3 {
            cold.store_tile(&tile(i, &[], 0)).await.unwrap();
        }
        // A directory where the payload file should be cannot be unlinked.
        let stuck = dir
            .path()
            .join(TILE_DIR)
            .join(codec::tile_file_name(&tile(1, &[], 0).key));
        std::fs::remove_file(&stuck).unwrap();
        std::fs::create_dir(&stuck).unwrap();
        std::fs::write(stuck.join("keep"), b"x").unwrap();

        clock.advance(2 * DAY);
        let report = cold.delete_expired(10).await.unwrap();
        assert_eq!(report.tiles_removed, 2);
        assert!(cold.tile_meta(&tile(0, &[], 0).key).is_none());
        assert!(cold.tile_meta(&tile(2, &[], 0).key).is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_purged() {
        let dir = TempDir::new().unwrap();
        let cold = open(&dir, Arc::new(ManualClock::new(0))).await;
        cold.store_geometry(&geometry("A", 0)).await.unwrap();

        let path = dir
            .path()
            .join(GEOMETRY_DIR)
            .join(codec::geometry_file_name("A"));
        std::fs::write(&path, b"garbage").unwrap();

        assert!(cold.get_geometry("A").await.is_none());
        assert!(!path.exists());
        assert!(cold.geometry_meta("A").is_none());
        assert_eq!(cold.stats().corruptions, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_purged() {
        let dir = TempDir::new().unwrap();
        let cold = open(&dir, Arc::new(ManualClock::new(0))).await;
        let t = tile(1, &["A"], 0);
        cold.store_tile(&t).await.unwrap();
        std::fs::remove_dir_all(dir.path().join(TILE_DIR)).unwrap();
        std::fs::create_dir_all(dir.path().join(TILE_DIR)).unwrap();

        assert!(cold.get_tile(&t.key).await.is_none());
        assert!(cold.tile_meta(&t.key).is_none());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let cold = open(&dir, clock.clone()).await;
            cold.store_geometry(&geometry("A", 0)).await.unwrap();
            cold.store_tile(&tile(3, &["A"], 0)).await.unwrap();
            cold.get_geometry("A").await.unwrap();
            cold.flush().await.unwrap();
        }

        let cold = open(&dir, clock).await;
        assert_eq!(cold.geometry_meta("A").unwrap().access_count, 1);
        let t = cold.get_tile(&tile(3, &[], 0).key).await.unwrap();
        assert!(t.airspace_ids.contains("A"));
    }

    #[tokio::test]
    async fn test_rebuild_without_journal() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let cold = open(&dir, clock.clone()).await;
            cold.store_geometry(&geometry("A", 0)).await.unwrap();
            cold.store_geometry(&geometry("B", 0)).await.unwrap();
            cold.store_tile(&tile(3, &["A", "B"], 0)).await.unwrap();
        }
        std::fs::remove_file(dir.path().join(JOURNAL_FILE)).unwrap();
        std::fs::write(dir.path().join(GEOMETRY_DIR).join("junk.geo"), b"xx").unwrap();

        let cold = open(&dir, clock).await;
        let stats = cold.stats();
        assert_eq!(stats.geometry_entries, 2);
        assert_eq!(stats.tile_entries, 1);
        assert_eq!(stats.journal_records, 3);
        assert!(!dir.path().join(GEOMETRY_DIR).join("junk.geo").exists());
    }

    #[tokio::test]
    async fn test_compaction_reduces_fragmentation() {
        let dir = TempDir::new().unwrap();
        let cold = open(&dir, Arc::new(ManualClock::new(0))).await;
        cold.store_geometry(&geometry("A", 0)).await.unwrap();
        for _ in 0..9 {
            cold.get_geometry("A").await.unwrap();
        }
        assert!((cold.fragmentation() - 0.9).abs() < 1e-9);

        std::fs::write(dir.path().join(GEOMETRY_DIR).join("orphan.geo"), b"x").unwrap();
        let report = cold.compact().await.unwrap();
        assert_eq!(report.records_before, 10);
        assert_eq!(report.records_after, 1);
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(cold.fragmentation(), 0.0);
        assert_eq!(cold.geometry_meta("A").unwrap().access_count, 9);
    }

    #[tokio::test]
    async fn test_access_statistics_order() {
        let dir = TempDir::new().unwrap();
        let cold = open(&dir, Arc::new(ManualClock::new(0))).await;
        cold.store_geometry(&geometry("A", 0)).await.unwrap();
        cold.store_geometry(&geometry("B", 0)).await.unwrap();
        cold.get_geometry("B").await.unwrap();

        let stats = cold.access_statistics();
        assert_eq!(stats[0].id, "B");
        assert_eq!(stats[0].meta.access_count, 1);
        assert!(!stats[0].expired);
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let cold = open(&dir, Arc::new(ManualClock::new(0))).await;
        cold.store_geometry(&geometry("A", 0)).await.unwrap();
        cold.store_tile(&tile(1, &["A"], 0)).await.unwrap();
        cold.clear().await.unwrap();

        assert!(cold.get_geometry("A").await.is_none());
        let stats = cold.stats();
        assert_eq!(stats.geometry_entries + stats.tile_entries, 0);
        assert_eq!(std::fs::read_dir(dir.path().join(GEOMETRY_DIR)).unwrap().count(), 0);
    }
}
