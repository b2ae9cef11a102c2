//! Two-tier frame cache keyed by `FrameKey`.
//!
//! Tiers:
//! - memory: `BTreeMap<FrameKey, FrameImage>` of decoded frames, ordered by
//!   timestamp so age eviction is a single `split_off`
//! - disk: one encoded file per key in the cache directory, named
//!   `<YYYY-MM-DD_HH-MM>_<source>.<format>`
//!
//! Lookup order is memory, then disk (decode + promote), then network through
//! the `Fetcher` (store, decode, promote). Only one thread fetches a given key
//! at a time; other callers for that key wait on a condvar and re-read memory.
//! When the load fails, the waiters share that miss instead of retrying it one
//! after another; the next caller that did not wait starts a fresh load.
//!
//! Disk eviction compares the fixed-width timestamp prefix of file names as
//! strings. Memory eviction compares timestamps. The passes are independent:
//! a decoded frame outlives its file until memory eviction reaches it.
//! A load that finishes after an eviction cutoff passed its key is returned
//! but not kept in memory.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, trace, warn};

use crate::core::clock::Clock;
use crate::core::fetcher::Fetcher;
use crate::core::observer::StatusObserver;
use crate::entities::{FILE_STAMP_FORMAT, FILE_STAMP_LEN, FrameImage, FrameKey, Source, SourceCatalog};
use crate::error::{FetchError, RadarError, Result};

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

impl CacheStats {
    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    pub fn disk_hits(&self) -> u64 {
        self.disk_hits.load(Ordering::Relaxed)
    }

    /// Successful network fetches.
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Failed network fetches (including undersized or undecodable payloads).
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits() + self.disk_hits();
        let total = hits + self.fetches() + self.failures();
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What one `evict_older_than` call removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub files: usize,
    pub decoded: usize,
}

#[derive(Debug, Default)]
struct Tiers {
    memory: BTreeMap<FrameKey, FrameImage>,
    in_flight: HashSet<FrameKey>,
    /// Last failure per key, for callers that waited on the failed load.
    misses: BTreeMap<FrameKey, String>,
    /// Latest memory eviction cutoff.
    evicted_before: Option<DateTime<Utc>>,
}

pub struct ImageCache {
    dir: PathBuf,
    catalog: Arc<SourceCatalog>,
    fetcher: Fetcher,
    observer: Arc<dyn StatusObserver>,
    clock: Arc<dyn Clock>,
    tiers: Mutex<Tiers>,
    settled: Condvar,
    stats: CacheStats,
}

/// Releases an in-flight claim and wakes waiters, on every exit path.
struct Claim<'a> {
    cache: &'a ImageCache,
    key: &'a FrameKey,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.cache.tiers().in_flight.remove(self.key);
        self.cache.settled.notify_all();
    }
}

impl ImageCache {
    /// Create the cache, creating `dir` if needed.
    pub fn new(
        dir: impl Into<PathBuf>,
        catalog: Arc<SourceCatalog>,
        fetcher: Fetcher,
        observer: Arc<dyn StatusObserver>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| RadarError::io(&dir, e))?;
        debug!("ImageCache at {} ({} sources)", dir.display(), catalog.len());

        Ok(Self {
            dir,
            catalog,
            fetcher,
            observer,
            clock,
            tiers: Mutex::new(Tiers::default()),
            settled: Condvar::new(),
            stats: CacheStats::default(),
        })
    }

    fn tiers(&self) -> MutexGuard<'_, Tiers> {
        self.tiers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog(&self) -> &Arc<SourceCatalog> {
        &self.catalog
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Path of the disk artifact for `key`.
    pub fn path_for(&self, source: &Source, key: &FrameKey) -> PathBuf {
        self.dir.join(key.file_name(&source.format))
    }

    /// Return the frame for `key`, fetching it if neither tier has it.
    ///
    /// - `Ok(Some(image))`: available
    /// - `Ok(None)`: fetch failed and `allow_fetch_errors` was set (silent probe)
    /// - `Err(FetchFailed | Decode | Io)`: fetch failed and errors were not
    ///   allowed; the observer has been told
    ///
    /// A caller that waited on another thread's load of `key` gets that load's
    /// outcome: a failure is not retried by each waiter in turn.
    pub fn get_or_fetch(&self, key: &FrameKey, allow_fetch_errors: bool) -> Result<Option<FrameImage>> {
        {
            let mut tiers = self.tiers();
            let mut waited = false;
            loop {
                if let Some(image) = tiers.memory.get(key) {
                    CacheStats::bump(&self.stats.memory_hits);
                    trace!("Memory hit: {}", key);
                    return Ok(Some(image.clone()));
                }
                if !tiers.in_flight.contains(key) {
                    if waited && let Some(reason) = tiers.misses.get(key).cloned() {
                        drop(tiers);
                        return self.shared_miss(key, reason, allow_fetch_errors);
                    }
                    tiers.misses.remove(key);
                    tiers.in_flight.insert(key.clone());
                    break;
                }
                trace!("Waiting for in-flight load of {}", key);
                waited = true;
                tiers = self.settled.wait(tiers).unwrap_or_else(|e| e.into_inner());
            }
        }

        // Released after the outcome is recorded, so woken waiters see it
        let _claim = Claim { cache: self, key };
        match self.load(key) {
            Ok(image) => {
                let mut tiers = self.tiers();
                if tiers.evicted_before.is_some_and(|cutoff| key.timestamp < cutoff) {
                    debug!("{} was evicted while loading, not keeping it", key);
                } else {
                    tiers.memory.insert(key.clone(), image.clone());
                }
                Ok(Some(image))
            }
            Err(failure) if failure.is_slot_local() => {
                self.tiers().misses.insert(key.clone(), failure.to_string());
                self.miss(key, failure, allow_fetch_errors)
            }
            Err(e) => Err(e),
        }
    }

    /// Disk, then network. Caller holds the in-flight claim for `key`.
    fn load(&self, key: &FrameKey) -> Result<FrameImage> {
        let source = self.catalog.require(&key.source_id)?;
        let path = self.path_for(source, key);

        if path.is_file() {
            let bytes = fs::read(&path).map_err(|e| RadarError::io(&path, e))?;
            match FrameImage::decode(&bytes) {
                Ok(image) => {
                    CacheStats::bump(&self.stats.disk_hits);
                    trace!("Disk hit: {}", key);
                    return Ok(image);
                }
                Err(e) => {
                    warn!("Discarding undecodable cache file {}: {}", path.display(), e);
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let url = source.url_for(key.timestamp)?;
        self.observer.downloading(true);
        let downloaded = self.fetcher.download(&url, &path);
        self.observer.downloading(false);

        let failure = match downloaded {
            Ok(bytes) => match FrameImage::decode(&bytes) {
                Ok(image) => {
                    CacheStats::bump(&self.stats.fetches);
                    return Ok(image);
                }
                Err(e) => {
                    let _ = fs::remove_file(&path);
                    RadarError::Decode { path, source: e }
                }
            },
            Err(e) => RadarError::FetchFailed { url, source: e },
        };
        CacheStats::bump(&self.stats.failures);
        Err(failure)
    }

    /// The miss a waiter inherits from the load it waited on.
    fn shared_miss(&self, key: &FrameKey, reason: String, allow_fetch_errors: bool) -> Result<Option<FrameImage>> {
        let source = self.catalog.require(&key.source_id)?;
        let failure = RadarError::FetchFailed {
            url: source.url_for(key.timestamp)?,
            source: FetchError::Concurrent(reason),
        };
        self.miss(key, failure, allow_fetch_errors)
    }

    fn miss(&self, key: &FrameKey, failure: RadarError, allow_fetch_errors: bool) -> Result<Option<FrameImage>> {
        if allow_fetch_errors {
            trace!("Probe miss for {}: {}", key, failure);
            Ok(None)
        } else {
            warn!("{}", failure);
            self.observer.error(&failure.to_string());
            Err(failure)
        }
    }

    /// True if `key` is in either tier. No I/O beyond a stat.
    pub fn contains(&self, key: &FrameKey) -> bool {
        if self.tiers().memory.contains_key(key) {
            return true;
        }
        self.catalog
            .get(&key.source_id)
            .is_some_and(|source| self.path_for(source, key).is_file())
    }

    pub fn is_decoded(&self, key: &FrameKey) -> bool {
        self.tiers().memory.contains_key(key)
    }

    /// Number of decoded frames in memory.
    pub fn len(&self) -> usize {
        self.tiers().memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers().memory.is_empty()
    }

    /// Pixel bytes held by decoded frames.
    pub fn memory_bytes(&self) -> usize {
        self.tiers().memory.values().map(FrameImage::mem).sum()
    }

    /// Drop all decoded frames. Disk files stay.
    pub fn clear_memory(&self) {
        let mut tiers = self.tiers();
        let count = tiers.memory.len();
        tiers.memory.clear();
        tiers.misses.clear();
        debug!("Cleared {} decoded frames", count);
    }

    /// Remove disk files and decoded frames strictly older than `now - max_age`.
    pub fn evict_older_than(&self, max_age: TimeDelta) -> Result<Eviction> {
        let cutoff = self.clock.now() - max_age;
        let files = self.evict_files_before(&cutoff.format(FILE_STAMP_FORMAT).to_string())?;

        let decoded = {
            let mut tiers = self.tiers();
            let floor = FrameKey::floor(cutoff);
            tiers.evicted_before = Some(tiers.evicted_before.map_or(cutoff, |prev| prev.max(cutoff)));
            let misses = tiers.misses.split_off(&floor);
            tiers.misses = misses;
            let keep = tiers.memory.split_off(&floor);
            std::mem::replace(&mut tiers.memory, keep).len()
        };

        if files > 0 || decoded > 0 {
            debug!(
                "Evicted {} files and {} decoded frames older than {}",
                files, decoded, cutoff
            );
        }
        Ok(Eviction { files, decoded })
    }

    /// Disk pass: remove files whose timestamp prefix sorts before `cutoff_stamp`.
    fn evict_files_before(&self, cutoff_stamp: &str) -> Result<usize> {
        let entries = fs::read_dir(&self.dir).map_err(|e| RadarError::io(&self.dir, e))?;
        let mut removed = 0;

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Partial downloads belong to their writer
            if name.starts_with('.') {
                continue;
            }
            let Some(stamp) = name.get(..FILE_STAMP_LEN) else { continue };
            if stamp < cutoff_stamp {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Cannot evict {}: {}", entry.path().display(), e),
                }
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("dir", &self.dir)
            .field("decoded", &self.len())
            .finish_non_exhaustive()
    }
}
