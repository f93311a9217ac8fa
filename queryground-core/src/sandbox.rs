// queryground-core/src/sandbox.rs
// Ephemeral database cache and lifecycle management

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::engine::DocumentStore;
use crate::error::Result;
use crate::{log_debug, log_info, log_warn};

/// Cached state of one built database, keyed by its config hash
#[derive(Debug, Clone)]
pub struct SandboxEntry {
    /// sorted collection names of the dataset
    pub collections: Vec<String>,
    /// the build produced no documents at all
    pub empty_database: bool,
    last_used: Instant,
}

impl SandboxEntry {
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.binary_search_by(|c| c.as_str().cmp(name)).is_ok()
    }
}

/// Counters exposed for logging and the stats endpoint of embedders
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub active_databases: usize,
    pub hits: u64,
    pub builds: u64,
}

/// Tracks which sandbox databases exist in the engine and when they
/// were last touched.
///
/// A single global lock is held across the whole check/build/store
/// sequence: builds are capped in size so the crude serialization is
/// cheaper than per-hash coordination, and it makes the cache states
/// trivially race-free (a hash is either absent, or ready).
#[derive(Default)]
pub struct SandboxCache {
    entries: Mutex<HashMap<String, SandboxEntry>>,
    hits: AtomicU64,
    builds: AtomicU64,
}

impl SandboxCache {
    pub fn new() -> SandboxCache {
        SandboxCache::default()
    }

    /// Return the cached entry for `hash`, building it if needed.
    ///
    /// The builder closure returns the sorted collection names and
    /// whether the dataset is empty. Caching rules:
    /// - a cache hit refreshes the last-used stamp,
    /// - a normal build of an empty dataset is returned but NOT cached,
    ///   so the hash stays cheap to retry once the config has data,
    /// - a forced build (`force`) always replaces and caches the entry,
    /// - a failed build is never cached and evicts any stale entry.
    pub fn get_or_build<F>(&self, hash: &str, force: bool, build: F) -> Result<SandboxEntry>
    where
        F: FnOnce() -> Result<(Vec<String>, bool)>,
    {
        let mut entries = self.entries.lock();

        if !force {
            if let Some(entry) = entries.get_mut(hash) {
                entry.last_used = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                log_debug!("cache hit for database {}", hash);
                return Ok(entry.clone());
            }
        }

        // build under the lock so concurrent callers of the same hash
        // never build twice
        let (collections, empty_database) = match build() {
            Ok(outcome) => outcome,
            Err(err) => {
                entries.remove(hash);
                return Err(err);
            }
        };
        self.builds.fetch_add(1, Ordering::Relaxed);

        let entry = SandboxEntry {
            collections,
            empty_database,
            last_used: Instant::now(),
        };
        if force || !empty_database {
            entries.insert(hash.to_string(), entry.clone());
        }
        Ok(entry)
    }

    /// Drop one database and forget its entry right away, used for
    /// throwaway builds that must not outlive a single query.
    pub fn discard(&self, engine: &dyn DocumentStore, hash: &str) {
        let mut entries = self.entries.lock();
        entries.remove(hash);
        if let Err(err) = engine.drop_database(hash) {
            log_warn!("fail to drop database {}: {}", hash, err);
        }
    }

    /// Drop every database unused for longer than `retention` and
    /// forget its entry. Runs under the same lock as `get_or_build` so
    /// an in-flight build can't race with its own eviction.
    pub fn sweep(&self, engine: &dyn DocumentStore, retention: Duration) -> usize {
        let started = Instant::now();
        let mut entries = self.entries.lock();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| started.duration_since(e.last_used) > retention)
            .map(|(hash, _)| hash.clone())
            .collect();

        for hash in &expired {
            if let Err(err) = engine.drop_database(hash) {
                log_warn!("fail to drop database {}: {}", hash, err);
            }
            entries.remove(hash);
        }

        log_info!(
            "cleanup: removed {} database(s) in {:?}, {} still active",
            expired.len(),
            started.elapsed(),
            entries.len()
        );
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            active_databases: self.entries.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
        }
    }
}
