//! Bounded LRU cache of ranked results.
//!
//! Keyed by (normalized query, context fingerprint, result limit). Each entry
//! remembers which buckets its candidates came from so a new pattern only
//! invalidates the entries it could have changed.
//!
//! Every invalidation bumps a generation counter. A retrieval captures the
//! generation before computing and only populates the cache if nothing was
//! invalidated in between, so a slow read cannot reinsert a ranking that a
//! concurrent write already made stale.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use super::index::normalize;
use super::rank::RankedPattern;
use super::types::PatternId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    query: String,
    context_fingerprint: u64,
    max_results: usize,
}

impl CacheKey {
    pub fn new(query: &str, context_fingerprint: u64, max_results: usize) -> Self {
        Self {
            query: normalize(query),
            context_fingerprint,
            max_results,
        }
    }
}

struct CacheEntry {
    results: Vec<RankedPattern>,
    buckets: Vec<usize>,
}

impl CacheEntry {
    fn contains(&self, id: PatternId) -> bool {
        self.results.iter().any(|r| r.pattern.id == id)
    }
}

pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached ranking for `key`, promoting it to most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<RankedPattern>> {
        match self.entries.lock().get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.results.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Current invalidation generation, captured before computing a ranking.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Insert unless an invalidation happened since `generation` was read.
    /// Evicts the least recently used entry when full. Returns whether it stored.
    pub fn put(
        &self,
        key: CacheKey,
        results: Vec<RankedPattern>,
        buckets: Vec<usize>,
        generation: u64,
    ) -> bool {
        let mut entries = self.entries.lock();
        // checked under the lock; invalidations bump the generation while holding it
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        if let Some((evicted, _)) = entries.push(key.clone(), CacheEntry { results, buckets }) {
            if evicted != key {
                trace!(query = %evicted.query, "cache entry evicted");
            }
        }
        true
    }

    /// Drop every entry whose results include `id`. Returns how many were dropped.
    pub fn invalidate_pattern(&self, id: PatternId) -> usize {
        self.invalidate_where(|entry| entry.contains(id))
    }

    /// Drop every entry that probed `bucket`.
    pub fn invalidate_bucket(&self, bucket: usize) -> usize {
        self.invalidate_where(|entry| entry.buckets.contains(&bucket))
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    fn invalidate_where(&self, stale: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| stale(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
