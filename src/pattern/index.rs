//! N-gram hash index mapping text to a fixed-size table of candidate buckets.
//!
//! Text is normalized (lower-cased, whitespace collapsed), split into overlapping
//! character n-grams, each n-gram is hashed with xxh3, and the hashes are XOR-folded
//! into one digest. The digest modulo the bucket count picks the slot.
//!
//! Lookups probe the query's bucket plus its two neighbours. Similar texts with
//! different n-gram sets will usually land in unrelated buckets; recall is traded
//! for constant-time lookup and is not an error condition.

use dashmap::DashMap;
use rusqlite::params;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::store::PatternStore;
use super::types::{Pattern, PatternId};
use crate::db::{migrations, SharedConnection};
use crate::error::{MotifError, Result};

/// Lower-case and collapse runs of whitespace to single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Distinct overlapping character n-grams of the normalized text.
///
/// Text shorter than `n` yields itself as the only gram; empty text yields none.
pub fn ngrams(text: &str, n: usize) -> BTreeSet<String> {
    let n = n.max(1);
    let normalized = normalize(text);
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return BTreeSet::new();
    }
    if chars.len() <= n {
        return BTreeSet::from([normalized]);
    }
    chars
        .windows(n)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// XOR-fold of the xxh3 hashes of every distinct n-gram.
pub fn text_digest(text: &str, n: usize) -> u64 {
    ngrams(text, n)
        .iter()
        .fold(0u64, |acc, gram| acc ^ xxh3_64(gram.as_bytes()))
}

/// Candidate ids for a query, with the buckets they were drawn from.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub ids: Vec<PatternId>,
    /// Probed buckets, primary first.
    pub buckets: Vec<usize>,
}

/// Outcome of loading the persisted bucket table at startup.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub indexed: usize,
    pub rebuilt: bool,
    pub corrupt_buckets: Vec<usize>,
}

/// Fixed-size bucket table of pattern ids.
///
/// Only occupied slots are materialized, but the slot count is fixed at
/// construction. Ids in a bucket keep insertion order and are unique.
pub struct HashIndexer {
    buckets: DashMap<usize, Vec<PatternId>>,
    bucket_count: usize,
    ngram_size: usize,
    db: Option<SharedConnection>,
}

impl HashIndexer {
    pub fn new(bucket_count: usize, ngram_size: usize) -> Self {
        Self {
            buckets: DashMap::new(),
            bucket_count: bucket_count.max(1),
            ngram_size: ngram_size.max(1),
            db: None,
        }
    }

    /// An indexer that mirrors every bucket change into the `pattern_index` table.
    pub fn with_database(bucket_count: usize, ngram_size: usize, db: SharedConnection) -> Self {
        Self {
            db: Some(db),
            ..Self::new(bucket_count, ngram_size)
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn ngram_size(&self) -> usize {
        self.ngram_size
    }

    pub fn bucket_of(&self, hash_key: u64) -> usize {
        (hash_key % self.bucket_count as u64) as usize
    }

    /// Insert `pattern.id` into the bucket for its hash key. Returns the bucket.
    ///
    /// The in-memory table is updated first; if persisting the row fails the id
    /// is still retrievable and the persisted table is repaired on next startup.
    pub fn index(&self, pattern: &Pattern) -> Result<usize> {
        let bucket = self.bucket_of(pattern.hash_key());
        self.insert_in_memory(bucket, pattern.id);
        debug!(pattern_id = %pattern.id, bucket, "pattern indexed");
        if let Some(db) = &self.db {
            db.lock().execute(
                "INSERT OR IGNORE INTO pattern_index (bucket, pattern_id) VALUES (?1, ?2)",
                params![bucket as i64, pattern.id.0 as i64],
            )?;
        }
        Ok(bucket)
    }

    fn insert_in_memory(&self, bucket: usize, id: PatternId) {
        let mut slot = self.buckets.entry(bucket).or_default();
        if !slot.contains(&id) {
            slot.push(id);
        }
    }

    /// Up to `max_candidates` ids from the query's bucket, then its -1 and +1
    /// neighbours, each in insertion order.
    pub fn candidates(&self, query: &str, max_candidates: usize) -> Candidates {
        let primary = self.bucket_of(text_digest(query, self.ngram_size));
        let below = (primary + self.bucket_count - 1) % self.bucket_count;
        let above = (primary + 1) % self.bucket_count;

        let mut probed = Vec::with_capacity(3);
        for bucket in [primary, below, above] {
            if !probed.contains(&bucket) {
                probed.push(bucket);
            }
        }

        let mut ids = Vec::new();
        'probe: for bucket in &probed {
            if let Some(slot) = self.buckets.get(bucket) {
                for id in slot.iter() {
                    if ids.len() >= max_candidates {
                        break 'probe;
                    }
                    if !ids.contains(id) {
                        ids.push(*id);
                    }
                }
            }
        }

        Candidates {
            ids,
            buckets: probed,
        }
    }

    /// Remove `id` from the bucket for `hash_key`. A no-op if it is not there.
    pub fn remove(&self, id: PatternId, hash_key: u64) -> Result<()> {
        if let Some(db) = &self.db {
            db.lock().execute(
                "DELETE FROM pattern_index WHERE pattern_id = ?1",
                params![id.0 as i64],
            )?;
        }
        let bucket = self.bucket_of(hash_key);
        if let Some(mut slot) = self.buckets.get_mut(&bucket) {
            slot.retain(|existing| *existing != id);
        }
        self.buckets.remove_if(&bucket, |_, slot| slot.is_empty());
        Ok(())
    }

    /// Ids currently held in `bucket`, in insertion order.
    pub fn bucket(&self, bucket: usize) -> Vec<PatternId> {
        self.buckets
            .get(&bucket)
            .map(|slot| slot.clone())
            .unwrap_or_default()
    }

    pub fn occupied_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of indexed ids.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|slot| slot.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Load the persisted bucket table and check it against the content table.
    ///
    /// Falls back to a full rebuild when the table was written with different
    /// index parameters or when any bucket is inconsistent.
    pub fn restore(&self, store: &PatternStore) -> Result<RestoreReport> {
        let Some(db) = &self.db else {
            let indexed = self.rebuild(store)?;
            return Ok(RestoreReport {
                indexed,
                rebuilt: true,
                corrupt_buckets: Vec::new(),
            });
        };

        let rows: Vec<(usize, PatternId)> = {
            let conn = db.lock();
            let stored = migrations::get_index_params(&conn)?;
            if stored != Some((self.bucket_count, self.ngram_size)) {
                info!(
                    stored = ?stored,
                    bucket_count = self.bucket_count,
                    ngram_size = self.ngram_size,
                    "index parameters changed or missing, rebuilding bucket table"
                );
                drop(conn);
                let indexed = self.rebuild(store)?;
                return Ok(RestoreReport {
                    indexed,
                    rebuilt: true,
                    corrupt_buckets: Vec::new(),
                });
            }

            let mut stmt = conn.prepare(
                "SELECT bucket, pattern_id FROM pattern_index ORDER BY bucket, pattern_id",
            )?;
            let collected = stmt
                .query_map([], |row| {
                    let bucket: i64 = row.get(0)?;
                    let id: i64 = row.get(1)?;
                    Ok((bucket as usize, PatternId(id as u64)))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            collected
        };

        self.buckets.clear();
        for (bucket, id) in rows {
            self.insert_in_memory(bucket, id);
        }

        let problems = self.verify(store);
        if problems.is_empty() {
            let indexed = self.len();
            info!(indexed, buckets = self.occupied_buckets(), "bucket table loaded");
            return Ok(RestoreReport {
                indexed,
                rebuilt: false,
                corrupt_buckets: Vec::new(),
            });
        }

        let mut corrupt_buckets = Vec::with_capacity(problems.len());
        for problem in &problems {
            warn!(error = %problem, "bucket table inconsistent with content table");
            if let MotifError::IndexCorruption { bucket, .. } = problem {
                corrupt_buckets.push(*bucket);
            }
        }
        let indexed = self.rebuild(store)?;
        Ok(RestoreReport {
            indexed,
            rebuilt: true,
            corrupt_buckets,
        })
    }

    /// One [`MotifError::IndexCorruption`] per bucket that disagrees with the store.
    pub fn verify(&self, store: &PatternStore) -> Vec<MotifError> {
        let mut problems: BTreeMap<usize, String> = BTreeMap::new();

        for slot in self.buckets.iter() {
            let bucket = *slot.key();
            for id in slot.value() {
                match store.get(*id) {
                    Err(_) => {
                        problems
                            .entry(bucket)
                            .or_insert_with(|| format!("references missing pattern {id}"));
                    }
                    Ok(pattern) => {
                        let expected = self.bucket_of(pattern.hash_key());
                        if expected != bucket {
                            problems.entry(bucket).or_insert_with(|| {
                                format!("pattern {id} belongs in bucket {expected}")
                            });
                        }
                    }
                }
            }
        }

        for pattern in store.snapshot() {
            let bucket = self.bucket_of(pattern.hash_key());
            let present = self
                .buckets
                .get(&bucket)
                .is_some_and(|slot| slot.contains(&pattern.id));
            if !present {
                problems
                    .entry(bucket)
                    .or_insert_with(|| {
                        format!("pattern {} is missing from its bucket", pattern.id)
                    });
            }
        }

        problems
            .into_iter()
            .map(|(bucket, details)| MotifError::IndexCorruption { bucket, details })
            .collect()
    }

    /// Drop every bucket and re-derive the table from the content table.
    pub fn rebuild(&self, store: &PatternStore) -> Result<usize> {
        let patterns = store.snapshot();
        let placements: Vec<(usize, PatternId)> = patterns
            .iter()
            .map(|p| (self.bucket_of(p.hash_key()), p.id))
            .collect();

        if let Some(db) = &self.db {
            let mut conn = db.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM pattern_index", [])?;
            {
                let mut stmt =
                    tx.prepare("INSERT INTO pattern_index (bucket, pattern_id) VALUES (?1, ?2)")?;
                for (bucket, id) in &placements {
                    stmt.execute(params![*bucket as i64, id.0 as i64])?;
                }
            }
            migrations::set_index_params(&tx, self.bucket_count, self.ngram_size)?;
            tx.commit()?;
        }

        self.buckets.clear();
        for (bucket, id) in &placements {
            self.insert_in_memory(*bucket, *id);
        }

        info!(indexed = placements.len(), "bucket table rebuilt from content table");
        Ok(placements.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::types::Payload;
    use chrono::Utc;

    fn fact(id: u64, text: &str) -> Pattern {
        Pattern::new(
            PatternId(id),
            Payload::ProjectFact { fact: text.into() },
            Vec::<String>::new(),
            3,
            0.5,
            Utc::now(),
        )
    }

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  Hello\t\tWORLD \n again "), "hello world again");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn ngrams_are_overlapping_windows() {
        let grams = ngrams("abcd", 3);
        assert_eq!(grams, BTreeSet::from(["abc".to_string(), "bcd".to_string()]));
        assert_eq!(ngrams("ab", 3), BTreeSet::from(["ab".to_string()]));
        assert!(ngrams("   ", 3).is_empty());
    }

    #[test]
    fn digest_ignores_case_and_spacing() {
        assert_eq!(
            text_digest("Logging  Config", 3),
            text_digest("logging config", 3)
        );
        assert_ne!(text_digest("logging config", 3), text_digest("http client", 3));
        assert_eq!(text_digest("", 3), 0);
    }

    #[test]
    fn identical_text_shares_a_bucket() {
        let indexer = HashIndexer::new(1_000_000, 3);
        let a = fact(1, "use tracing for logging");
        let b = fact(2, "Use tracing   for logging");
        assert_eq!(indexer.index(&a).unwrap(), indexer.index(&b).unwrap());

        let found = indexer.candidates("use tracing for logging", 10);
        assert_eq!(found.ids, vec![PatternId(1), PatternId(2)]);
    }

    #[test]
    fn duplicate_ids_are_rejected_within_a_bucket() {
        let indexer = HashIndexer::new(16, 3);
        let a = fact(1, "retry with backoff");
        indexer.index(&a).unwrap();
        indexer.index(&a).unwrap();
        assert_eq!(indexer.len(), 1);
    }

    #[test]
    fn candidates_include_adjacent_buckets() {
        let indexer = HashIndexer::new(1_000_000, 3);
        let query = "connection pool exhausted";
        let primary = indexer.bucket_of(text_digest(query, 3));
        let neighbour = (primary + 1) % indexer.bucket_count();

        // place an id directly in the neighbouring slot
        indexer.insert_in_memory(neighbour, PatternId(7));
        let found = indexer.candidates(query, 10);
        assert_eq!(found.ids, vec![PatternId(7)]);
        assert_eq!(found.buckets[0], primary);
        assert!(found.buckets.contains(&neighbour));
    }

    #[test]
    fn candidates_respect_limit_and_order() {
        let indexer = HashIndexer::new(1, 3);
        for id in 1..=5 {
            indexer.index(&fact(id, &format!("fact number {id}"))).unwrap();
        }
        let found = indexer.candidates("anything", 3);
        assert_eq!(found.ids, vec![PatternId(1), PatternId(2), PatternId(3)]);
        assert_eq!(found.buckets, vec![0]);
    }

    #[test]
    fn remove_is_idempotent() {
        let indexer = HashIndexer::new(64, 3);
        let a = fact(1, "prefer iterators over index loops");
        indexer.index(&a).unwrap();
        indexer.remove(a.id, a.hash_key()).unwrap();
        indexer.remove(a.id, a.hash_key()).unwrap();
        assert!(indexer.is_empty());
        assert!(indexer.candidates(a.primary_text(), 10).ids.is_empty());
    }
}
