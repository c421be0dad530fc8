//! Pattern store, the single owner of pattern records.
//!
//! Records live in a [`DashMap`] of `Arc<Pattern>` snapshots so readers never wait
//! on a writer. Every mutator replaces the whole snapshot (copy-on-write) after
//! the content and statistics rows are committed, so a failed write leaves both
//! the map and the database untouched.
//!
//! The mutators are synchronous and expect a single caller at a time; the
//! update queue consumer is that caller.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{Pattern, PatternId, PatternStats, Payload};
use crate::db::{migrations, SharedConnection};
use crate::error::{MotifError, Result};

pub struct PatternStore {
    records: DashMap<PatternId, Arc<Pattern>>,
    next_id: AtomicU64,
    db: Option<SharedConnection>,
}

impl Default for PatternStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw content + statistics row, decoded outside the rusqlite closure.
struct PatternRow {
    id: i64,
    payload: String,
    tags: String,
    created_at: DateTime<Utc>,
    usage_count: Option<i64>,
    weight: Option<f64>,
    last_used_at: Option<DateTime<Utc>>,
}

impl PatternStore {
    /// An empty store with no backing database.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
            db: None,
        }
    }

    /// Load every pattern from the content and statistics tables.
    ///
    /// A content row without statistics gets `initial_weight` and zero usage.
    pub fn open(db: SharedConnection, ngram_size: usize, initial_weight: f64) -> Result<Self> {
        let (rows, persisted_next) = {
            let conn = db.lock();
            (load_rows(&conn)?, migrations::get_next_pattern_id(&conn)?)
        };

        let records = DashMap::with_capacity(rows.len());
        let mut max_id = 0u64;
        for row in rows {
            let id = PatternId(row.id as u64);
            let payload: Payload = serde_json::from_str(&row.payload)?;
            let tags: BTreeSet<String> = serde_json::from_str(&row.tags)?;
            let stats = PatternStats {
                usage_count: row.usage_count.unwrap_or(0).max(0) as u64,
                weight: row.weight.unwrap_or(initial_weight).clamp(0.0, 1.0),
                last_used_at: row.last_used_at,
            };
            max_id = max_id.max(id.0);
            let pattern = Pattern::restore(id, payload, tags, row.created_at, stats, ngram_size);
            records.insert(id, Arc::new(pattern));
        }

        let next_id = persisted_next.max(max_id + 1);
        info!(patterns = records.len(), next_id, "pattern store loaded");

        Ok(Self {
            records,
            next_id: AtomicU64::new(next_id),
            db: Some(db),
        })
    }

    /// Reserve a fresh id. Ids are never handed out twice, even across restarts.
    pub fn allocate_id(&self) -> Result<PatternId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Some(db) = &self.db {
            migrations::set_next_pattern_id(&db.lock(), id + 1)?;
        }
        Ok(PatternId(id))
    }

    /// Accept a caller-chosen id only if it was never handed out. Any id below
    /// the counter was allocated or stored before, even if since evicted.
    pub fn ensure_unissued(&self, id: PatternId) -> Result<()> {
        if self.records.contains_key(&id) || id.0 < self.next_id.load(Ordering::SeqCst) {
            return Err(MotifError::DuplicateId(id));
        }
        Ok(())
    }

    /// Insert a new pattern. Fails with `DuplicateId` if the id is present.
    pub fn put(&self, pattern: Pattern) -> Result<PatternId> {
        let id = pattern.id;
        if self.records.contains_key(&id) {
            return Err(MotifError::DuplicateId(id));
        }

        let next = self.next_id.load(Ordering::SeqCst).max(id.0 + 1);
        if let Some(db) = &self.db {
            let mut conn = db.lock();
            let tx = conn.transaction()?;
            insert_content(&tx, &pattern)?;
            insert_stats(&tx, id, pattern.stats())?;
            migrations::set_next_pattern_id(&tx, next)?;
            tx.commit()?;
        }
        self.next_id.fetch_max(next, Ordering::SeqCst);

        debug!(pattern_id = %id, kind = %pattern.kind(), "pattern stored");
        self.records.insert(id, Arc::new(pattern));
        Ok(id)
    }

    pub fn get(&self, id: PatternId) -> Result<Arc<Pattern>> {
        self.records
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(MotifError::NotFound(id))
    }

    pub fn contains(&self, id: PatternId) -> bool {
        self.records.contains_key(&id)
    }

    /// Set the learned weight, clamped to `[0, 1]`.
    pub fn update_weight(&self, id: PatternId, new_weight: f64) -> Result<()> {
        self.replace_stats(id, |stats| {
            stats.weight = new_weight.clamp(0.0, 1.0);
        })
        .map(|_| ())
    }

    /// Bump the usage counter and stamp `last_used_at`. Returns the new count.
    pub fn increment_usage(&self, id: PatternId, timestamp: DateTime<Utc>) -> Result<u64> {
        let stats = self.replace_stats(id, |stats| {
            stats.usage_count += 1;
            stats.last_used_at = Some(timestamp);
        })?;
        Ok(stats.usage_count)
    }

    /// Record one use: set the weight, bump the counter and stamp `last_used_at`
    /// in a single statistics write.
    pub fn apply_usage(
        &self,
        id: PatternId,
        new_weight: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<PatternStats> {
        self.replace_stats(id, |stats| {
            stats.weight = new_weight.clamp(0.0, 1.0);
            stats.usage_count += 1;
            stats.last_used_at = Some(timestamp);
        })
    }

    fn replace_stats(
        &self,
        id: PatternId,
        change: impl FnOnce(&mut PatternStats),
    ) -> Result<PatternStats> {
        let current = self.get(id)?;
        let mut updated = (*current).clone();
        change(updated.stats_mut());
        let stats = updated.stats().clone();

        if let Some(db) = &self.db {
            let rows = db.lock().execute(
                "UPDATE pattern_stats SET usage_count = ?1, weight = ?2, last_used_at = ?3 \
                 WHERE pattern_id = ?4",
                params![
                    stats.usage_count as i64,
                    stats.weight,
                    stats.last_used_at,
                    id.0 as i64
                ],
            )?;
            if rows == 0 {
                return Err(MotifError::NotFound(id));
            }
        }

        match self.records.get_mut(&id) {
            Some(mut entry) => {
                *entry = Arc::new(updated);
                Ok(stats)
            }
            None => Err(MotifError::NotFound(id)),
        }
    }

    /// Remove a pattern. Returns `false` if it was already gone.
    pub fn evict(&self, id: PatternId) -> Result<bool> {
        if !self.records.contains_key(&id) {
            return Ok(false);
        }
        if let Some(db) = &self.db {
            // statistics and bucket rows cascade
            db.lock()
                .execute("DELETE FROM patterns WHERE id = ?1", params![id.0 as i64])?;
        }
        self.records.remove(&id);
        debug!(pattern_id = %id, "pattern evicted");
        Ok(true)
    }

    /// All patterns, ascending by id.
    pub fn snapshot(&self) -> Vec<Arc<Pattern>> {
        let mut patterns: Vec<Arc<Pattern>> = self
            .records
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        patterns.sort_by_key(|p| p.id);
        patterns
    }

    /// Ids created before `older_than` with at most `max_usage` recorded uses.
    pub fn stale(&self, older_than: DateTime<Utc>, max_usage: u64) -> Vec<PatternId> {
        self.snapshot()
            .into_iter()
            .filter(|p| p.created_at < older_than && p.usage_count() <= max_usage)
            .map(|p| p.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn load_rows(conn: &Connection) -> rusqlite::Result<Vec<PatternRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.payload, p.tags, p.created_at, s.usage_count, s.weight, s.last_used_at \
         FROM patterns p LEFT JOIN pattern_stats s ON s.pattern_id = p.id \
         ORDER BY p.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PatternRow {
                id: row.get(0)?,
                payload: row.get(1)?,
                tags: row.get(2)?,
                created_at: row.get(3)?,
                usage_count: row.get(4)?,
                weight: row.get(5)?,
                last_used_at: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn insert_content(conn: &Connection, pattern: &Pattern) -> Result<()> {
    let payload = serde_json::to_string(&pattern.payload)?;
    let tags = serde_json::to_string(&pattern.tags)?;
    conn.execute(
        "INSERT INTO patterns (id, kind, payload, tags, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            pattern.id.0 as i64,
            pattern.kind().as_str(),
            payload,
            tags,
            pattern.created_at,
        ],
    )?;
    Ok(())
}

fn insert_stats(conn: &Connection, id: PatternId, stats: &PatternStats) -> Result<()> {
    conn.execute(
        "INSERT INTO pattern_stats (pattern_id, usage_count, weight, last_used_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            id.0 as i64,
            stats.usage_count as i64,
            stats.weight,
            stats.last_used_at
        ],
    )?;
    Ok(())
}
