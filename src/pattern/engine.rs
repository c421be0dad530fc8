//! The pattern engine: one explicitly constructed instance wiring the store,
//! index, ranker, cache, learner and detector together.
//!
//! Reads run on the caller's thread against the concurrent store and index.
//! Writes go through the update queue and are applied by its single consumer.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::cache::{CacheKey, QueryCache};
use super::detect::{
    AlertSink, ErrorPatternDetector, FailureCluster, LogAlertSink, NormalizedErrorSignature,
    SignatureStrategy,
};
use super::index::{HashIndexer, RestoreReport};
use super::learn::{UsageLearner, WeightUpdate};
use super::queue::{UpdateMessage, UpdateQueue, Writer};
use super::rank::{ContextRanker, RankedPattern};
use super::stats::EngineStats;
use super::store::PatternStore;
use super::types::{Pattern, PatternId, Payload, QueryContext, UsageEvent};
use crate::config::MotifConfig;
use crate::db;
use crate::error::{MotifError, Result};

/// Assembles a [`PatternEngine`].
///
/// Without a database the engine is purely in-memory.
pub struct EngineBuilder {
    config: MotifConfig,
    database: Option<Connection>,
    sink: Option<Arc<dyn AlertSink>>,
    strategy: Option<Box<dyn SignatureStrategy>>,
}

impl EngineBuilder {
    pub fn new(config: MotifConfig) -> Self {
        Self {
            config,
            database: None,
            sink: None,
            strategy: None,
        }
    }

    /// Persist to this connection. Schema and migrations must already be applied.
    pub fn database(mut self, conn: Connection) -> Self {
        self.database = Some(conn);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn signature_strategy(mut self, strategy: Box<dyn SignatureStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Load persisted state, verify the bucket table and start the writer.
    pub fn build(self) -> Result<PatternEngine> {
        let config = self.config;
        config.validate()?;
        let ngram_size = config.index.ngram_size;
        let initial_weight = config.learning.initial_weight;

        let (store, indexer) = match self.database {
            Some(conn) => {
                let shared = db::share(conn);
                let store = PatternStore::open(Arc::clone(&shared), ngram_size, initial_weight)?;
                let indexer =
                    HashIndexer::with_database(config.index.bucket_count, ngram_size, shared);
                (store, indexer)
            }
            None => (
                PatternStore::new(),
                HashIndexer::new(config.index.bucket_count, ngram_size),
            ),
        };
        let store = Arc::new(store);
        let indexer = Arc::new(indexer);
        let restore_report = indexer.restore(&store)?;

        let cache = Arc::new(QueryCache::new(config.cache.capacity));
        let strategy = self
            .strategy
            .unwrap_or_else(|| Box::new(NormalizedErrorSignature));
        let detector = Arc::new(ErrorPatternDetector::from_config(&config.detector, strategy));
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogAlertSink));
        let alerts_emitted = Arc::new(AtomicU64::new(0));

        let writer = Writer {
            store: Arc::clone(&store),
            indexer: Arc::clone(&indexer),
            cache: Arc::clone(&cache),
            detector: Arc::clone(&detector),
            learner: UsageLearner::new(config.learning.learning_rate),
            sink,
            alerts_emitted: Arc::clone(&alerts_emitted),
            initial_weight,
        };
        let queue = UpdateQueue::spawn(
            writer,
            config.queue.capacity,
            Duration::from_millis(config.queue.send_timeout_ms),
        )?;

        info!(
            patterns = store.len(),
            indexed = restore_report.indexed,
            rebuilt = restore_report.rebuilt,
            "pattern engine ready"
        );

        Ok(PatternEngine {
            inner: Arc::new(EngineInner {
                ranker: ContextRanker::from_config(&config.ranking, ngram_size),
                store,
                indexer,
                cache,
                detector,
                queue,
                alerts_emitted,
                restore_report,
                config,
            }),
        })
    }
}

struct EngineInner {
    config: MotifConfig,
    store: Arc<PatternStore>,
    indexer: Arc<HashIndexer>,
    cache: Arc<QueryCache>,
    detector: Arc<ErrorPatternDetector>,
    ranker: ContextRanker,
    queue: UpdateQueue,
    alerts_emitted: Arc<AtomicU64>,
    restore_report: RestoreReport,
}

/// Handle to a running engine. Clones share the same state.
#[derive(Clone)]
pub struct PatternEngine {
    inner: Arc<EngineInner>,
}

impl PatternEngine {
    pub fn builder(config: MotifConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Open the configured database and start an engine over it.
    pub fn open(config: MotifConfig) -> anyhow::Result<Self> {
        let conn = db::open_database(config.resolved_db_path())?;
        Ok(Self::builder(config).database(conn).build()?)
    }

    /// An engine with no persistence.
    pub fn in_memory(config: MotifConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &MotifConfig {
        &self.inner.config
    }

    // --- writes (serialized through the update queue) ---

    /// Store a new pattern and return its freshly allocated id.
    pub async fn store_pattern(&self, payload: Payload, tags: Vec<String>) -> Result<PatternId> {
        self.inner
            .queue
            .request(|reply| UpdateMessage::Store {
                id: None,
                payload,
                tags,
                reply,
            })
            .await?
    }

    /// Store a pattern under a caller-chosen id. Fails with `DuplicateId` if taken.
    pub async fn store_pattern_with_id(
        &self,
        id: PatternId,
        payload: Payload,
        tags: Vec<String>,
    ) -> Result<PatternId> {
        self.inner
            .queue
            .request(|reply| UpdateMessage::Store {
                id: Some(id),
                payload,
                tags,
                reply,
            })
            .await?
    }

    /// Report whether a retrieved pattern helped. Fails with `NotFound` for unknown ids.
    pub async fn record_usage(
        &self,
        id: PatternId,
        context: &QueryContext,
        success: bool,
    ) -> Result<WeightUpdate> {
        let event = UsageEvent::new(id, context, success);
        self.inner
            .queue
            .request(|reply| UpdateMessage::UsageFeedback { event, reply })
            .await?
    }

    /// Remove a pattern. Returns `false` if it was not stored.
    pub async fn evict_pattern(&self, id: PatternId) -> Result<bool> {
        self.inner
            .queue
            .request(|reply| UpdateMessage::Evict { id, reply })
            .await?
    }

    /// Re-derive the bucket table from the content table. Returns the indexed count.
    pub async fn rebuild_index(&self) -> Result<usize> {
        self.inner
            .queue
            .request(|reply| UpdateMessage::RebuildIndex { reply })
            .await?
    }

    /// Drop failure clusters that have been quiet since `older_than`.
    pub async fn prune_failure_clusters(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.inner
            .queue
            .request(|reply| UpdateMessage::PruneClusters { older_than, reply })
            .await
    }

    /// Apply everything already queued, then stop the writer.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.queue.shutdown().await
    }

    // --- reads ---

    /// Up to `max_results` patterns for `query`, best first.
    pub fn retrieve(
        &self,
        query: &str,
        context: &QueryContext,
        max_results: usize,
    ) -> Result<Vec<RankedPattern>> {
        if query.trim().is_empty() {
            return Err(MotifError::InvalidQuery("query is empty".into()));
        }
        let inner = &self.inner;
        let key = CacheKey::new(query, context.fingerprint(), max_results);

        if let Some(mut hit) = inner.cache.get(&key) {
            hit.retain(|r| inner.store.contains(r.pattern.id));
            debug!(results = hit.len(), "query served from cache");
            return Ok(hit);
        }

        let generation = inner.cache.generation();
        let candidates = inner
            .indexer
            .candidates(query, inner.config.index.max_candidates);
        let ranked = inner.ranker.rank(
            &inner.store,
            &candidates.ids,
            query,
            context,
            max_results,
            Utc::now(),
        );
        debug!(
            candidates = candidates.ids.len(),
            results = ranked.len(),
            "query ranked"
        );
        inner
            .cache
            .put(key, ranked.clone(), candidates.buckets, generation);
        Ok(ranked)
    }

    /// Like [`retrieve`](Self::retrieve), but no match is `EmptyCandidateSet`.
    pub fn retrieve_required(
        &self,
        query: &str,
        context: &QueryContext,
        max_results: usize,
    ) -> Result<Vec<RankedPattern>> {
        let ranked = self.retrieve(query, context, max_results)?;
        if ranked.is_empty() {
            return Err(MotifError::EmptyCandidateSet);
        }
        Ok(ranked)
    }

    /// Patterns for the task at hand, using the task text as the query.
    pub fn get_recommendations(&self, current_task: &str) -> Result<Vec<RankedPattern>> {
        let context = QueryContext::new().with_task(current_task);
        self.retrieve(
            current_task,
            &context,
            self.inner.config.ranking.default_max_results,
        )
    }

    pub fn get_pattern(&self, id: PatternId) -> Result<Arc<Pattern>> {
        self.inner.store.get(id)
    }

    /// Cleanup candidates: created before `older_than` with at most `max_usage` uses.
    pub fn stale_patterns(&self, older_than: DateTime<Utc>, max_usage: u64) -> Vec<PatternId> {
        self.inner.store.stale(older_than, max_usage)
    }

    pub fn failure_clusters(&self) -> Vec<FailureCluster> {
        self.inner.detector.clusters()
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        EngineStats::collect(
            &inner.store,
            &inner.indexer,
            &inner.cache,
            &inner.detector,
            inner.alerts_emitted.load(Ordering::Relaxed),
            inner.queue.depth(),
        )
    }

    /// What happened to the persisted bucket table when this engine started.
    pub fn restore_report(&self) -> &RestoreReport {
        &self.inner.restore_report
    }
}
