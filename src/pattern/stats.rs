use serde::Serialize;
use std::collections::BTreeMap;

use super::cache::QueryCache;
use super::detect::ErrorPatternDetector;
use super::index::HashIndexer;
use super::store::PatternStore;
use super::types::PatternKind;

/// Point-in-time counters for an engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_patterns: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub total_usage: u64,
    /// Mean learned weight, `None` for an empty store.
    pub mean_weight: Option<f64>,
    pub indexed_ids: usize,
    pub occupied_buckets: usize,
    pub bucket_count: usize,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failure_clusters: usize,
    pub alerts_emitted: u64,
    pub queue_depth: usize,
}

impl EngineStats {
    pub(crate) fn collect(
        store: &PatternStore,
        indexer: &HashIndexer,
        cache: &QueryCache,
        detector: &ErrorPatternDetector,
        alerts_emitted: u64,
        queue_depth: usize,
    ) -> Self {
        let patterns = store.snapshot();

        let mut by_kind: BTreeMap<String, usize> = PatternKind::ALL
            .iter()
            .map(|kind| (kind.to_string(), 0))
            .collect();
        let mut total_usage = 0u64;
        let mut weight_sum = 0.0;
        for pattern in &patterns {
            *by_kind.entry(pattern.kind().to_string()).or_insert(0) += 1;
            total_usage += pattern.usage_count();
            weight_sum += pattern.weight();
        }
        let mean_weight = (!patterns.is_empty()).then(|| weight_sum / patterns.len() as f64);

        Self {
            total_patterns: patterns.len(),
            by_kind,
            total_usage,
            mean_weight,
            indexed_ids: indexer.len(),
            occupied_buckets: indexer.occupied_buckets(),
            bucket_count: indexer.bucket_count(),
            cache_entries: cache.len(),
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
            failure_clusters: detector.cluster_count(),
            alerts_emitted,
            queue_depth,
        }
    }
}
