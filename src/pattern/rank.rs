//! Context-aware ranking of index candidates.
//!
//! Each candidate is scored as a weighted blend of lexical overlap with the query,
//! context match, the learned weight, and recency of last use. Results are sorted
//! by score descending with ties broken by ascending id, so a fixed store state
//! always yields the same order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::index::ngrams;
use super::store::PatternStore;
use super::types::{Pattern, PatternId, QueryContext};
use crate::config::RankingConfig;
use crate::error::{MotifError, Result};

/// A ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPattern {
    pub pattern: Arc<Pattern>,
    pub score: f64,
}

/// Blend weights for the four ranking signals. They sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub lexical: f64,
    pub context: f64,
    pub learned: f64,
    pub recency: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            lexical: 0.3,
            context: 0.4,
            learned: 0.2,
            recency: 0.1,
        }
    }
}

pub struct ContextRanker {
    weights: RankingWeights,
    half_life_days: f64,
    recent_id_credit: f64,
    ngram_size: usize,
}

impl ContextRanker {
    pub fn new(
        weights: RankingWeights,
        half_life_days: f64,
        recent_id_credit: f64,
        ngram_size: usize,
    ) -> Self {
        Self {
            weights,
            half_life_days,
            recent_id_credit,
            ngram_size: ngram_size.max(1),
        }
    }

    pub fn from_config(config: &RankingConfig, ngram_size: usize) -> Self {
        let weights = RankingWeights {
            lexical: config.lexical_weight,
            context: config.context_weight,
            learned: config.learned_weight,
            recency: config.recency_weight,
        };
        Self::new(
            weights,
            config.recency_half_life_days,
            config.recent_id_credit,
            ngram_size,
        )
    }

    pub fn weights(&self) -> RankingWeights {
        self.weights
    }

    /// Hydrate, score and sort candidates. Ids no longer in the store are skipped.
    pub fn rank(
        &self,
        store: &PatternStore,
        candidate_ids: &[PatternId],
        query: &str,
        context: &QueryContext,
        max_results: usize,
        now: DateTime<Utc>,
    ) -> Vec<RankedPattern> {
        if max_results == 0 || candidate_ids.is_empty() {
            return Vec::new();
        }

        let query_grams = ngrams(query, self.ngram_size);
        let mut ranked: Vec<RankedPattern> = candidate_ids
            .iter()
            .filter_map(|id| store.get(*id).ok())
            .map(|pattern| {
                let score = self.score(&query_grams, &pattern, context, now);
                RankedPattern { pattern, score }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.pattern.id.cmp(&b.pattern.id))
        });
        ranked.truncate(max_results);
        ranked
    }

    /// Like [`rank`](Self::rank), but an empty result is an error.
    pub fn rank_required(
        &self,
        store: &PatternStore,
        candidate_ids: &[PatternId],
        query: &str,
        context: &QueryContext,
        max_results: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedPattern>> {
        let ranked = self.rank(store, candidate_ids, query, context, max_results, now);
        if ranked.is_empty() {
            return Err(MotifError::EmptyCandidateSet);
        }
        Ok(ranked)
    }

    fn score(
        &self,
        query_grams: &BTreeSet<String>,
        pattern: &Pattern,
        context: &QueryContext,
        now: DateTime<Utc>,
    ) -> f64 {
        let w = &self.weights;
        w.lexical * lexical_overlap(query_grams, &ngrams(pattern.primary_text(), self.ngram_size))
            + w.context * self.context_match(context, pattern)
            + w.learned * pattern.weight()
            + w.recency * self.recency_decay(pattern, now)
    }

    /// 1.0 for a file-kind tag match, plus credit for recent co-use, clamped to 1.
    pub fn context_match(&self, context: &QueryContext, pattern: &Pattern) -> f64 {
        let mut score = 0.0;
        if let Some(kind) = &context.file_kind {
            if pattern.has_tag(kind) {
                score += 1.0;
            }
        }
        if context.recent_pattern_ids().contains(&pattern.id) {
            score += self.recent_id_credit;
        }
        score.clamp(0.0, 1.0)
    }

    /// Exponential decay since last use (or creation, if never used).
    pub fn recency_decay(&self, pattern: &Pattern, now: DateTime<Utc>) -> f64 {
        let reference = pattern.last_used_at().unwrap_or(pattern.created_at);
        let age_days = (now - reference).num_milliseconds().max(0) as f64 / 86_400_000.0;
        0.5f64.powf(age_days / self.half_life_days)
    }
}

/// Fraction of the query's n-grams that also occur in the pattern text.
pub fn lexical_overlap(query_grams: &BTreeSet<String>, pattern_grams: &BTreeSet<String>) -> f64 {
    if query_grams.is_empty() {
        return 0.0;
    }
    let shared = query_grams.intersection(pattern_grams).count();
    shared as f64 / query_grams.len() as f64
}
