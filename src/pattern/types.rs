//! Core pattern type definitions.
//!
//! Defines [`PatternId`], [`PatternKind`], the kind-tagged [`Payload`], the stored
//! [`Pattern`] record with its [`PatternStats`], the per-call [`QueryContext`], and
//! the immutable [`UsageEvent`] fed back after a retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use xxhash_rust::xxh3::Xxh3;

use super::index::text_digest;

/// Maximum number of ids kept in [`QueryContext::recent_pattern_ids`].
pub const MAX_RECENT_PATTERN_IDS: usize = 10;

/// Store-assigned pattern identifier. Allocated from a monotonic counter and
/// never reused, so ascending order is also creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub u64);

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PatternId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(PatternId)
            .map_err(|_| format!("invalid pattern id: {s}"))
    }
}

/// The four kinds of stored knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// A reusable piece of source code.
    CodeSnippet,
    /// An error signature paired with the fix that resolved it.
    ErrorSolution,
    /// A guideline or heuristic.
    BestPractice,
    /// A fact about the current project.
    ProjectFact,
}

impl PatternKind {
    pub const ALL: [PatternKind; 4] = [
        Self::CodeSnippet,
        Self::ErrorSolution,
        Self::BestPractice,
        Self::ProjectFact,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeSnippet => "code_snippet",
            Self::ErrorSolution => "error_solution",
            Self::BestPractice => "best_practice",
            Self::ProjectFact => "project_fact",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PatternKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code_snippet" => Ok(Self::CodeSnippet),
            "error_solution" => Ok(Self::ErrorSolution),
            "best_practice" => Ok(Self::BestPractice),
            "project_fact" => Ok(Self::ProjectFact),
            _ => Err(format!("unknown pattern kind: {s}")),
        }
    }
}

/// Kind-specific content. The variant is the pattern's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    CodeSnippet {
        code: String,
        language: String,
    },
    ErrorSolution {
        /// The error as it was observed, e.g. a compiler message.
        error_signature: String,
        fix: String,
    },
    BestPractice {
        guideline: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    ProjectFact {
        fact: String,
    },
}

impl Payload {
    pub fn kind(&self) -> PatternKind {
        match self {
            Self::CodeSnippet { .. } => PatternKind::CodeSnippet,
            Self::ErrorSolution { .. } => PatternKind::ErrorSolution,
            Self::BestPractice { .. } => PatternKind::BestPractice,
            Self::ProjectFact { .. } => PatternKind::ProjectFact,
        }
    }

    /// The text the index hashes and the ranker compares against queries.
    pub fn primary_text(&self) -> &str {
        match self {
            Self::CodeSnippet { code, .. } => code,
            Self::ErrorSolution {
                error_signature, ..
            } => error_signature,
            Self::BestPractice { guideline, .. } => guideline,
            Self::ProjectFact { fact } => fact,
        }
    }
}

/// Usage statistics, persisted in the statistics table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternStats {
    /// Never decreases.
    pub usage_count: u64,
    /// Learned relevance in `[0.0, 1.0]`.
    pub weight: f64,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A stored pattern.
///
/// `hash_key` is derived from the payload at construction and `stats` can only
/// be changed by the pattern store, so neither is settable by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub id: PatternId,
    pub payload: Payload,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    hash_key: u64,
    stats: PatternStats,
}

impl Pattern {
    /// Build a fresh pattern with neutral statistics.
    pub fn new(
        id: PatternId,
        payload: Payload,
        tags: impl IntoIterator<Item = String>,
        ngram_size: usize,
        initial_weight: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let stats = PatternStats {
            usage_count: 0,
            weight: initial_weight.clamp(0.0, 1.0),
            last_used_at: None,
        };
        Self::restore(id, payload, normalize_tags(tags), created_at, stats, ngram_size)
    }

    /// Rebuild a pattern from its persisted content and statistics rows.
    pub(crate) fn restore(
        id: PatternId,
        payload: Payload,
        tags: BTreeSet<String>,
        created_at: DateTime<Utc>,
        stats: PatternStats,
        ngram_size: usize,
    ) -> Self {
        let hash_key = text_digest(payload.primary_text(), ngram_size);
        Self {
            id,
            payload,
            tags,
            created_at,
            hash_key,
            stats,
        }
    }

    pub fn kind(&self) -> PatternKind {
        self.payload.kind()
    }

    pub fn primary_text(&self) -> &str {
        self.payload.primary_text()
    }

    /// XOR-folded n-gram digest of the primary text, before bucket reduction.
    pub fn hash_key(&self) -> u64 {
        self.hash_key
    }

    pub fn stats(&self) -> &PatternStats {
        &self.stats
    }

    pub fn weight(&self) -> f64 {
        self.stats.weight
    }

    pub fn usage_count(&self) -> u64 {
        self.stats.usage_count
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.stats.last_used_at
    }

    pub(crate) fn stats_mut(&mut self) -> &mut PatternStats {
        &mut self.stats
    }

    /// Case-insensitive tag membership.
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim().to_lowercase();
        self.tags.contains(&tag)
    }
}

/// Lower-case, trim and drop empty tags.
pub fn normalize_tags(tags: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Per-call retrieval context. Never persisted and never mutates stored state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub file_kind: Option<String>,
    pub current_task: Option<String>,
    /// Most recent first, at most [`MAX_RECENT_PATTERN_IDS`] entries.
    recent_pattern_ids: Vec<PatternId>,
    pub hints: BTreeMap<String, String>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_kind(mut self, file_kind: impl Into<String>) -> Self {
        self.file_kind = Some(file_kind.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.current_task = Some(task.into());
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    /// Replace the recent ids with `ids` (most recent first), truncated to the bound.
    pub fn with_recent(mut self, ids: impl IntoIterator<Item = PatternId>) -> Self {
        self.recent_pattern_ids = ids.into_iter().take(MAX_RECENT_PATTERN_IDS).collect();
        self
    }

    /// Record `id` as the most recently used pattern.
    pub fn push_recent(&mut self, id: PatternId) {
        self.recent_pattern_ids.retain(|existing| *existing != id);
        self.recent_pattern_ids.insert(0, id);
        self.recent_pattern_ids.truncate(MAX_RECENT_PATTERN_IDS);
    }

    pub fn recent_pattern_ids(&self) -> &[PatternId] {
        &self.recent_pattern_ids
    }

    /// Stable hash of every field, used as the cache key and stamped on usage events.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh3::new();
        let mut field = |tag: u8, value: &[u8]| {
            hasher.update(&[tag]);
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value);
        };
        if let Some(kind) = &self.file_kind {
            field(1, kind.as_bytes());
        }
        if let Some(task) = &self.current_task {
            field(2, task.as_bytes());
        }
        for id in &self.recent_pattern_ids {
            field(3, &id.0.to_le_bytes());
        }
        for (key, value) in &self.hints {
            field(4, key.as_bytes());
            field(5, value.as_bytes());
        }
        hasher.digest()
    }
}

/// Feedback for one retrieved pattern. Consumed once by the learner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEvent {
    pub pattern_id: PatternId,
    pub context_fingerprint: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(pattern_id: PatternId, context: &QueryContext, success: bool) -> Self {
        Self {
            pattern_id,
            context_fingerprint: context.fingerprint(),
            success,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(code: &str) -> Payload {
        Payload::CodeSnippet {
            code: code.into(),
            language: "rust".into(),
        }
    }

    #[test]
    fn payload_kind_follows_variant() {
        assert_eq!(snippet("x").kind(), PatternKind::CodeSnippet);
        let fix = Payload::ErrorSolution {
            error_signature: "E0382 borrow of moved value".into(),
            fix: "clone before the move".into(),
        };
        assert_eq!(fix.kind(), PatternKind::ErrorSolution);
        assert_eq!(fix.primary_text(), "E0382 borrow of moved value");
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let json = serde_json::to_value(snippet("fn main() {}")).unwrap();
        assert_eq!(json["kind"], "code_snippet");
        assert_eq!(json["language"], "rust");
        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back, snippet("fn main() {}"));
    }

    #[test]
    fn kind_parses_from_str() {
        for kind in PatternKind::ALL {
            assert_eq!(kind.as_str().parse::<PatternKind>().unwrap(), kind);
        }
        assert!("vector".parse::<PatternKind>().is_err());
    }

    #[test]
    fn new_pattern_has_neutral_stats() {
        let p = Pattern::new(
            PatternId(1),
            snippet("let x = 1;"),
            vec!["Rust".to_string(), " ".to_string()],
            3,
            0.5,
            Utc::now(),
        );
        assert_eq!(p.weight(), 0.5);
        assert_eq!(p.usage_count(), 0);
        assert!(p.last_used_at().is_none());
        assert_eq!(p.tags.len(), 1);
        assert!(p.has_tag("RUST"));
        assert_eq!(p.hash_key(), text_digest("let x = 1;", 3));
    }

    #[test]
    fn recent_ids_are_bounded_and_most_recent_first() {
        let mut ctx = QueryContext::new();
        for i in 0..15 {
            ctx.push_recent(PatternId(i));
        }
        assert_eq!(ctx.recent_pattern_ids().len(), MAX_RECENT_PATTERN_IDS);
        assert_eq!(ctx.recent_pattern_ids()[0], PatternId(14));

        ctx.push_recent(PatternId(10));
        assert_eq!(ctx.recent_pattern_ids()[0], PatternId(10));
        assert_eq!(ctx.recent_pattern_ids().len(), MAX_RECENT_PATTERN_IDS);
    }

    #[test]
    fn fingerprint_is_stable_and_field_sensitive() {
        let a = QueryContext::new().with_file_kind("python").with_hint("os", "linux");
        let b = QueryContext::new().with_hint("os", "linux").with_file_kind("python");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = QueryContext::new().with_task("python");
        let d = QueryContext::new().with_file_kind("python");
        assert_ne!(c.fingerprint(), d.fingerprint());
    }
}
