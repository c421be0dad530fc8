//! Failure clustering and alerting.
//!
//! Failed usage events are grouped by a normalized failure signature derived from
//! the pattern's payload. When a cluster collects `threshold` failures inside the
//! sliding window an [`Alert`] goes to the configured [`AlertSink`]. A cluster
//! alerts once per crossing and re-arms when its windowed count drops below the
//! threshold again.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{Pattern, PatternId, Payload, UsageEvent};
use crate::config::{DetectorConfig, MAX_WINDOW_HOURS};

/// Derives the grouping key for a failed pattern.
pub trait SignatureStrategy: Send + Sync {
    fn derive_signature(&self, payload: &Payload) -> String;
}

/// Default strategy: shape of the error text with volatile parts masked.
///
/// Digit runs become `#`, quoted strings become `"_"`, hex addresses become
/// `0x_`, and whitespace collapses. Non-error payloads group by kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizedErrorSignature;

impl SignatureStrategy for NormalizedErrorSignature {
    fn derive_signature(&self, payload: &Payload) -> String {
        match payload {
            Payload::ErrorSolution {
                error_signature, ..
            } => normalize_error(error_signature),
            other => format!("kind:{}", other.kind()),
        }
    }
}

fn normalize_error(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut chars = lowered.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                // skip to the matching quote; an unterminated quote masks the rest
                for inner in chars.by_ref() {
                    if inner == c {
                        break;
                    }
                }
                out.push_str("\"_\"");
            }
            '0' if chars.peek() == Some(&'x') => {
                chars.next();
                while chars.peek().is_some_and(|h| h.is_ascii_hexdigit()) {
                    chars.next();
                }
                out.push_str("0x_");
            }
            d if d.is_ascii_digit() => {
                while chars.peek().is_some_and(|n| n.is_ascii_digit()) {
                    chars.next();
                }
                out.push('#');
            }
            w if w.is_whitespace() => {
                while chars.peek().is_some_and(|n| n.is_whitespace()) {
                    chars.next();
                }
                out.push(' ');
            }
            other => out.push(other),
        }
    }

    out.trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub signature: String,
    /// Total failures recorded for the signature.
    pub count: u64,
    pub sample_pattern_ids: Vec<PatternId>,
    pub raised_at: DateTime<Utc>,
}

/// Receives alerts. What it does with them is up to the implementation.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: Alert);
}

/// Logs alerts as `warn` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn emit(&self, alert: Alert) {
        warn!(
            signature = %alert.signature,
            count = alert.count,
            samples = ?alert.sample_pattern_ids,
            "recurring failure pattern detected"
        );
    }
}

/// Forwards alerts into a channel.
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn emit(&self, alert: Alert) {
        if self.tx.send(alert).is_err() {
            debug!("alert receiver dropped");
        }
    }
}

/// A group of failures sharing one signature.
#[derive(Debug, Clone, Serialize)]
pub struct FailureCluster {
    pub signature: String,
    /// Strictly increases with every matching failure.
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Distinct ids, first seen first, bounded by the sample size.
    pub example_pattern_ids: Vec<PatternId>,
    #[serde(skip)]
    window: VecDeque<DateTime<Utc>>,
    #[serde(skip)]
    alerted: bool,
}

pub struct ErrorPatternDetector {
    clusters: Mutex<HashMap<String, FailureCluster>>,
    strategy: Box<dyn SignatureStrategy>,
    threshold: usize,
    window: Duration,
    sample_size: usize,
}

impl ErrorPatternDetector {
    pub fn new(
        strategy: Box<dyn SignatureStrategy>,
        threshold: usize,
        window: Duration,
        sample_size: usize,
    ) -> Self {
        Self {
            clusters: Mutex::new(HashMap::new()),
            strategy,
            threshold: threshold.max(1),
            window,
            sample_size,
        }
    }

    pub fn from_config(config: &DetectorConfig, strategy: Box<dyn SignatureStrategy>) -> Self {
        Self::new(
            strategy,
            config.alert_threshold,
            Duration::hours(config.window_hours.min(MAX_WINDOW_HOURS) as i64),
            config.sample_size,
        )
    }

    /// Record a failed usage of `pattern`. Successes are ignored.
    ///
    /// Returns the alert if this event pushed the windowed count to the threshold.
    pub fn observe(&self, event: &UsageEvent, pattern: &Pattern) -> Option<Alert> {
        if event.success {
            return None;
        }
        let signature = self.strategy.derive_signature(&pattern.payload);
        let at = event.timestamp;

        let mut clusters = self.clusters.lock();
        let cluster = clusters
            .entry(signature.clone())
            .or_insert_with(|| FailureCluster {
                signature: signature.clone(),
                count: 0,
                first_seen: at,
                last_seen: at,
                example_pattern_ids: Vec::new(),
                window: VecDeque::new(),
                alerted: false,
            });

        cluster.count += 1;
        cluster.first_seen = cluster.first_seen.min(at);
        cluster.last_seen = cluster.last_seen.max(at);
        if cluster.example_pattern_ids.len() < self.sample_size
            && !cluster.example_pattern_ids.contains(&pattern.id)
        {
            cluster.example_pattern_ids.push(pattern.id);
        }

        let horizon = at - self.window;
        cluster.window.push_back(at);
        while cluster.window.front().is_some_and(|t| *t <= horizon) {
            cluster.window.pop_front();
        }
        // only the most recent `threshold` timestamps can matter
        while cluster.window.len() > self.threshold {
            cluster.window.pop_front();
        }

        let in_window = cluster.window.len();
        debug!(signature = %signature, count = cluster.count, in_window, "failure observed");

        if in_window < self.threshold {
            cluster.alerted = false;
            return None;
        }
        if cluster.alerted {
            return None;
        }
        cluster.alerted = true;
        Some(Alert {
            signature,
            count: cluster.count,
            sample_pattern_ids: cluster.example_pattern_ids.clone(),
            raised_at: at,
        })
    }

    /// Drop clusters whose last failure is older than `older_than`. Returns how many.
    pub fn prune(&self, older_than: DateTime<Utc>) -> usize {
        let mut clusters = self.clusters.lock();
        let before = clusters.len();
        clusters.retain(|_, cluster| cluster.last_seen >= older_than);
        before - clusters.len()
    }

    /// Clusters ordered by count descending, then signature.
    pub fn clusters(&self) -> Vec<FailureCluster> {
        let mut snapshot: Vec<FailureCluster> = self.clusters.lock().values().cloned().collect();
        snapshot.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.signature.cmp(&b.signature)));
        snapshot
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::types::QueryContext;

    fn error_pattern(id: u64, message: &str) -> Pattern {
        Pattern::new(
            PatternId(id),
            Payload::ErrorSolution {
                error_signature: message.into(),
                fix: "restart".into(),
            },
            Vec::<String>::new(),
            3,
            0.5,
            Utc::now(),
        )
    }

    fn failure_at(id: PatternId, at: DateTime<Utc>) -> UsageEvent {
        UsageEvent {
            timestamp: at,
            ..UsageEvent::new(id, &QueryContext::new(), false)
        }
    }

    fn detector(threshold: usize) -> ErrorPatternDetector {
        ErrorPatternDetector::new(
            Box::new(NormalizedErrorSignature),
            threshold,
            Duration::hours(24),
            3,
        )
    }

    #[test]
    fn oversized_window_is_capped() {
        let config = DetectorConfig {
            window_hours: u64::MAX,
            ..DetectorConfig::default()
        };
        let d = ErrorPatternDetector::from_config(&config, Box::new(NormalizedErrorSignature));
        assert_eq!(d.window, Duration::hours(MAX_WINDOW_HOURS as i64));
    }

    #[test]
    fn signature_masks_volatile_parts() {
        let s = NormalizedErrorSignature;
        let a = Payload::ErrorSolution {
            error_signature: "Timeout after 3000ms connecting to 'db-1' at 0xDEADbeef".into(),
            fix: String::new(),
        };
        let b = Payload::ErrorSolution {
            error_signature: "timeout after 12ms   connecting to \"cache\" at 0x1f".into(),
            fix: String::new(),
        };
        assert_eq!(s.derive_signature(&a), s.derive_signature(&b));
        assert_eq!(
            s.derive_signature(&a),
            "timeout after #ms connecting to \"_\" at 0x_"
        );
        let fact = Payload::ProjectFact { fact: "x".into() };
        assert_eq!(s.derive_signature(&fact), "kind:project_fact");
    }

    #[test]
    fn alert_fires_once_at_threshold() {
        let d = detector(5);
        let p = error_pattern(1, "connection refused on port 5432");
        let now = Utc::now();

        let alerts: Vec<Alert> = (0..6)
            .filter_map(|i| d.observe(&failure_at(p.id, now + Duration::seconds(i)), &p))
            .collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].count, 5);
        assert_eq!(alerts[0].sample_pattern_ids, vec![PatternId(1)]);
    }

    #[test]
    fn successes_are_ignored() {
        let d = detector(1);
        let p = error_pattern(1, "boom");
        let ok = UsageEvent::new(p.id, &QueryContext::new(), true);
        assert!(d.observe(&ok, &p).is_none());
        assert_eq!(d.cluster_count(), 0);
    }

    #[test]
    fn failures_outside_window_do_not_accumulate() {
        let d = detector(3);
        let p = error_pattern(1, "disk full");
        let start = Utc::now();
        for day in 0..5 {
            let at = start + Duration::days(day);
            assert!(d.observe(&failure_at(p.id, at), &p).is_none());
        }
        let clusters = d.clusters();
        assert_eq!(clusters[0].count, 5);
    }

    #[test]
    fn cluster_rearms_after_window_passes() {
        let d = detector(2);
        let p = error_pattern(1, "oom killed");
        let start = Utc::now();
        assert!(d.observe(&failure_at(p.id, start), &p).is_none());
        assert!(d.observe(&failure_at(p.id, start + Duration::minutes(1)), &p).is_some());
        assert!(d.observe(&failure_at(p.id, start + Duration::minutes(2)), &p).is_none());

        let later = start + Duration::days(3);
        assert!(d.observe(&failure_at(p.id, later), &p).is_none());
        assert!(d.observe(&failure_at(p.id, later + Duration::minutes(1)), &p).is_some());
    }

    #[test]
    fn samples_are_distinct_and_bounded() {
        let d = detector(100);
        let now = Utc::now();
        for id in [1, 1, 2, 3, 4, 5] {
            let p = error_pattern(id, "same failure 42");
            d.observe(&failure_at(p.id, now), &p);
        }
        let cluster = &d.clusters()[0];
        assert_eq!(
            cluster.example_pattern_ids,
            vec![PatternId(1), PatternId(2), PatternId(3)]
        );
        assert_eq!(cluster.count, 6);
    }

    #[test]
    fn prune_removes_quiet_clusters() {
        let d = detector(10);
        let now = Utc::now();
        let old = error_pattern(1, "ancient failure");
        let fresh = error_pattern(2, "recent failure");
        d.observe(&failure_at(old.id, now - Duration::days(10)), &old);
        d.observe(&failure_at(fresh.id, now), &fresh);

        assert_eq!(d.prune(now - Duration::days(1)), 1);
        let remaining = d.clusters();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].signature, "recent failure");
    }

    #[test]
    fn channel_sink_delivers() {
        let (sink, mut rx) = ChannelAlertSink::new();
        sink.emit(Alert {
            signature: "s".into(),
            count: 5,
            sample_pattern_ids: vec![],
            raised_at: Utc::now(),
        });
        assert_eq!(rx.try_recv().unwrap().signature, "s");
    }
}
