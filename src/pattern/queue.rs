//! Single-writer update queue.
//!
//! Every mutation (store, usage feedback, eviction, index rebuild, cluster
//! pruning) is sent as an [`UpdateMessage`] over a bounded channel to one
//! dedicated writer thread, which applies messages strictly in arrival order.
//! Callers await a oneshot reply. When the channel is full a sender waits up to
//! the configured timeout and then gets `QueueSaturated`; nothing is dropped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::cache::QueryCache;
use super::detect::{AlertSink, ErrorPatternDetector};
use super::index::HashIndexer;
use super::learn::{UsageLearner, WeightUpdate};
use super::store::PatternStore;
use super::types::{Pattern, PatternId, Payload, UsageEvent};
use crate::error::{MotifError, Result};

pub enum UpdateMessage {
    /// `id: None` allocates a fresh id; an explicit id must not be taken.
    Store {
        id: Option<PatternId>,
        payload: Payload,
        tags: Vec<String>,
        reply: oneshot::Sender<Result<PatternId>>,
    },
    UsageFeedback {
        event: UsageEvent,
        reply: oneshot::Sender<Result<WeightUpdate>>,
    },
    Evict {
        id: PatternId,
        reply: oneshot::Sender<Result<bool>>,
    },
    RebuildIndex {
        reply: oneshot::Sender<Result<usize>>,
    },
    PruneClusters {
        older_than: DateTime<Utc>,
        reply: oneshot::Sender<usize>,
    },
    /// Processed after everything sent before it; the consumer exits afterwards.
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl UpdateMessage {
    fn label(&self) -> &'static str {
        match self {
            Self::Store { .. } => "store",
            Self::UsageFeedback { .. } => "usage_feedback",
            Self::Evict { .. } => "evict",
            Self::RebuildIndex { .. } => "rebuild_index",
            Self::PruneClusters { .. } => "prune_clusters",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}

/// Everything the consumer mutates. Owned by the writer thread.
pub(crate) struct Writer {
    pub store: Arc<PatternStore>,
    pub indexer: Arc<HashIndexer>,
    pub cache: Arc<QueryCache>,
    pub detector: Arc<ErrorPatternDetector>,
    pub learner: UsageLearner,
    pub sink: Arc<dyn AlertSink>,
    pub alerts_emitted: Arc<AtomicU64>,
    pub initial_weight: f64,
}

fn reply<T>(tx: oneshot::Sender<T>, value: T) {
    if tx.send(value).is_err() {
        debug!("caller went away before the reply");
    }
}

impl Writer {
    fn run(self, mut rx: mpsc::Receiver<UpdateMessage>) {
        info!("update queue consumer started");
        while let Some(message) = rx.blocking_recv() {
            debug!(message = message.label(), "applying update");
            match message {
                UpdateMessage::Store {
                    id,
                    payload,
                    tags,
                    reply: tx,
                } => reply(tx, self.store_pattern(id, payload, tags)),
                UpdateMessage::UsageFeedback { event, reply: tx } => {
                    reply(tx, self.usage_feedback(&event))
                }
                UpdateMessage::Evict { id, reply: tx } => reply(tx, self.evict(id)),
                UpdateMessage::RebuildIndex { reply: tx } => {
                    let result = self.indexer.rebuild(&self.store);
                    self.cache.clear();
                    reply(tx, result)
                }
                UpdateMessage::PruneClusters {
                    older_than,
                    reply: tx,
                } => reply(tx, self.detector.prune(older_than)),
                UpdateMessage::Shutdown { reply: tx } => {
                    reply(tx, ());
                    break;
                }
            }
        }
        info!("update queue consumer stopped");
    }

    fn store_pattern(
        &self,
        id: Option<PatternId>,
        payload: Payload,
        tags: Vec<String>,
    ) -> Result<PatternId> {
        if payload.primary_text().trim().is_empty() {
            return Err(MotifError::InvalidPattern(format!(
                "{} has no primary text",
                payload.kind()
            )));
        }

        let id = match id {
            Some(id) => {
                self.store.ensure_unissued(id)?;
                id
            }
            None => self.store.allocate_id()?,
        };
        let pattern = Pattern::new(
            id,
            payload,
            tags,
            self.indexer.ngram_size(),
            self.initial_weight,
            Utc::now(),
        );
        self.store.put(pattern)?;

        let stored = self.store.get(id)?;
        let bucket = self.indexer.bucket_of(stored.hash_key());
        if let Err(e) = self.indexer.index(&stored) {
            warn!(
                pattern_id = %id,
                error = %e,
                "bucket row not persisted, table will be rebuilt on next open"
            );
        }
        let dropped = self.cache.invalidate_bucket(bucket);
        info!(pattern_id = %id, kind = %stored.kind(), bucket, dropped, "pattern stored");
        Ok(id)
    }

    fn usage_feedback(&self, event: &UsageEvent) -> Result<WeightUpdate> {
        let update = self.learner.on_usage(&self.store, event)?;
        let dropped = self.cache.invalidate_pattern(event.pattern_id);
        if dropped > 0 {
            debug!(pattern_id = %event.pattern_id, dropped, "cached rankings invalidated");
        }

        if !event.success {
            let pattern = self.store.get(event.pattern_id)?;
            if let Some(alert) = self.detector.observe(event, &pattern) {
                self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
                self.sink.emit(alert);
            }
        }
        Ok(update)
    }

    fn evict(&self, id: PatternId) -> Result<bool> {
        let Ok(pattern) = self.store.get(id) else {
            return Ok(false);
        };
        let removed = self.store.evict(id)?;
        self.indexer.remove(id, pattern.hash_key())?;
        self.cache.invalidate_pattern(id);
        info!(pattern_id = %id, "pattern evicted");
        Ok(removed)
    }
}

pub struct UpdateQueue {
    tx: mpsc::Sender<UpdateMessage>,
    send_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateQueue {
    pub(crate) fn spawn(writer: Writer, capacity: usize, send_timeout: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name("motif-writer".into())
            .spawn(move || writer.run(rx))?;
        Ok(Self {
            tx,
            send_timeout,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue a message, waiting for a free slot up to the send timeout.
    pub async fn submit(&self, message: UpdateMessage) -> Result<()> {
        match self.tx.send_timeout(message, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(message)) => {
                let waited_ms = self.send_timeout.as_millis() as u64;
                warn!(message = message.label(), waited_ms, "update queue saturated");
                Err(MotifError::QueueSaturated { waited_ms })
            }
            Err(SendTimeoutError::Closed(_)) => Err(MotifError::QueueClosed),
        }
    }

    /// Enqueue a message built around a fresh reply channel and await the reply.
    pub async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> UpdateMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.submit(build(tx)).await?;
        rx.await.map_err(|_| MotifError::QueueClosed)
    }

    /// Messages waiting to be applied.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Drain everything already queued, then stop the writer thread.
    pub async fn shutdown(&self) -> Result<()> {
        match self.request(|reply| UpdateMessage::Shutdown { reply }).await {
            Ok(()) | Err(MotifError::QueueClosed) => {}
            Err(e) => return Err(e),
        }
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!("update queue consumer panicked"),
                Err(e) => error!(error = %e, "failed to join update queue consumer"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::detect::{LogAlertSink, NormalizedErrorSignature};
    use crate::pattern::types::QueryContext;

    fn writer() -> Writer {
        Writer {
            store: Arc::new(PatternStore::new()),
            indexer: Arc::new(HashIndexer::new(1024, 3)),
            cache: Arc::new(QueryCache::new(16)),
            detector: Arc::new(ErrorPatternDetector::new(
                Box::new(NormalizedErrorSignature),
                5,
                chrono::Duration::hours(24),
                5,
            )),
            learner: UsageLearner::new(0.1),
            sink: Arc::new(LogAlertSink),
            alerts_emitted: Arc::new(AtomicU64::new(0)),
            initial_weight: 0.5,
        }
    }

    fn fact(text: &str) -> Payload {
        Payload::ProjectFact { fact: text.into() }
    }

    #[tokio::test]
    async fn messages_apply_in_arrival_order() {
        let w = writer();
        let store = Arc::clone(&w.store);
        let queue = UpdateQueue::spawn(w, 8, Duration::from_secs(1)).unwrap();

        let id = queue
            .request(|reply| UpdateMessage::Store {
                id: None,
                payload: fact("ci runs on every push"),
                tags: vec![],
                reply,
            })
            .await
            .unwrap()
            .unwrap();

        // fire several feedback messages without awaiting in between
        let ctx = QueryContext::new();
        let mut replies = Vec::new();
        for success in [true, true, false, true] {
            let (tx, rx) = oneshot::channel();
            queue
                .submit(UpdateMessage::UsageFeedback {
                    event: UsageEvent::new(id, &ctx, success),
                    reply: tx,
                })
                .await
                .unwrap();
            replies.push(rx);
        }

        let mut expected = 0.5;
        for (rx, success) in replies.into_iter().zip([true, true, false, true]) {
            let update = rx.await.unwrap().unwrap();
            expected = crate::pattern::learn::ema(expected, if success { 1.0 } else { 0.0 }, 0.1);
            assert!((update.new_weight - expected).abs() < 1e-12);
        }
        assert_eq!(store.get(id).unwrap().usage_count(), 4);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn empty_primary_text_is_rejected() {
        let queue = UpdateQueue::spawn(writer(), 8, Duration::from_secs(1)).unwrap();
        let result = queue
            .request(|reply| UpdateMessage::Store {
                id: None,
                payload: fact("   "),
                tags: vec![],
                reply,
            })
            .await
            .unwrap();
        assert!(matches!(result, Err(MotifError::InvalidPattern(_))));
        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_reports_saturation() {
        // a queue whose consumer never drains
        let (tx, _rx) = mpsc::channel(1);
        let queue = UpdateQueue {
            tx,
            send_timeout: Duration::from_millis(20),
            worker: Mutex::new(None),
        };
        let (first, _) = oneshot::channel();
        queue
            .submit(UpdateMessage::Evict {
                id: PatternId(1),
                reply: first,
            })
            .await
            .unwrap();
        assert_eq!(queue.depth(), 1);

        let (second, _) = oneshot::channel();
        let err = queue
            .submit(UpdateMessage::Evict {
                id: PatternId(2),
                reply: second,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MotifError::QueueSaturated { waited_ms: 20 }));
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_closed() {
        let queue = UpdateQueue::spawn(writer(), 8, Duration::from_secs(1)).unwrap();
        queue.shutdown().await.unwrap();
        let err = queue
            .request(|reply| UpdateMessage::Evict {
                id: PatternId(1),
                reply,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MotifError::QueueClosed));
        // a second shutdown is harmless
        queue.shutdown().await.unwrap();
    }
}
