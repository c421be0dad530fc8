mod helpers;

use motif::pattern::{PatternId, QueryContext};
use motif::MotifError;
use std::sync::Arc;

#[tokio::test]
async fn weight_stays_bounded_and_usage_counts_every_event() {
    let engine = helpers::memory_engine(helpers::test_config());
    let id = engine
        .store_pattern(helpers::fact("staging mirrors production"), vec![])
        .await
        .unwrap();
    let ctx = QueryContext::new();

    let before = engine.get_pattern(id).unwrap().usage_count();
    let outcomes = [true, true, true, false, true, false, false, false, true, true, true, true];
    for success in outcomes {
        let update = engine.record_usage(id, &ctx, success).await.unwrap();
        assert!((0.0..=1.0).contains(&update.new_weight));
    }

    let pattern = engine.get_pattern(id).unwrap();
    assert_eq!(pattern.usage_count(), before + outcomes.len() as u64);
    assert!(pattern.last_used_at().is_some());
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let engine = helpers::memory_engine(helpers::test_config());
    let err = engine
        .record_usage(PatternId(42), &QueryContext::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, MotifError::NotFound(PatternId(42))));
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn feedback_invalidates_cached_ranking() {
    let engine = helpers::memory_engine(helpers::single_bucket_config());
    let id = engine
        .store_pattern(helpers::practice("run clippy before pushing"), vec![])
        .await
        .unwrap();
    let ctx = QueryContext::new().with_file_kind("rust");

    let first = engine.retrieve("clippy", &ctx, 5).unwrap();
    let cached = engine.retrieve("clippy", &ctx, 5).unwrap();
    assert_eq!(first, cached);
    assert_eq!(engine.stats().cache_hits, 1);

    let update = engine.record_usage(id, &ctx, true).await.unwrap();
    let fresh = engine.retrieve("clippy", &ctx, 5).unwrap();
    assert_eq!(fresh[0].pattern.weight(), update.new_weight);
    assert_ne!(fresh[0].pattern.weight(), first[0].pattern.weight());
    assert_eq!(engine.stats().cache_hits, 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn storing_invalidates_probed_buckets() {
    let engine = helpers::memory_engine(helpers::single_bucket_config());
    engine
        .store_pattern(helpers::fact("the api speaks grpc"), vec![])
        .await
        .unwrap();
    let ctx = QueryContext::new();
    assert_eq!(engine.retrieve("grpc api", &ctx, 5).unwrap().len(), 1);

    engine
        .store_pattern(helpers::fact("grpc services live under proto/"), vec![])
        .await
        .unwrap();
    assert_eq!(engine.retrieve("grpc api", &ctx, 5).unwrap().len(), 2);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn failures_push_a_pattern_below_its_twin() {
    let engine = helpers::memory_engine(helpers::single_bucket_config());
    let a = engine
        .store_pattern(helpers::practice("log at the boundary"), vec![])
        .await
        .unwrap();
    let b = engine
        .store_pattern(helpers::practice("log at the boundary"), vec![])
        .await
        .unwrap();
    let ctx = QueryContext::new();

    for _ in 0..3 {
        engine.record_usage(b, &ctx, true).await.unwrap();
        engine.record_usage(a, &ctx, false).await.unwrap();
    }

    let results = engine.retrieve("log boundary", &ctx, 2).unwrap();
    assert_eq!(results[0].pattern.id, b);
    assert_eq!(results[1].pattern.id, a);
    assert!(results[0].pattern.weight() > results[1].pattern.weight());
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_feedback_is_applied_in_full() {
    let engine = Arc::new(helpers::memory_engine(helpers::test_config()));
    let id = engine
        .store_pattern(helpers::fact("shared fixture"), vec![])
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let ctx = QueryContext::new().with_task(format!("worker {worker}"));
            for i in 0..25 {
                engine.record_usage(id, &ctx, i % 4 != 0).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let pattern = engine.get_pattern(id).unwrap();
    assert_eq!(pattern.usage_count(), 200);
    assert!((0.0..=1.0).contains(&pattern.weight()));
    engine.shutdown().await.unwrap();
}
