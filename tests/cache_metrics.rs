mod support;

use std::collections::HashSet;

use dashcache::{
    application::precompute::PrecomputationPipeline,
    cache::{CacheInvalidator, InvalidationEvent},
    domain::types::DataType,
    infra::cache_warmer::{CacheWarmer, WarmerConfig},
};
use metrics_util::debugging::DebuggingRecorder;
use support::{BackendMode, Harness, ScriptedAggregations};
use uuid::Uuid;

#[tokio::test(start_paused = true)]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let harness = Harness::new();
    let entity = Uuid::new_v4();
    let run = Uuid::new_v4();

    // Precompute with one failing component
    PrecomputationPipeline::new(
        harness.repo.clone(),
        ScriptedAggregations::failing(&[DataType::ContentAudit]),
    )
    .run(entity, run)
    .await
    .expect("publish");

    // Warm, then hit and miss
    let warmer = CacheWarmer::new(
        harness.dashboard.clone(),
        harness.repo.clone(),
        harness.registry.clone(),
        WarmerConfig::default(),
    );
    warmer.warm_entity(entity, run, None).await;
    let _ = harness.dashboard.component(entity, DataType::Overview).await;
    let _ = harness.store.get("dashcache:dashboard:absent:overview").await;

    // Invalidate
    CacheInvalidator::new(harness.store.clone(), harness.registry.clone(), None)
        .invalidate(InvalidationEvent::computation_completed(entity, run))
        .await;

    // Errors, breaker trip, rejection
    harness.backend.set_mode(BackendMode::Unavailable);
    for _ in 0..6 {
        let _ = harness.store.get("k").await;
    }

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        "dashcache_store_hit_total",
        "dashcache_store_miss_total",
        "dashcache_store_error_total",
        "dashcache_store_rejected_total",
        "dashcache_breaker_open_total",
        "dashcache_store_latency_ms",
        "dashcache_precompute_ms",
        "dashcache_precompute_component_failed_total",
        "dashcache_invalidate_keys_total",
        "dashcache_warm_ms",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
