//! Postgres adapter tests.
//!
//! - Require `DATABASE_URL` pointing at a disposable database.
//! - Marked `#[ignore]`; run with `cargo test -- --ignored`.

mod support;

use dashcache::application::precompute::PrecomputationPipeline;
use dashcache::application::repos::PrecomputedRepo;
use dashcache::domain::types::DataType;
use dashcache::infra::db::PostgresRepositories;
use sqlx::PgPool;
use std::sync::Arc;
use support::ScriptedAggregations;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn publish_demotes_previous_run_atomically(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let entity = Uuid::new_v4();
    let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());

    let pipeline = PrecomputationPipeline::new(repos.clone(), ScriptedAggregations::new());
    pipeline.run(entity, r1).await.expect("publish r1");
    pipeline.run(entity, r2).await.expect("publish r2");

    let current = repos.get_bundle(entity, None).await.expect("current bundle");
    assert_eq!(current.len(), DataType::ALL.len());
    assert!(current.iter().all(|record| record.run_id == r2 && record.is_current));

    let old = repos.get_bundle(entity, Some(r1)).await.expect("old bundle");
    assert_eq!(old.len(), DataType::ALL.len());
    assert!(old.iter().all(|record| !record.is_current));

    let overview = repos
        .get_current(entity, DataType::Overview)
        .await
        .expect("current overview")
        .expect("present");
    assert_eq!(overview.run_id, r2);
    assert_eq!(overview.data["component"], "overview");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn retrying_a_partial_run_fills_the_missing_component(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let entity = Uuid::new_v4();
    let run = Uuid::new_v4();

    let aggregations = ScriptedAggregations::failing(&[DataType::ContentAudit]);
    let pipeline = PrecomputationPipeline::new(repos.clone(), aggregations.clone());
    let first = pipeline.run(entity, run).await.expect("partial publish");
    assert_eq!(first.components_computed.len(), DataType::ALL.len() - 1);
    assert!(
        repos
            .get_current(entity, DataType::ContentAudit)
            .await
            .expect("read")
            .is_none()
    );

    aggregations.heal();
    let retry = pipeline.run(entity, run).await.expect("retry publishes");
    assert!(retry.is_complete());

    let current = repos.get_bundle(entity, None).await.expect("current bundle");
    assert_eq!(current.len(), DataType::ALL.len());
    assert!(current.iter().all(|record| record.run_id == run && record.is_current));

    let run_rows = repos.get_bundle(entity, Some(run)).await.expect("run bundle");
    assert_eq!(run_rows.len(), DataType::ALL.len());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn recent_runs_and_mark_stale(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let pipeline = PrecomputationPipeline::new(repos.clone(), ScriptedAggregations::new());
    pipeline.run(a, Uuid::new_v4()).await.expect("publish a");
    pipeline.run(b, Uuid::new_v4()).await.expect("publish b");

    let since = OffsetDateTime::now_utc() - Duration::days(7);
    let runs = repos.recent_runs(since, 10).await.expect("recent runs");
    assert_eq!(runs.len(), 2);

    assert_eq!(repos.mark_stale(a).await.expect("mark stale"), 6);
    let runs = repos.recent_runs(since, 10).await.expect("recent runs");
    assert_eq!(runs.iter().map(|run| run.entity_id).collect::<Vec<_>>(), vec![b]);
}
