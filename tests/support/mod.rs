#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dashcache::{
    application::{
        aggregation::AggregationSource,
        dashboard::{DashboardService, FreshnessPolicy},
        precompute::{PipelineSummary, PrecomputationPipeline},
        repos::{PrecomputedRepo, RepoError},
    },
    cache::{
        BackendError, BreakerConfig, CacheBackend, CacheConfig, CacheStore, CompressionConfig,
        HotKeyRegistry, KeyTtl, MemoryBackend, MemoryUsage,
    },
    domain::{
        entities::{NewPrecomputedRecord, PrecomputedRecord, RecentRun},
        types::DataType,
    },
};
use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// Durable store
// ============================================================================

/// In-process stand-in for the Postgres precomputed table.
#[derive(Default)]
pub struct InMemoryPrecomputed {
    rows: Mutex<Vec<PrecomputedRecord>>,
    fail_publish: Mutex<bool>,
    reads: AtomicUsize,
}

impl InMemoryPrecomputed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_publish(&self) {
        *self.fail_publish.lock().unwrap() = true;
    }

    pub fn rows(&self) -> Vec<PrecomputedRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn current(&self, entity_id: Uuid) -> Vec<PrecomputedRecord> {
        self.rows()
            .into_iter()
            .filter(|row| row.entity_id == entity_id && row.is_current)
            .collect()
    }

    /// Durable reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrecomputedRepo for InMemoryPrecomputed {
    async fn get_current(
        &self,
        entity_id: Uuid,
        data_type: DataType,
    ) -> Result<Option<PrecomputedRecord>, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.entity_id == entity_id && row.data_type == data_type && row.is_current)
            .cloned())
    }

    async fn get_bundle(
        &self,
        entity_id: Uuid,
        run_id: Option<Uuid>,
    ) -> Result<Vec<PrecomputedRecord>, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<PrecomputedRecord> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.entity_id == entity_id)
            .filter(|row| match run_id {
                Some(run_id) => row.run_id == run_id,
                None => row.is_current,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.data_type);
        Ok(rows)
    }

    async fn mark_stale(&self, entity_id: Uuid) -> Result<u64, RepoError> {
        let mut rows = self.rows.lock().unwrap();
        let mut demoted = 0;
        for row in rows.iter_mut() {
            if row.entity_id == entity_id && row.is_current {
                row.is_current = false;
                demoted += 1;
            }
        }
        Ok(demoted)
    }

    async fn publish_run(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
        records: Vec<NewPrecomputedRecord>,
    ) -> Result<Vec<PrecomputedRecord>, RepoError> {
        if std::mem::take(&mut *self.fail_publish.lock().unwrap()) {
            return Err(RepoError::Timeout);
        }

        let now = OffsetDateTime::now_utc();
        let inserted: Vec<PrecomputedRecord> = records
            .into_iter()
            .map(|record| PrecomputedRecord {
                entity_id,
                run_id,
                data_type: record.data_type,
                data: record.data,
                etag: record.etag,
                size_bytes: record.size_bytes,
                is_current: true,
                created_at: now,
            })
            .collect();

        // Demote then upsert on (entity, run, data type) under one lock,
        // mirroring the single transaction.
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.entity_id == entity_id && row.is_current {
                row.is_current = false;
            }
        }
        for record in &inserted {
            rows.retain(|row| {
                (row.entity_id, row.run_id, row.data_type)
                    != (record.entity_id, record.run_id, record.data_type)
            });
            rows.push(record.clone());
        }
        Ok(inserted)
    }

    async fn recent_runs(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<RecentRun>, RepoError> {
        let rows = self.rows.lock().unwrap();
        let mut seen = BTreeSet::new();
        let mut runs: Vec<RecentRun> = rows
            .iter()
            .filter(|row| row.is_current && row.created_at >= since)
            .filter(|row| seen.insert((row.entity_id, row.run_id)))
            .map(|row| RecentRun {
                entity_id: row.entity_id,
                run_id: row.run_id,
                completed_at: row.created_at,
            })
            .collect();
        runs.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }
}

// ============================================================================
// Aggregation source
// ============================================================================

/// Aggregations returning a payload tagged with the run, with selectable failures.
#[derive(Default)]
pub struct ScriptedAggregations {
    failing: Mutex<BTreeSet<DataType>>,
}

impl ScriptedAggregations {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(data_types: &[DataType]) -> Arc<Self> {
        Arc::new(Self {
            failing: Mutex::new(data_types.iter().copied().collect()),
        })
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn produce(
        &self,
        data_type: DataType,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<Value, RepoError> {
        if self.failing.lock().unwrap().contains(&data_type) {
            return Err(RepoError::Persistence(format!(
                "{data_type} aggregation exploded"
            )));
        }
        Ok(json!({
            "entity": entity_id,
            "run": run_id,
            "component": data_type.as_str(),
        }))
    }
}

#[async_trait]
impl AggregationSource for ScriptedAggregations {
    async fn overview(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError> {
        self.produce(DataType::Overview, entity_id, run_id)
    }

    async fn sparklines(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError> {
        self.produce(DataType::Sparklines, entity_id, run_id)
    }

    async fn keyword_overview(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError> {
        self.produce(DataType::KeywordOverview, entity_id, run_id)
    }

    async fn ranking_distribution(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<Value, RepoError> {
        self.produce(DataType::RankingDistribution, entity_id, run_id)
    }

    async fn competitor_summary(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<Value, RepoError> {
        self.produce(DataType::CompetitorSummary, entity_id, run_id)
    }

    async fn content_audit(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError> {
        self.produce(DataType::ContentAudit, entity_id, run_id)
    }
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BackendMode {
    Healthy = 0,
    /// Every call fails with a connectivity error.
    Unavailable = 1,
    /// Every call hangs until the store's timeout fires.
    Hang = 2,
    /// The backend answers, but with a command error.
    Reject = 3,
}

/// Memory backend whose health can be switched at runtime; counts calls.
#[derive(Default)]
pub struct ScriptedBackend {
    inner: MemoryBackend,
    mode: AtomicU8,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_mode(&self, mode: BackendMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    async fn enter(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode.load(Ordering::SeqCst) {
            1 => Err(BackendError::Unavailable("connection refused".into())),
            2 => std::future::pending().await,
            3 => Err(BackendError::Command("WRONGTYPE".into())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CacheBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.enter().await?;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        self.enter().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        self.enter().await?;
        self.inner.delete(keys).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        self.enter().await?;
        self.inner.scan(pattern).await
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        self.enter().await?;
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, BackendError> {
        self.enter().await?;
        self.inner.ttl(key).await
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.enter().await
    }

    async fn memory_usage(&self) -> Result<MemoryUsage, BackendError> {
        self.enter().await?;
        self.inner.memory_usage().await
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Publish every component of `run_id` through the real pipeline.
pub async fn publish(
    repo: &Arc<InMemoryPrecomputed>,
    entity_id: Uuid,
    run_id: Uuid,
) -> PipelineSummary {
    PrecomputationPipeline::new(repo.clone(), ScriptedAggregations::new())
        .run(entity_id, run_id)
        .await
        .expect("publish succeeds")
}

pub fn store_over(backend: Arc<dyn CacheBackend>) -> Arc<CacheStore> {
    Arc::new(CacheStore::new(
        CacheConfig::default(),
        CompressionConfig::default(),
        BreakerConfig::default(),
        backend,
    ))
}

pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub store: Arc<CacheStore>,
    pub registry: Arc<HotKeyRegistry>,
    pub repo: Arc<InMemoryPrecomputed>,
    pub dashboard: DashboardService,
}

impl Harness {
    pub fn new() -> Self {
        let backend = ScriptedBackend::new();
        let store = store_over(backend.clone());
        let registry = Arc::new(HotKeyRegistry::new());
        let repo = InMemoryPrecomputed::new();
        let dashboard = DashboardService::new(
            store.clone(),
            registry.clone(),
            repo.clone(),
            FreshnessPolicy::default(),
        );
        Self {
            backend,
            store,
            registry,
            repo,
            dashboard,
        }
    }
}
