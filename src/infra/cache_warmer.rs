//! Cache warmer.
//!
//! Repopulates the fast-path cache from the durable store: a whole entity
//! right after a run completes, every recently active entity on a schedule,
//! and hot keys shortly before their TTL runs out. Remaining lifetimes are
//! read from the backend, so keys written by other processes count too.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use metrics::histogram;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::application::dashboard::DashboardService;
use crate::application::repos::{PrecomputedRepo, RepoError};
use crate::cache::{HotKeyRegistry, KeyTtl, WarmTarget};
use crate::config::WarmerSettings;
use crate::domain::types::{DataType, ResourceKind};

const METRIC_WARM_MS: &str = "dashcache_warm_ms";

const DEFAULT_INTERVAL_SECS: u64 = 15 * 60;
const DEFAULT_LOOKBACK_DAYS: u32 = 7;
const DEFAULT_ACTIVE_LIMIT: u32 = 50;
const DEFAULT_EXPIRING_THRESHOLD_MINUTES: u64 = 10;
const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum CacheWarmError {
    #[error("failed to list recently active entities: {0}")]
    RecentRuns(#[source] RepoError),
}

#[derive(Debug, Clone)]
pub struct WarmerConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub lookback: Duration,
    pub active_limit: u32,
    pub expiring_threshold_minutes: u64,
    /// Refreshes in flight at once.
    pub concurrency: usize,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            lookback: Duration::from_secs(u64::from(DEFAULT_LOOKBACK_DAYS) * 24 * 60 * 60),
            active_limit: DEFAULT_ACTIVE_LIMIT,
            expiring_threshold_minutes: DEFAULT_EXPIRING_THRESHOLD_MINUTES,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl From<&WarmerSettings> for WarmerConfig {
    fn from(settings: &WarmerSettings) -> Self {
        Self {
            enabled: settings.enabled,
            interval: settings.interval,
            lookback: Duration::from_secs(u64::from(settings.lookback_days.get()) * 24 * 60 * 60),
            active_limit: settings.active_limit.get(),
            expiring_threshold_minutes: settings.expiring_threshold_minutes.get(),
            concurrency: settings.concurrency.get(),
        }
    }
}

/// Counts of one warming pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WarmSummary {
    /// Entries rewritten from the durable store.
    pub warmed: usize,
    /// Targets with no current record.
    pub missing: usize,
    /// Targets whose durable read failed.
    pub failed: usize,
}

impl WarmSummary {
    fn merge(&mut self, other: WarmSummary) {
        self.warmed += other.warmed;
        self.missing += other.missing;
        self.failed += other.failed;
    }

    fn tally(&mut self, outcome: &Result<bool, RepoError>) {
        match outcome {
            Ok(true) => self.warmed += 1,
            Ok(false) => self.missing += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Clone)]
pub struct CacheWarmer {
    dashboards: DashboardService,
    repo: Arc<dyn PrecomputedRepo>,
    registry: Arc<HotKeyRegistry>,
    config: WarmerConfig,
}

impl CacheWarmer {
    pub fn new(
        dashboards: DashboardService,
        repo: Arc<dyn PrecomputedRepo>,
        registry: Arc<HotKeyRegistry>,
        config: WarmerConfig,
    ) -> Self {
        Self {
            dashboards,
            repo,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &WarmerConfig {
        &self.config
    }

    /// Warm `components` of an entity, or every component plus the current
    /// bundle when `None`.
    ///
    /// Components are only ever current, so when `run_id` has been superseded
    /// only that run's bundle is warmed.
    #[instrument(skip(self, components), fields(entity_id = %entity_id, run_id = %run_id))]
    pub async fn warm_entity(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
        components: Option<&[DataType]>,
    ) -> WarmSummary {
        if !self.dashboards.cache_enabled() {
            return WarmSummary::default();
        }
        let started = Instant::now();

        let current_run = match self.repo.get_bundle(entity_id, None).await {
            Ok(records) => records.first().map(|record| record.run_id),
            Err(err) => {
                warn!(error = %err, "Failed to resolve current run, entity not warmed");
                return WarmSummary {
                    failed: 1,
                    ..WarmSummary::default()
                };
            }
        };

        let targets = if current_run == Some(run_id) {
            let mut targets: Vec<WarmTarget> = components
                .unwrap_or(&DataType::ALL)
                .iter()
                .map(|data_type| WarmTarget::Component {
                    entity: entity_id,
                    data_type: *data_type,
                })
                .collect();
            if components.is_none() {
                targets.push(WarmTarget::Bundle {
                    entity: entity_id,
                    run: None,
                });
            }
            targets
        } else {
            warn!(
                current_run = ?current_run,
                "Run is not current, warming its bundle only"
            );
            vec![WarmTarget::Bundle {
                entity: entity_id,
                run: Some(run_id),
            }]
        };

        let summary = self.refresh_all(targets).await;
        record_elapsed("entity", started);
        debug!(
            warmed = summary.warmed,
            missing = summary.missing,
            failed = summary.failed,
            "Entity warmed"
        );
        summary
    }

    /// Warm entities whose latest run completed within the lookback window.
    #[instrument(skip(self))]
    pub async fn warm_active_entities(&self, limit: u32) -> Result<WarmSummary, CacheWarmError> {
        if !self.dashboards.cache_enabled() {
            return Ok(WarmSummary::default());
        }
        let started = Instant::now();
        let since = OffsetDateTime::now_utc() - self.config.lookback;
        let runs = self
            .repo
            .recent_runs(since, limit)
            .await
            .map_err(CacheWarmError::RecentRuns)?;

        let mut summary = WarmSummary::default();
        for run in &runs {
            summary.merge(self.warm_entity(run.entity_id, run.run_id, None).await);
        }

        record_elapsed("active", started);
        info!(
            entities = runs.len(),
            warmed = summary.warmed,
            failed = summary.failed,
            "Active entities warmed"
        );
        Ok(summary)
    }

    /// Refresh hot keys whose remaining TTL is at most `threshold_minutes`.
    ///
    /// Candidates are the registry plus every dashboard and bundle key in the
    /// namespace. Registry entries whose key is gone are dropped.
    #[instrument(skip(self))]
    pub async fn warm_expiring_entries(&self, threshold_minutes: u64) -> WarmSummary {
        if !self.dashboards.cache_enabled() {
            return WarmSummary::default();
        }
        let started = Instant::now();
        let threshold = Duration::from_secs(threshold_minutes.saturating_mul(60));

        let checked: Vec<(String, WarmTarget, Option<KeyTtl>)> =
            stream::iter(self.hot_keys().await)
                .map(|(key, target)| async move {
                    let ttl = self.dashboards.cache().ttl(&key).await;
                    (key, target, ttl)
                })
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut expiring = Vec::new();
        for (key, target, ttl) in checked {
            match ttl {
                Some(KeyTtl::Expires(remaining)) if remaining <= threshold => {
                    expiring.push((key, target));
                }
                Some(KeyTtl::Missing) => self.registry.remove(&key),
                _ => {}
            }
        }
        if expiring.is_empty() {
            return WarmSummary::default();
        }

        let outcomes: Vec<(String, Result<bool, RepoError>)> = stream::iter(expiring)
            .map(|(key, target)| async move { (key, self.dashboards.refresh(target).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut summary = WarmSummary::default();
        for (key, outcome) in &outcomes {
            summary.tally(outcome);
            match outcome {
                Ok(false) => self.registry.remove(key),
                Err(err) => warn!(key = %key, error = %err, "Failed to refresh expiring entry"),
                Ok(true) => {}
            }
        }

        record_elapsed("expiring", started);
        info!(
            warmed = summary.warmed,
            missing = summary.missing,
            failed = summary.failed,
            "Expiring entries refreshed"
        );
        summary
    }

    /// One scheduled pass: active entities, then expiring entries.
    pub async fn run_cycle(&self) -> WarmSummary {
        let mut summary = match self.warm_active_entities(self.config.active_limit).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "Active entity warming skipped");
                WarmSummary::default()
            }
        };
        summary.merge(
            self.warm_expiring_entries(self.config.expiring_threshold_minutes)
                .await,
        );
        summary
    }

    async fn hot_keys(&self) -> BTreeMap<String, WarmTarget> {
        let store = self.dashboards.cache();
        let mut candidates: BTreeMap<String, WarmTarget> =
            self.registry.entries().into_iter().collect();
        for kind in [ResourceKind::Dashboard, ResourceKind::Bundle] {
            for key in store.scan(&store.keys().kind_pattern(kind)).await {
                if let Some(target) = store.keys().warm_target(&key) {
                    candidates.entry(key).or_insert(target);
                }
            }
        }
        candidates
    }

    async fn refresh_all(&self, targets: Vec<WarmTarget>) -> WarmSummary {
        let outcomes: Vec<(WarmTarget, Result<bool, RepoError>)> = stream::iter(targets)
            .map(|target| async move { (target, self.dashboards.refresh(target).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut summary = WarmSummary::default();
        for (target, outcome) in &outcomes {
            if let Err(err) = outcome {
                warn!(warm_target = ?target, error = %err, "Failed to warm cache entry");
            }
            summary.tally(outcome);
        }
        summary
    }
}

fn record_elapsed(scope: &'static str, started: Instant) {
    histogram!(METRIC_WARM_MS, "scope" => scope).record(started.elapsed().as_secs_f64() * 1000.0);
}
