//! Dashboard read service.
//!
//! Serves precomputed components cache-first, falling back to the durable
//! store on a miss and writing the result back with its data type's freshness
//! TTL. Every payload comes with the [`CachePolicy`] for its HTTP response.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::response::Response;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::application::http_cache::{CachePolicy, Visibility};
use crate::application::repos::{PrecomputedRepo, RepoError};
use crate::cache::{CacheStore, HotKeyRegistry, WarmTarget};
use crate::config::FreshnessSettings;
use crate::domain::entities::{DashboardBundle, PrecomputedRecord};
use crate::domain::types::DataType;

const DEFAULT_STALE_WHILE_REVALIDATE_SECS: u64 = 300;

/// Per data type cache lifetimes.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    ttls: BTreeMap<DataType, Duration>,
    pub stale_while_revalidate: Duration,
    pub visibility: Visibility,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            ttls: DataType::ALL
                .into_iter()
                .map(|data_type| (data_type, data_type.default_freshness()))
                .collect(),
            stale_while_revalidate: Duration::from_secs(DEFAULT_STALE_WHILE_REVALIDATE_SECS),
            visibility: Visibility::Public,
        }
    }
}

impl From<&FreshnessSettings> for FreshnessPolicy {
    fn from(settings: &FreshnessSettings) -> Self {
        Self {
            ttls: DataType::ALL
                .into_iter()
                .map(|data_type| (data_type, settings.ttl(data_type)))
                .collect(),
            stale_while_revalidate: settings.stale_while_revalidate,
            visibility: if settings.private {
                Visibility::Private
            } else {
                Visibility::Public
            },
        }
    }
}

impl FreshnessPolicy {
    pub fn ttl(&self, data_type: DataType) -> Duration {
        self.ttls
            .get(&data_type)
            .copied()
            .unwrap_or_else(|| data_type.default_freshness())
    }

    /// The shortest lifetime among `data_types`; a bundle is only as fresh as
    /// its most volatile component.
    pub fn bundle_ttl(&self, data_types: impl IntoIterator<Item = DataType>) -> Duration {
        data_types
            .into_iter()
            .map(|data_type| self.ttl(data_type))
            .min()
            .unwrap_or_else(|| self.ttl(DataType::Overview))
    }

    pub fn with_ttl(mut self, data_type: DataType, ttl: Duration) -> Self {
        self.ttls.insert(data_type, ttl);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedFrom {
    Cache,
    Store,
}

/// A payload together with where it came from and how clients may cache it.
#[derive(Debug, Clone)]
pub struct Served<T> {
    pub value: T,
    pub source: ServedFrom,
    pub policy: CachePolicy,
}

impl<T: Serialize> Served<T> {
    /// JSON response, or `304 Not Modified` when the request is current.
    pub fn respond(&self, request: &HeaderMap) -> Response {
        self.policy.respond(request, &self.value)
    }
}

#[derive(Clone)]
pub struct DashboardService {
    store: Arc<CacheStore>,
    registry: Arc<HotKeyRegistry>,
    repo: Arc<dyn PrecomputedRepo>,
    freshness: FreshnessPolicy,
}

impl DashboardService {
    pub fn new(
        store: Arc<CacheStore>,
        registry: Arc<HotKeyRegistry>,
        repo: Arc<dyn PrecomputedRepo>,
        freshness: FreshnessPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            repo,
            freshness,
        }
    }

    pub fn freshness(&self) -> &FreshnessPolicy {
        &self.freshness
    }

    pub fn cache_enabled(&self) -> bool {
        self.store.is_enabled()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.store
    }

    /// The current record of one component.
    #[instrument(skip(self), fields(entity_id = %entity_id, data_type = %data_type))]
    pub async fn component(
        &self,
        entity_id: Uuid,
        data_type: DataType,
    ) -> Result<Option<Served<PrecomputedRecord>>, RepoError> {
        let key = self.store.keys().dashboard(entity_id, data_type);
        if let Some(record) = self.cached::<PrecomputedRecord>(&key).await {
            return Ok(Some(self.serve_record(record, ServedFrom::Cache)));
        }
        self.load_component(entity_id, data_type)
            .await
            .map(|record| record.map(|record| self.serve_record(record, ServedFrom::Store)))
    }

    /// Every component of `run_id`, or of the current run when `None`.
    ///
    /// A superseded run is still served, flagged through `is_current`.
    #[instrument(skip(self), fields(entity_id = %entity_id, run_id = ?run_id))]
    pub async fn bundle(
        &self,
        entity_id: Uuid,
        run_id: Option<Uuid>,
    ) -> Result<Option<Served<DashboardBundle>>, RepoError> {
        let key = self.store.keys().bundle(entity_id, run_id);
        if let Some(bundle) = self.cached::<DashboardBundle>(&key).await {
            return Ok(Some(self.serve_bundle(bundle, ServedFrom::Cache)));
        }
        self.load_bundle(entity_id, run_id)
            .await
            .map(|bundle| bundle.map(|bundle| self.serve_bundle(bundle, ServedFrom::Store)))
    }

    /// Reload one component from the durable store and rewrite its cache entry.
    ///
    /// Returns whether a current record exists.
    pub async fn refresh_component(
        &self,
        entity_id: Uuid,
        data_type: DataType,
    ) -> Result<bool, RepoError> {
        Ok(self.load_component(entity_id, data_type).await?.is_some())
    }

    /// Reload a bundle from the durable store and rewrite its cache entry.
    pub async fn refresh_bundle(
        &self,
        entity_id: Uuid,
        run_id: Option<Uuid>,
    ) -> Result<bool, RepoError> {
        Ok(self.load_bundle(entity_id, run_id).await?.is_some())
    }

    pub async fn refresh(&self, target: WarmTarget) -> Result<bool, RepoError> {
        match target {
            WarmTarget::Component { entity, data_type } => {
                self.refresh_component(entity, data_type).await
            }
            WarmTarget::Bundle { entity, run } => self.refresh_bundle(entity, run).await,
        }
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.store.get_json::<T>(key).await;
        debug!(key, hit = value.is_some(), "Dashboard cache lookup");
        value
    }

    async fn load_component(
        &self,
        entity_id: Uuid,
        data_type: DataType,
    ) -> Result<Option<PrecomputedRecord>, RepoError> {
        let Some(record) = self.repo.get_current(entity_id, data_type).await? else {
            return Ok(None);
        };
        let key = self.store.keys().dashboard(entity_id, data_type);
        self.write_back(
            &key,
            &record,
            self.freshness.ttl(data_type),
            WarmTarget::Component {
                entity: entity_id,
                data_type,
            },
        )
        .await;
        Ok(Some(record))
    }

    async fn load_bundle(
        &self,
        entity_id: Uuid,
        run_id: Option<Uuid>,
    ) -> Result<Option<DashboardBundle>, RepoError> {
        let records = self.repo.get_bundle(entity_id, run_id).await?;
        let Some(bundle) = DashboardBundle::from_records(records) else {
            return Ok(None);
        };
        let key = self.store.keys().bundle(entity_id, run_id);
        let ttl = self
            .freshness
            .bundle_ttl(bundle.records.iter().map(|record| record.data_type));
        self.write_back(
            &key,
            &bundle,
            ttl,
            WarmTarget::Bundle {
                entity: entity_id,
                run: run_id,
            },
        )
        .await;
        Ok(Some(bundle))
    }

    async fn write_back<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        target: WarmTarget,
    ) {
        if self.store.set_json(key, value, Some(ttl)).await {
            self.registry.record(key, target);
        }
    }

    fn serve_record(&self, record: PrecomputedRecord, source: ServedFrom) -> Served<PrecomputedRecord> {
        let policy = CachePolicy::for_record(
            &record,
            self.freshness.visibility,
            self.freshness.ttl(record.data_type),
            self.freshness.stale_while_revalidate,
        );
        Served {
            value: record,
            source,
            policy,
        }
    }

    fn serve_bundle(&self, bundle: DashboardBundle, source: ServedFrom) -> Served<DashboardBundle> {
        let max_age = self
            .freshness
            .bundle_ttl(bundle.records.iter().map(|record| record.data_type));
        let policy = CachePolicy::for_bundle(
            &bundle,
            self.freshness.visibility,
            max_age,
            self.freshness.stale_while_revalidate,
        );
        Served {
            value: bundle,
            source,
            policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_ttl_is_the_shortest_component_ttl() {
        let policy = FreshnessPolicy::default();
        assert_eq!(
            policy.bundle_ttl([DataType::ContentAudit, DataType::Sparklines]),
            Duration::from_secs(4 * 3600)
        );
        assert_eq!(
            policy.bundle_ttl([DataType::ContentAudit]),
            Duration::from_secs(12 * 3600)
        );
    }

    #[test]
    fn overrides_replace_defaults() {
        let policy =
            FreshnessPolicy::default().with_ttl(DataType::Overview, Duration::from_secs(60));
        assert_eq!(policy.ttl(DataType::Overview), Duration::from_secs(60));
        assert_eq!(
            policy.ttl(DataType::Sparklines),
            DataType::Sparklines.default_freshness()
        );
    }
}
