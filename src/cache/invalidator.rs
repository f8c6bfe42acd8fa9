//! Cache invalidator.
//!
//! Executes the scope of an [`InvalidationEvent`] against the fast-path store,
//! the hot-key registry and, when configured, the edge cache.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::infra::edge::EdgePurger;

use super::events::InvalidationEvent;
use super::registry::HotKeyRegistry;
use super::scope::{InvalidationScope, WarmRequest};
use super::store::CacheStore;

const METRIC_INVALIDATE_KEYS_TOTAL: &str = "dashcache_invalidate_keys_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOutcome {
    /// No edge purger configured or nothing to purge.
    Skipped,
    Purged,
    /// The purge request failed; logged and otherwise ignored.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub event_id: Uuid,
    pub event: &'static str,
    pub keys_deleted: u64,
    pub registry_pruned: usize,
    pub edge: EdgeOutcome,
    /// Set when the event asks for the entity to be rewarmed.
    pub warm: Option<WarmRequest>,
}

pub struct CacheInvalidator {
    store: Arc<CacheStore>,
    registry: Arc<HotKeyRegistry>,
    edge: Option<Arc<dyn EdgePurger>>,
}

impl CacheInvalidator {
    pub fn new(
        store: Arc<CacheStore>,
        registry: Arc<HotKeyRegistry>,
        edge: Option<Arc<dyn EdgePurger>>,
    ) -> Self {
        Self {
            store,
            registry,
            edge,
        }
    }

    /// Apply the scope of `event`. Never fails: store and edge errors degrade.
    #[instrument(skip(self, event), fields(event_id = %event.id, event = %event.kind))]
    pub async fn invalidate(&self, event: InvalidationEvent) -> InvalidationReport {
        let scope = InvalidationScope::for_event(&event.kind, self.store.keys());
        let event_name = event.kind.name();

        if scope.is_full_flush() {
            warn!(scope = %scope, "Flushing entire cache namespace");
        }

        let mut keys_deleted = self.store.delete_many(&scope.keys).await;
        for pattern in &scope.patterns {
            keys_deleted += self.store.delete_pattern(pattern).await;
        }
        let registry_pruned = self.registry.prune(&scope.keys, &scope.patterns);

        let edge = self.purge_edge(&scope).await;

        counter!(METRIC_INVALIDATE_KEYS_TOTAL, "event" => event_name).increment(keys_deleted);
        info!(
            scope = %scope,
            keys_deleted,
            registry_pruned,
            edge = ?edge,
            "Cache invalidation complete"
        );

        InvalidationReport {
            event_id: event.id,
            event: event_name,
            keys_deleted,
            registry_pruned,
            edge,
            warm: scope.warm,
        }
    }

    async fn purge_edge(&self, scope: &InvalidationScope) -> EdgeOutcome {
        let Some(edge) = self.edge.as_ref() else {
            return EdgeOutcome::Skipped;
        };

        let result = if scope.purge_everything {
            edge.purge_everything().await
        } else if scope.edge_tags.is_empty() {
            return EdgeOutcome::Skipped;
        } else {
            edge.purge_tags(&scope.edge_tags).await
        };

        match result {
            Ok(()) => EdgeOutcome::Purged,
            Err(err) => {
                warn!(
                    tags = ?scope.edge_tags,
                    purge_everything = scope.purge_everything,
                    error = %err,
                    "Edge cache purge failed"
                );
                EdgeOutcome::Failed
            }
        }
    }
}
