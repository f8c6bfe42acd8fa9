//! Run-completion handling.
//!
//! Wires the precomputation pipeline, the invalidator and the warmer into the
//! "computation completed" flow: publish fresh aggregates, drop what they
//! supersede, then repopulate the fast path.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::precompute::{PipelineError, PipelineSummary, PrecomputationPipeline};
use crate::cache::{CacheInvalidator, InvalidationEvent, InvalidationReport};
use crate::infra::cache_warmer::{CacheWarmer, WarmSummary};

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub pipeline: PipelineSummary,
    pub invalidation: InvalidationReport,
    /// `None` when no warmer is configured.
    pub warmed: Option<WarmSummary>,
}

#[derive(Clone)]
pub struct DashboardRefresher {
    pipeline: PrecomputationPipeline,
    invalidator: Arc<CacheInvalidator>,
    warmer: Option<CacheWarmer>,
}

impl DashboardRefresher {
    pub fn new(
        pipeline: PrecomputationPipeline,
        invalidator: Arc<CacheInvalidator>,
        warmer: Option<CacheWarmer>,
    ) -> Self {
        Self {
            pipeline,
            invalidator,
            warmer,
        }
    }

    /// Publish `run_id`, invalidate the entity's dashboards and rewarm them.
    ///
    /// Nothing is invalidated when publishing fails: the previous run stays
    /// current and its cache entries stay valid.
    #[instrument(skip(self), fields(entity_id = %entity_id, run_id = %run_id))]
    pub async fn on_computation_completed(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<RefreshOutcome, PipelineError> {
        let pipeline = self.pipeline.run(entity_id, run_id).await?;
        let (invalidation, warmed) = self
            .dispatch(InvalidationEvent::computation_completed(entity_id, run_id))
            .await;

        info!(
            computed = pipeline.components_computed.len(),
            failed = pipeline.errors.len(),
            keys_deleted = invalidation.keys_deleted,
            warmed = ?warmed.map(|summary| summary.warmed),
            "Dashboard refresh complete"
        );
        Ok(RefreshOutcome {
            pipeline,
            invalidation,
            warmed,
        })
    }

    /// A failed run publishes nothing; only run listings are dropped.
    pub async fn on_computation_failed(&self, entity_id: Uuid, run_id: Uuid) -> InvalidationReport {
        self.dispatch(InvalidationEvent::computation_failed(entity_id, run_id))
            .await
            .0
    }

    /// Invalidate for `event`, warming afterwards when the event asks for it.
    pub async fn dispatch(
        &self,
        event: InvalidationEvent,
    ) -> (InvalidationReport, Option<WarmSummary>) {
        let report = self.invalidator.invalidate(event).await;
        let warmed = match (report.warm, self.warmer.as_ref()) {
            (Some(request), Some(warmer)) => Some(
                warmer
                    .warm_entity(request.entity_id, request.run_id, None)
                    .await,
            ),
            _ => None,
        };
        (report, warmed)
    }
}
