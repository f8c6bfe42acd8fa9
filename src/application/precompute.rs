//! Precomputation pipeline.
//!
//! Computes every dashboard component for a completed run, then publishes the
//! successful ones in a single durable-store transaction. A failing component
//! is reported by name and never blocks the others.

use std::sync::Arc;

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::aggregation::AggregationSource;
use crate::application::repos::{PrecomputedRepo, RepoError};
use crate::domain::entities::NewPrecomputedRecord;
use crate::domain::etag::component_etag;
use crate::domain::types::DataType;

const METRIC_PRECOMPUTE_MS: &str = "dashcache_precompute_ms";
const METRIC_COMPONENT_FAILED_TOTAL: &str = "dashcache_precompute_component_failed_total";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentFailure {
    pub data_type: DataType,
    pub message: String,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub entity_id: Uuid,
    pub run_id: Uuid,
    pub components_computed: Vec<DataType>,
    pub errors: Vec<ComponentFailure>,
}

impl PipelineSummary {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failed(&self) -> impl Iterator<Item = DataType> + '_ {
        self.errors.iter().map(|failure| failure.data_type)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to publish run {run_id} for entity {entity_id}: {source}")]
    Publish {
        entity_id: Uuid,
        run_id: Uuid,
        #[source]
        source: RepoError,
    },
}

#[derive(Clone)]
pub struct PrecomputationPipeline {
    precomputed: Arc<dyn PrecomputedRepo>,
    source: Arc<dyn AggregationSource>,
}

impl PrecomputationPipeline {
    pub fn new(precomputed: Arc<dyn PrecomputedRepo>, source: Arc<dyn AggregationSource>) -> Self {
        Self {
            precomputed,
            source,
        }
    }

    /// Compute and publish every component of `(entity_id, run_id)`.
    ///
    /// Components that fail have no current record until a later run
    /// computes them successfully.
    #[instrument(skip(self), fields(entity_id = %entity_id, run_id = %run_id))]
    pub async fn run(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<PipelineSummary, PipelineError> {
        let started = Instant::now();
        let source = self.source.as_ref();

        let results = join_all(DataType::ALL.into_iter().map(|data_type| async move {
            (
                data_type,
                data_type.compute(source, entity_id, run_id).await,
            )
        }))
        .await;

        let mut records = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (data_type, result) in results {
            match result {
                Ok(data) => records.push(new_record(entity_id, run_id, data_type, data)),
                Err(err) => {
                    warn!(data_type = %data_type, error = %err, "Dashboard component failed");
                    counter!(METRIC_COMPONENT_FAILED_TOTAL, "data_type" => data_type.as_str())
                        .increment(1);
                    errors.push(ComponentFailure {
                        data_type,
                        message: err.to_string(),
                    });
                }
            }
        }

        let published = self
            .precomputed
            .publish_run(entity_id, run_id, records)
            .await
            .map_err(|source| PipelineError::Publish {
                entity_id,
                run_id,
                source,
            })?;

        let elapsed = started.elapsed();
        histogram!(METRIC_PRECOMPUTE_MS).record(elapsed.as_secs_f64() * 1000.0);

        let summary = PipelineSummary {
            entity_id,
            run_id,
            components_computed: published.iter().map(|record| record.data_type).collect(),
            errors,
        };
        info!(
            computed = summary.components_computed.len(),
            failed = summary.errors.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Precomputation run published"
        );
        Ok(summary)
    }
}

fn new_record(
    entity_id: Uuid,
    run_id: Uuid,
    data_type: DataType,
    data: serde_json::Value,
) -> NewPrecomputedRecord {
    let size_bytes = serde_json::to_vec(&data)
        .map(|bytes| i32::try_from(bytes.len()).unwrap_or(i32::MAX))
        .unwrap_or_default();
    NewPrecomputedRecord {
        data_type,
        data,
        etag: component_etag(entity_id, data_type, run_id),
        size_bytes,
    }
}
