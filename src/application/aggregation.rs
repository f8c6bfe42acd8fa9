//! Aggregation dispatch.
//!
//! Every [`DataType`] is computed by exactly one [`AggregationSource`] method.
//! Adding a data type is a compile error here until its aggregation exists.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::types::DataType;

/// Computes dashboard aggregates from the source-of-truth store.
#[async_trait]
pub trait AggregationSource: Send + Sync {
    async fn overview(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError>;

    async fn sparklines(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError>;

    async fn keyword_overview(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError>;

    async fn ranking_distribution(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<Value, RepoError>;

    async fn competitor_summary(&self, entity_id: Uuid, run_id: Uuid)
    -> Result<Value, RepoError>;

    async fn content_audit(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError>;
}

impl DataType {
    /// Compute this component for `(entity_id, run_id)`.
    pub async fn compute(
        self,
        source: &dyn AggregationSource,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<Value, RepoError> {
        match self {
            DataType::Overview => source.overview(entity_id, run_id).await,
            DataType::Sparklines => source.sparklines(entity_id, run_id).await,
            DataType::KeywordOverview => source.keyword_overview(entity_id, run_id).await,
            DataType::RankingDistribution => source.ranking_distribution(entity_id, run_id).await,
            DataType::CompetitorSummary => source.competitor_summary(entity_id, run_id).await,
            DataType::ContentAudit => source.content_audit(entity_id, run_id).await,
        }
    }
}
