//! Aggregations backed by SQL functions in the source-of-truth database.
//!
//! Each data type is computed by a function
//! `dashcache_<data_type>(entity_id uuid, run_id uuid) RETURNS jsonb`
//! owned by the analytics schema.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    application::{aggregation::AggregationSource, repos::RepoError},
    domain::types::DataType,
};

use super::{PostgresRepositories, map_sqlx_error};

impl PostgresRepositories {
    async fn aggregate(
        &self,
        data_type: DataType,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<Value, RepoError> {
        let sql = format!("SELECT dashcache_{}($1, $2)", data_type.as_str());
        let Json(value) = sqlx::query_scalar::<_, Json<Value>>(&sql)
            .bind(entity_id)
            .bind(run_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(value)
    }
}

#[async_trait]
impl AggregationSource for PostgresRepositories {
    async fn overview(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError> {
        self.aggregate(DataType::Overview, entity_id, run_id).await
    }

    async fn sparklines(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError> {
        self.aggregate(DataType::Sparklines, entity_id, run_id).await
    }

    async fn keyword_overview(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError> {
        self.aggregate(DataType::KeywordOverview, entity_id, run_id)
            .await
    }

    async fn ranking_distribution(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<Value, RepoError> {
        self.aggregate(DataType::RankingDistribution, entity_id, run_id)
            .await
    }

    async fn competitor_summary(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
    ) -> Result<Value, RepoError> {
        self.aggregate(DataType::CompetitorSummary, entity_id, run_id)
            .await
    }

    async fn content_audit(&self, entity_id: Uuid, run_id: Uuid) -> Result<Value, RepoError> {
        self.aggregate(DataType::ContentAudit, entity_id, run_id)
            .await
    }
}
