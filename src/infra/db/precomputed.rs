use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{PrecomputedRepo, RepoError},
    domain::entities::{NewPrecomputedRecord, PrecomputedRecord, RecentRun},
    domain::types::DataType,
};

use super::{PostgresRepositories, map_sqlx_error};

const RECORD_COLUMNS: &str =
    "entity_id, run_id, data_type, data, etag, size_bytes, is_current, created_at";

#[derive(sqlx::FromRow)]
struct PrecomputedRow {
    entity_id: Uuid,
    run_id: Uuid,
    data_type: String,
    data: Json<Value>,
    etag: String,
    size_bytes: i32,
    is_current: bool,
    created_at: OffsetDateTime,
}

impl TryFrom<PrecomputedRow> for PrecomputedRecord {
    type Error = RepoError;

    fn try_from(row: PrecomputedRow) -> Result<Self, Self::Error> {
        let data_type = row
            .data_type
            .parse::<DataType>()
            .map_err(|err| RepoError::Integrity {
                message: err.to_string(),
            })?;
        Ok(Self {
            entity_id: row.entity_id,
            run_id: row.run_id,
            data_type,
            data: row.data.0,
            etag: row.etag,
            size_bytes: row.size_bytes,
            is_current: row.is_current,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecentRunRow {
    entity_id: Uuid,
    run_id: Uuid,
    completed_at: OffsetDateTime,
}

fn into_records(rows: Vec<PrecomputedRow>) -> Result<Vec<PrecomputedRecord>, RepoError> {
    rows.into_iter().map(PrecomputedRecord::try_from).collect()
}

#[async_trait]
impl PrecomputedRepo for PostgresRepositories {
    async fn get_current(
        &self,
        entity_id: Uuid,
        data_type: DataType,
    ) -> Result<Option<PrecomputedRecord>, RepoError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM precomputed_dashboard_data \
             WHERE entity_id = $1 AND data_type = $2 AND is_current"
        );
        let row = sqlx::query_as::<_, PrecomputedRow>(&sql)
            .bind(entity_id)
            .bind(data_type.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(PrecomputedRecord::try_from).transpose()
    }

    async fn get_bundle(
        &self,
        entity_id: Uuid,
        run_id: Option<Uuid>,
    ) -> Result<Vec<PrecomputedRecord>, RepoError> {
        let rows = match run_id {
            Some(run_id) => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM precomputed_dashboard_data \
                     WHERE entity_id = $1 AND run_id = $2 ORDER BY data_type"
                );
                sqlx::query_as::<_, PrecomputedRow>(&sql)
                    .bind(entity_id)
                    .bind(run_id)
                    .fetch_all(self.pool())
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM precomputed_dashboard_data \
                     WHERE entity_id = $1 AND is_current ORDER BY data_type"
                );
                sqlx::query_as::<_, PrecomputedRow>(&sql)
                    .bind(entity_id)
                    .fetch_all(self.pool())
                    .await
            }
        }
        .map_err(map_sqlx_error)?;

        into_records(rows)
    }

    async fn mark_stale(&self, entity_id: Uuid) -> Result<u64, RepoError> {
        let result = sqlx::query(
            "UPDATE precomputed_dashboard_data SET is_current = FALSE \
             WHERE entity_id = $1 AND is_current",
        )
        .bind(entity_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn publish_run(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
        records: Vec<NewPrecomputedRecord>,
    ) -> Result<Vec<PrecomputedRecord>, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            "UPDATE precomputed_dashboard_data SET is_current = FALSE \
             WHERE entity_id = $1 AND is_current",
        )
        .bind(entity_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let sql = format!(
            "INSERT INTO precomputed_dashboard_data \
             (entity_id, run_id, data_type, data, etag, size_bytes, is_current) \
             VALUES ($1, $2, $3, $4, $5, $6, TRUE) \
             ON CONFLICT (entity_id, run_id, data_type) DO UPDATE SET \
             data = EXCLUDED.data, etag = EXCLUDED.etag, size_bytes = EXCLUDED.size_bytes, \
             is_current = TRUE, created_at = now() \
             RETURNING {RECORD_COLUMNS}"
        );
        let mut published = Vec::with_capacity(records.len());
        for record in records {
            let row = sqlx::query_as::<_, PrecomputedRow>(&sql)
                .bind(entity_id)
                .bind(run_id)
                .bind(record.data_type.as_str())
                .bind(Json(record.data))
                .bind(record.etag)
                .bind(record.size_bytes)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            published.push(PrecomputedRecord::try_from(row)?);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(published)
    }

    async fn recent_runs(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<RecentRun>, RepoError> {
        let rows = sqlx::query_as::<_, RecentRunRow>(
            "SELECT entity_id, run_id, MAX(created_at) AS completed_at \
             FROM precomputed_dashboard_data \
             WHERE is_current AND created_at >= $1 \
             GROUP BY entity_id, run_id \
             ORDER BY completed_at DESC \
             LIMIT $2",
        )
        .bind(since)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| RecentRun {
                entity_id: row.entity_id,
                run_id: row.run_id,
                completed_at: row.completed_at,
            })
            .collect())
    }
}
