//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{NewPrecomputedRecord, PrecomputedRecord, RecentRun};
use crate::domain::types::DataType;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Durable store of precomputed dashboard components.
///
/// At most one row per `(entity, data_type)` is current. Rows are demoted,
/// never deleted, so superseded runs stay readable by run id.
#[async_trait]
pub trait PrecomputedRepo: Send + Sync {
    /// The current record of one component.
    async fn get_current(
        &self,
        entity_id: Uuid,
        data_type: DataType,
    ) -> Result<Option<PrecomputedRecord>, RepoError>;

    /// Every record of `run_id`, or the current records when `None`.
    async fn get_bundle(
        &self,
        entity_id: Uuid,
        run_id: Option<Uuid>,
    ) -> Result<Vec<PrecomputedRecord>, RepoError>;

    /// Demote every current record of the entity. Returns rows affected.
    async fn mark_stale(&self, entity_id: Uuid) -> Result<u64, RepoError>;

    /// In one transaction, demote the entity's current records and insert
    /// `records` as the new current set for `run_id`.
    async fn publish_run(
        &self,
        entity_id: Uuid,
        run_id: Uuid,
        records: Vec<NewPrecomputedRecord>,
    ) -> Result<Vec<PrecomputedRecord>, RepoError>;

    /// Latest current run per entity completed at or after `since`, newest first.
    async fn recent_runs(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<RecentRun>, RepoError>;
}
