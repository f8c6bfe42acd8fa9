//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::DataType;

/// One persisted dashboard component for an (entity, run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedRecord {
    pub entity_id: Uuid,
    pub run_id: Uuid,
    pub data_type: DataType,
    pub data: Value,
    pub etag: String,
    pub size_bytes: i32,
    pub is_current: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A freshly computed component awaiting publication.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrecomputedRecord {
    pub data_type: DataType,
    pub data: Value,
    pub etag: String,
    pub size_bytes: i32,
}

/// Every component of an entity for one run, as served to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardBundle {
    pub entity_id: Uuid,
    pub run_id: Uuid,
    /// False when the run has been superseded.
    pub is_current: bool,
    pub records: Vec<PrecomputedRecord>,
}

impl DashboardBundle {
    /// Group records belonging to a single run.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_records(records: Vec<PrecomputedRecord>) -> Option<Self> {
        let first = records.first()?;
        let entity_id = first.entity_id;
        let run_id = first.run_id;
        let is_current = records.iter().all(|record| record.is_current);
        Some(Self {
            entity_id,
            run_id,
            is_current,
            records,
        })
    }

    pub fn get(&self, data_type: DataType) -> Option<&PrecomputedRecord> {
        self.records
            .iter()
            .find(|record| record.data_type == data_type)
    }

    /// Most recent creation time across the bundle.
    pub fn last_modified(&self) -> Option<OffsetDateTime> {
        self.records.iter().map(|record| record.created_at).max()
    }
}

/// A completed run eligible for warming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecentRun {
    pub entity_id: Uuid,
    pub run_id: Uuid,
    pub completed_at: OffsetDateTime,
}
