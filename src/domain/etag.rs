//! Entity tags for precomputed dashboard data.
//!
//! A component's ETag depends only on which run produced it, so it can be
//! derived without reading the payload and stays stable across cache refills.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::entities::PrecomputedRecord;
use super::types::DataType;

pub fn component_etag(entity_id: Uuid, data_type: DataType, run_id: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_bytes());
    hasher.update(data_type.as_str().as_bytes());
    hasher.update(run_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Combined tag for a set of records, independent of their order.
pub fn bundle_etag(records: &[PrecomputedRecord]) -> String {
    let mut etags: Vec<&str> = records.iter().map(|record| record.etag.as_str()).collect();
    etags.sort_unstable();

    let mut hasher = Sha256::new();
    for etag in etags {
        hasher.update(etag.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
