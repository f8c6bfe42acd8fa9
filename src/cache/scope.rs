//! Event → invalidation scope table.
//!
//! Each event maps to the narrowest set of exact keys, key patterns and edge
//! tags it can affect. Only [`EventKind::InvalidateAll`] flushes the whole
//! namespace.
//!
//! Edge tags are the ones served payloads carry: [`entity_tag`] and
//! [`run_tag`]. Sub-resources are never served through the edge, so their
//! events purge nothing there.

use std::fmt;

use uuid::Uuid;

use crate::domain::types::ResourceKind;

use super::events::EventKind;
use super::keys::CacheKeys;

/// Request to repopulate an entity after invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmRequest {
    pub entity_id: Uuid,
    pub run_id: Uuid,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationScope {
    /// Keys deleted as-is.
    pub keys: Vec<String>,
    /// Glob patterns deleted through a scan.
    pub patterns: Vec<String>,
    /// Edge-cache tags to purge.
    pub edge_tags: Vec<String>,
    /// Purge the entire edge zone.
    pub purge_everything: bool,
    pub warm: Option<WarmRequest>,
}

impl fmt::Display for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationScope {{ keys: {}, patterns: {}, edge_tags: {}, purge_everything: {}, warm: {} }}",
            self.keys.len(),
            self.patterns.len(),
            self.edge_tags.len(),
            self.purge_everything,
            self.warm.is_some(),
        )
    }
}

pub fn entity_tag(entity_id: Uuid) -> String {
    format!("entity:{entity_id}")
}

pub fn run_tag(run_id: Uuid) -> String {
    format!("run:{run_id}")
}

impl InvalidationScope {
    pub fn for_event(kind: &EventKind, keys: &CacheKeys) -> Self {
        match kind {
            EventKind::EntityCreated { entity_id } | EventKind::EntityUpdated { entity_id } => {
                Self {
                    keys: vec![keys.entity(*entity_id)],
                    patterns: vec![
                        keys.entity_pattern(ResourceKind::Entity, *entity_id),
                        keys.global_listing_pattern(),
                    ],
                    edge_tags: vec![entity_tag(*entity_id)],
                    ..Self::default()
                }
            }
            EventKind::EntityDeleted { entity_id } => {
                let mut patterns: Vec<String> = ResourceKind::ALL
                    .into_iter()
                    .map(|kind| keys.entity_pattern(kind, *entity_id))
                    .collect();
                patterns.push(keys.global_listing_pattern());
                Self {
                    keys: vec![keys.entity(*entity_id)],
                    patterns,
                    edge_tags: vec![entity_tag(*entity_id)],
                    ..Self::default()
                }
            }
            EventKind::ComputationCompleted { entity_id, run_id } => Self {
                patterns: vec![
                    keys.entity_pattern(ResourceKind::Dashboard, *entity_id),
                    keys.entity_pattern(ResourceKind::Bundle, *entity_id),
                    keys.entity_pattern(ResourceKind::Listing, *entity_id),
                ],
                edge_tags: vec![entity_tag(*entity_id), run_tag(*run_id)],
                warm: Some(WarmRequest {
                    entity_id: *entity_id,
                    run_id: *run_id,
                }),
                ..Self::default()
            },
            EventKind::ComputationFailed { entity_id, run_id } => Self {
                patterns: vec![keys.entity_pattern(ResourceKind::Listing, *entity_id)],
                edge_tags: vec![run_tag(*run_id)],
                ..Self::default()
            },
            EventKind::SubResourceUpdated {
                entity_id,
                kind,
                resource_id,
            } => Self {
                keys: vec![keys.sub_resource(*kind, *entity_id, resource_id)],
                patterns: vec![keys.sub_resource_pattern(*kind, *entity_id, resource_id)],
                ..Self::default()
            },
            EventKind::InvalidateAll => Self {
                patterns: vec![keys.namespace_pattern()],
                purge_everything: true,
                ..Self::default()
            },
        }
    }

    pub fn is_full_flush(&self) -> bool {
        self.purge_everything
    }
}
