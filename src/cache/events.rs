//! Invalidation events.
//!
//! Producers describe what changed; [`super::scope::InvalidationScope`] maps
//! each event to the narrowest set of cache entries it affects.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::ResourceKind;

/// An invalidation event, consumed once by [`super::CacheInvalidator::invalidate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    /// Unique identifier for log correlation.
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl InvalidationEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn entity_created(entity_id: Uuid) -> Self {
        Self::new(EventKind::EntityCreated { entity_id })
    }

    pub fn entity_updated(entity_id: Uuid) -> Self {
        Self::new(EventKind::EntityUpdated { entity_id })
    }

    pub fn entity_deleted(entity_id: Uuid) -> Self {
        Self::new(EventKind::EntityDeleted { entity_id })
    }

    pub fn computation_completed(entity_id: Uuid, run_id: Uuid) -> Self {
        Self::new(EventKind::ComputationCompleted { entity_id, run_id })
    }

    pub fn computation_failed(entity_id: Uuid, run_id: Uuid) -> Self {
        Self::new(EventKind::ComputationFailed { entity_id, run_id })
    }

    pub fn sub_resource_updated(
        entity_id: Uuid,
        kind: ResourceKind,
        resource_id: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::SubResourceUpdated {
            entity_id,
            kind,
            resource_id: resource_id.into(),
        })
    }

    /// Administrative flush of the whole namespace.
    pub fn invalidate_all() -> Self {
        Self::new(EventKind::InvalidateAll)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    EntityCreated {
        entity_id: Uuid,
    },
    EntityUpdated {
        entity_id: Uuid,
    },
    EntityDeleted {
        entity_id: Uuid,
    },
    ComputationCompleted {
        entity_id: Uuid,
        run_id: Uuid,
    },
    ComputationFailed {
        entity_id: Uuid,
        run_id: Uuid,
    },
    /// A keyword, competitor or other nested resource of an entity changed.
    SubResourceUpdated {
        entity_id: Uuid,
        kind: ResourceKind,
        resource_id: String,
    },
    InvalidateAll,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::EntityCreated { .. } => "entity_created",
            EventKind::EntityUpdated { .. } => "entity_updated",
            EventKind::EntityDeleted { .. } => "entity_deleted",
            EventKind::ComputationCompleted { .. } => "computation_completed",
            EventKind::ComputationFailed { .. } => "computation_failed",
            EventKind::SubResourceUpdated { .. } => "sub_resource_updated",
            EventKind::InvalidateAll => "invalidate_all",
        }
    }

    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            EventKind::EntityCreated { entity_id }
            | EventKind::EntityUpdated { entity_id }
            | EventKind::EntityDeleted { entity_id }
            | EventKind::ComputationCompleted { entity_id, .. }
            | EventKind::ComputationFailed { entity_id, .. }
            | EventKind::SubResourceUpdated { entity_id, .. } => Some(*entity_id),
            EventKind::InvalidateAll => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity_id() {
            Some(entity_id) => write!(f, "{}({entity_id})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}
