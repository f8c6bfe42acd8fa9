//! Cache key layout.
//!
//! Every key has the shape `{namespace}:{resource-kind}:{entity}:{subkey...}`
//! so that a single glob can select one entity's entries of one kind without
//! touching anything else.

use std::fmt::Display;

use uuid::Uuid;

use crate::domain::types::{DataType, ResourceKind};

use super::registry::WarmTarget;

/// Entity slot used by listings that span every entity.
pub const GLOBAL_SCOPE: &str = "all";
/// Subkey of the bundle tracking whichever run is current.
pub const CURRENT_RUN: &str = "current";

/// Builds keys and patterns inside one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    namespace: String,
    escaped_namespace: String,
}

impl CacheKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let escaped_namespace = escape_glob(&namespace);
        Self {
            namespace,
            escaped_namespace,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `{ns}:{kind}:{entity}` followed by each subkey.
    pub fn key(&self, kind: ResourceKind, entity: impl Display, subkeys: &[&str]) -> String {
        let mut key = format!("{}:{}:{}", self.namespace, kind.as_str(), entity);
        for subkey in subkeys {
            key.push(':');
            key.push_str(subkey);
        }
        key
    }

    pub fn dashboard(&self, entity: Uuid, data_type: DataType) -> String {
        self.key(ResourceKind::Dashboard, entity, &[data_type.as_str()])
    }

    /// Bundle for an explicit run, or the current bundle when `run` is `None`.
    pub fn bundle(&self, entity: Uuid, run: Option<Uuid>) -> String {
        match run {
            Some(run) => self.key(ResourceKind::Bundle, entity, &[&run.to_string()]),
            None => self.key(ResourceKind::Bundle, entity, &[CURRENT_RUN]),
        }
    }

    pub fn entity(&self, entity: Uuid) -> String {
        self.key(ResourceKind::Entity, entity, &[])
    }

    pub fn listing(&self, entity: Uuid, name: &str) -> String {
        self.key(ResourceKind::Listing, entity, &[name])
    }

    pub fn global_listing(&self, name: &str) -> String {
        self.key(ResourceKind::Listing, GLOBAL_SCOPE, &[name])
    }

    pub fn sub_resource(&self, kind: ResourceKind, entity: Uuid, resource_id: &str) -> String {
        self.key(kind, entity, &[resource_id])
    }

    /// Every subkey of one kind for one entity.
    pub fn entity_pattern(&self, kind: ResourceKind, entity: Uuid) -> String {
        format!("{}:{}:{}:*", self.escaped_namespace, kind.as_str(), entity)
    }

    /// Keys nested beneath a single sub-resource, such as paginated variants.
    pub fn sub_resource_pattern(
        &self,
        kind: ResourceKind,
        entity: Uuid,
        resource_id: &str,
    ) -> String {
        format!(
            "{}:{}:{}:{}:*",
            self.escaped_namespace,
            kind.as_str(),
            entity,
            escape_glob(resource_id)
        )
    }

    pub fn global_listing_pattern(&self) -> String {
        format!(
            "{}:{}:{}:*",
            self.escaped_namespace,
            ResourceKind::Listing.as_str(),
            GLOBAL_SCOPE
        )
    }

    pub fn namespace_pattern(&self) -> String {
        format!("{}:*", self.escaped_namespace)
    }

    /// Every key of one kind, across entities.
    pub fn kind_pattern(&self, kind: ResourceKind) -> String {
        format!("{}:{}:*", self.escaped_namespace, kind.as_str())
    }

    /// What a dashboard or bundle key holds; `None` for any other key.
    pub fn warm_target(&self, key: &str) -> Option<WarmTarget> {
        let rest = key.strip_prefix(self.namespace.as_str())?.strip_prefix(':')?;
        let mut parts = rest.splitn(3, ':');
        let kind: ResourceKind = parts.next()?.parse().ok()?;
        let entity = Uuid::parse_str(parts.next()?).ok()?;
        let subkey = parts.next()?;

        match kind {
            ResourceKind::Dashboard => Some(WarmTarget::Component {
                entity,
                data_type: subkey.parse().ok()?,
            }),
            ResourceKind::Bundle if subkey == CURRENT_RUN => {
                Some(WarmTarget::Bundle { entity, run: None })
            }
            ResourceKind::Bundle => Some(WarmTarget::Bundle {
                entity,
                run: Some(Uuid::parse_str(subkey).ok()?),
            }),
            _ => None,
        }
    }
}

/// Escape glob metacharacters so `segment` matches only itself.
pub fn escape_glob(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::glob_match;

    fn entity() -> Uuid {
        Uuid::parse_str("6f1c2d1e-9b1a-4c43-8f5e-2b0f0d9a7c11").unwrap()
    }

    #[test]
    fn keys_follow_namespace_kind_entity_layout() {
        let keys = CacheKeys::new("dashcache");
        assert_eq!(
            keys.dashboard(entity(), DataType::KeywordOverview),
            "dashcache:dashboard:6f1c2d1e-9b1a-4c43-8f5e-2b0f0d9a7c11:keyword_overview"
        );
        assert_eq!(
            keys.bundle(entity(), None),
            "dashcache:bundle:6f1c2d1e-9b1a-4c43-8f5e-2b0f0d9a7c11:current"
        );
        assert_eq!(
            keys.global_listing("entities"),
            "dashcache:listing:all:entities"
        );
    }

    #[test]
    fn entity_pattern_matches_only_that_entity_and_kind() {
        let keys = CacheKeys::new("dashcache");
        let other = Uuid::new_v4();
        let pattern = keys.entity_pattern(ResourceKind::Dashboard, entity());

        assert!(glob_match(&pattern, &keys.dashboard(entity(), DataType::Overview)));
        assert!(!glob_match(&pattern, &keys.dashboard(other, DataType::Overview)));
        assert!(!glob_match(&pattern, &keys.bundle(entity(), None)));
    }

    #[test]
    fn dashboard_and_bundle_keys_parse_back_to_targets() {
        let keys = CacheKeys::new("dashcache");
        let run = Uuid::new_v4();

        assert_eq!(
            keys.warm_target(&keys.dashboard(entity(), DataType::ContentAudit)),
            Some(WarmTarget::Component {
                entity: entity(),
                data_type: DataType::ContentAudit
            })
        );
        assert_eq!(
            keys.warm_target(&keys.bundle(entity(), None)),
            Some(WarmTarget::Bundle {
                entity: entity(),
                run: None
            })
        );
        assert_eq!(
            keys.warm_target(&keys.bundle(entity(), Some(run))),
            Some(WarmTarget::Bundle {
                entity: entity(),
                run: Some(run)
            })
        );
        assert_eq!(keys.warm_target(&keys.listing(entity(), "runs")), None);
        assert_eq!(keys.warm_target("other:dashboard:x:overview"), None);
        assert_eq!(
            CacheKeys::new("dash").warm_target(&keys.dashboard(entity(), DataType::Overview)),
            None
        );
    }

    #[test]
    fn kind_pattern_spans_entities_of_one_kind() {
        let keys = CacheKeys::new("dashcache");
        let pattern = keys.kind_pattern(ResourceKind::Dashboard);

        assert!(glob_match(&pattern, &keys.dashboard(Uuid::new_v4(), DataType::Overview)));
        assert!(!glob_match(&pattern, &keys.bundle(entity(), None)));
    }

    #[test]
    fn namespace_metacharacters_are_escaped_in_patterns() {
        let keys = CacheKeys::new("team*a");
        let pattern = keys.namespace_pattern();

        assert!(glob_match(&pattern, "team*a:dashboard:x:y"));
        assert!(!glob_match(&pattern, "team-b-a:dashboard:x:y"));
    }
}
