//! Hot-key registry.
//!
//! Remembers which cache keys were recently written and what they hold, so
//! the warmer knows which keys to check before their TTL runs out. Remaining
//! lifetimes always come from the backend. Entries are dropped when the keys
//! they describe are invalidated.

use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::types::DataType;

use super::backend::glob_match;

/// What a registered key holds, enough to recompute it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarmTarget {
    Component { entity: Uuid, data_type: DataType },
    /// `run = None` is the current bundle.
    Bundle { entity: Uuid, run: Option<Uuid> },
}

impl WarmTarget {
    pub fn entity(&self) -> Uuid {
        match self {
            WarmTarget::Component { entity, .. } | WarmTarget::Bundle { entity, .. } => *entity,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HotKey {
    target: WarmTarget,
    writes: u64,
}

#[derive(Debug, Default)]
pub struct HotKeyRegistry {
    entries: DashMap<String, HotKey>,
}

impl HotKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write of `key`.
    pub fn record(&self, key: &str, target: WarmTarget) {
        self.entries
            .entry(key.to_string())
            .and_modify(|hot| {
                hot.target = target;
                hot.writes += 1;
            })
            .or_insert(HotKey { target, writes: 1 });
    }

    /// Every registered key with its target, in key order.
    pub fn entries(&self) -> Vec<(String, WarmTarget)> {
        let mut entries: Vec<(String, WarmTarget)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.target))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Drop entries matching any of the exact keys or glob patterns.
    pub fn prune(&self, keys: &[String], patterns: &[String]) -> usize {
        let before = self.entries.len();
        for key in keys {
            self.entries.remove(key);
        }
        if !patterns.is_empty() {
            self.entries
                .retain(|key, _| !patterns.iter().any(|pattern| glob_match(pattern, key)));
        }
        before.saturating_sub(self.entries.len())
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn writes(&self, key: &str) -> u64 {
        self.entries.get(key).map(|hot| hot.writes).unwrap_or(0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(entity: Uuid) -> WarmTarget {
        WarmTarget::Component {
            entity,
            data_type: DataType::Overview,
        }
    }

    #[test]
    fn entries_list_latest_target_per_key() {
        let registry = HotKeyRegistry::new();
        let entity = Uuid::new_v4();
        let run = Uuid::new_v4();
        registry.record("b", component(entity));
        registry.record("a", component(entity));
        registry.record(
            "a",
            WarmTarget::Bundle {
                entity,
                run: Some(run),
            },
        );

        assert_eq!(
            registry.entries(),
            vec![
                (
                    "a".to_string(),
                    WarmTarget::Bundle {
                        entity,
                        run: Some(run)
                    }
                ),
                ("b".to_string(), component(entity)),
            ]
        );
    }

    #[test]
    fn prune_removes_exact_and_pattern_matches() {
        let registry = HotKeyRegistry::new();
        let entity = Uuid::new_v4();
        for key in ["ns:dashboard:a:x", "ns:dashboard:b:x", "ns:bundle:a:current"] {
            registry.record(key, component(entity));
        }

        let removed = registry.prune(
            &["ns:bundle:a:current".to_string()],
            &["ns:dashboard:a:*".to_string()],
        );

        assert_eq!(removed, 2);
        assert!(registry.contains("ns:dashboard:b:x"));
    }

    #[test]
    fn rewrites_bump_counter() {
        let registry = HotKeyRegistry::new();
        let entity = Uuid::new_v4();
        registry.record("k", component(entity));
        registry.record("k", component(entity));
        assert_eq!(registry.writes("k"), 2);
    }
}
