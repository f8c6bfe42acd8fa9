//! Fast-path key-value backend abstraction.
//!
//! [`CacheBackend`] is the seam between [`super::CacheStore`] and the actual
//! key-value server. The production implementation lives in
//! `infra::redis`; [`MemoryBackend`] is a process-local stand-in used when
//! `cache.backend = "memory"` and throughout the tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::backend";

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend rejected command: {0}")]
    Command(String),
    #[error("unexpected backend reply: {0}")]
    Payload(String),
}

impl BackendError {
    /// Whether this error says anything about backend health.
    ///
    /// Connectivity loss and timeouts trip the breaker; a backend that
    /// answered with an error is still reachable.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Command(_) => "command",
            Self::Payload(_) => "payload",
        }
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(Duration),
}

/// Memory figures reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    /// `None` when the backend has no configured ceiling.
    pub max_bytes: Option<u64>,
}

impl MemoryUsage {
    pub fn ratio(&self) -> Option<f64> {
        match self.max_bytes {
            Some(max) if max > 0 => Some(self.used_bytes as f64 / max as f64),
            _ => None,
        }
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Store `value`; `None` means no expiry.
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError>;

    /// List keys matching a glob pattern (`*`, `?`, `\` escapes).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, BackendError>;

    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;

    async fn memory_usage(&self) -> Result<MemoryUsage, BackendError>;
}

// ============================================================================
// MemoryBackend
// ============================================================================

#[derive(Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local backend honouring TTLs and glob patterns.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    max_bytes: Option<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `max_bytes` as the memory ceiling in [`CacheBackend::memory_usage`].
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self {
            entries: Mutex::default(),
            max_bytes: Some(max_bytes),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "len")
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = mutex_lock(&self.entries, SOURCE, "keys")
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        mutex_lock(&self.entries, SOURCE, "set")
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "delete");
        let removed = keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| entry.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        let now = Instant::now();
        let entries = mutex_lock(&self.entries, SOURCE, "scan");
        Ok(entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let now = Instant::now();
        Ok(mutex_lock(&self.entries, SOURCE, "exists")
            .get(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, BackendError> {
        let now = Instant::now();
        let entries = mutex_lock(&self.entries, SOURCE, "ttl");
        Ok(match entries.get(key) {
            Some(entry) if entry.is_live(now) => match entry.expires_at {
                Some(at) => KeyTtl::Expires(at - now),
                None => KeyTtl::Persistent,
            },
            _ => KeyTtl::Missing,
        })
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn memory_usage(&self) -> Result<MemoryUsage, BackendError> {
        let used_bytes = mutex_lock(&self.entries, SOURCE, "memory_usage")
            .iter()
            .map(|(key, entry)| (key.len() + entry.value.len()) as u64)
            .sum();
        Ok(MemoryUsage {
            used_bytes,
            max_bytes: self.max_bytes,
        })
    }
}

/// Match `key` against a Redis-style glob supporting `*`, `?` and `\` escapes.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, k));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                k += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() && pattern[p + 1] == key[k] => {
                p += 2;
                k += 1;
                continue;
            }
            Some(&c) if c != '\\' && c == key[k] => {
                p += 1;
                k += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star_p, star_k)) => {
                p = star_p + 1;
                k = star_k + 1;
                backtrack = Some((star_p, star_k + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_redis_semantics() {
        assert!(glob_match("ns:*", "ns:dashboard:1:overview"));
        assert!(glob_match("ns:dashboard:1:*", "ns:dashboard:1:overview"));
        assert!(!glob_match("ns:dashboard:1:*", "ns:dashboard:10:overview"));
        assert!(glob_match("ns:?:x", "ns:a:x"));
        assert!(!glob_match("ns:?:x", "ns:ab:x"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
        assert!(glob_match(r"lit\*", "lit*"));
        assert!(!glob_match(r"lit\*", "literal"));
        assert!(glob_match("*", ""));
    }

    #[tokio::test]
    async fn memory_backend_roundtrip_and_delete() {
        let backend = MemoryBackend::new();
        backend.set("a", b"1".to_vec(), None).await.unwrap();
        backend.set("b", b"2".to_vec(), None).await.unwrap();

        assert_eq!(backend.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert!(backend.exists("b").await.unwrap());

        let removed = backend
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.keys(), vec!["b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_backend_expires_entries() {
        let backend = MemoryBackend::new();
        backend
            .set("k", b"v".to_vec(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        assert_eq!(
            backend.ttl("k").await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(10))
        );

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.ttl("k").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn memory_usage_reports_ratio_against_ceiling() {
        let backend = MemoryBackend::with_max_bytes(100);
        backend.set("key", vec![0; 47], None).await.unwrap();

        let usage = backend.memory_usage().await.unwrap();
        assert_eq!(usage.used_bytes, 50);
        assert_eq!(usage.ratio(), Some(0.5));
    }

    #[test]
    fn only_connectivity_errors_count_as_failures() {
        assert!(BackendError::Unavailable("down".into()).counts_as_failure());
        assert!(BackendError::Timeout(Duration::from_millis(5)).counts_as_failure());
        assert!(!BackendError::Command("WRONGTYPE".into()).counts_as_failure());
        assert!(!BackendError::Payload("nil".into()).counts_as_failure());
    }
}
