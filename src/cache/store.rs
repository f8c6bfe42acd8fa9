//! Fast-path cache store.
//!
//! Wraps a [`CacheBackend`] with the codec, the circuit breaker, per-call
//! timeouts and rolling statistics. Backend outages never surface as errors:
//! reads degrade to a miss and writes to a silent no-op.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use super::backend::{BackendError, CacheBackend, KeyTtl, MemoryUsage};
use super::breaker::{BreakerSnapshot, CircuitBreaker, Permit};
use super::codec::Codec;
use super::config::{BreakerConfig, CacheConfig, CompressionConfig};
use super::keys::CacheKeys;
use super::stats::{CacheStats, StatsSnapshot};

const METRIC_STORE_LATENCY_MS: &str = "dashcache_store_latency_ms";
const DELETE_BATCH: usize = 500;

/// Result of a read that distinguishes an outage from absence.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    /// The backend answered and the key was absent, expired or unreadable.
    Miss,
    /// The backend was skipped or failed; the key may well exist.
    Unavailable,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Unavailable => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Why a backend call did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skipped {
    Disabled,
    Rejected,
    Failed,
}

pub struct CacheStore {
    config: CacheConfig,
    keys: CacheKeys,
    backend: Arc<dyn CacheBackend>,
    codec: Codec,
    breaker: CircuitBreaker,
    stats: CacheStats,
}

impl CacheStore {
    pub fn new(
        config: CacheConfig,
        compression: CompressionConfig,
        breaker: BreakerConfig,
        backend: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            keys: CacheKeys::new(config.namespace.clone()),
            stats: CacheStats::new(config.latency_sample_window),
            codec: Codec::new(compression),
            breaker: CircuitBreaker::new(breaker),
            backend,
            config,
        }
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn breaker(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lookup(key).await.into_option()
    }

    pub async fn lookup(&self, key: &str) -> Lookup<Vec<u8>> {
        self.lookup_with(key, |bytes| Ok(bytes)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup_json(key).await.into_option()
    }

    pub async fn lookup_json<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        self.lookup_with(key, |bytes| {
            serde_json::from_slice(&bytes).map_err(|err| err.to_string())
        })
        .await
    }

    async fn lookup_with<T>(
        &self,
        key: &str,
        decode: impl FnOnce(Vec<u8>) -> Result<T, String>,
    ) -> Lookup<T> {
        let (envelope, elapsed) = match self.guarded("get", || self.backend.get(key)).await {
            Ok(reply) => reply,
            Err(Skipped::Disabled) => return Lookup::Miss,
            Err(Skipped::Rejected | Skipped::Failed) => return Lookup::Unavailable,
        };

        let Some(envelope) = envelope else {
            self.stats.record_miss(elapsed);
            return Lookup::Miss;
        };

        let decoded = self
            .codec
            .decompress(&envelope)
            .map_err(|err| err.to_string())
            .and_then(|bytes| {
                let len = bytes.len();
                decode(bytes).map(|value| (value, len))
            });

        match decoded {
            Ok((value, len)) => {
                self.stats.record_hit(len, elapsed);
                Lookup::Hit(value)
            }
            Err(error) => {
                warn!(key, error = %error, "Unreadable cache payload treated as miss");
                self.stats.record_miss(elapsed);
                Lookup::Miss
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.guarded("exists", || self.backend.exists(key)).await {
            Ok((exists, elapsed)) => {
                self.stats.record_latency(elapsed);
                exists
            }
            Err(_) => false,
        }
    }

    /// Remaining lifetime of `key`, or `None` when the backend was not reached.
    pub async fn ttl(&self, key: &str) -> Option<KeyTtl> {
        match self.guarded("ttl", || self.backend.ttl(key)).await {
            Ok((ttl, elapsed)) => {
                self.stats.record_latency(elapsed);
                Some(ttl)
            }
            Err(_) => None,
        }
    }

    /// Keys matching a glob pattern; empty when the backend was not reached.
    pub async fn scan(&self, pattern: &str) -> Vec<String> {
        match self.guarded("scan", || self.backend.scan(pattern)).await {
            Ok((keys, elapsed)) => {
                self.stats.record_latency(elapsed);
                keys
            }
            Err(_) => Vec::new(),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store `value`; `ttl = None` keeps it until invalidated.
    ///
    /// Returns whether the backend accepted the write.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        // Admit before compressing so an open breaker costs no codec work.
        let Ok(permit) = self.admit("set") else {
            return false;
        };

        let (envelope, compression) = self.codec.compress(value);
        let written = envelope.len();
        let saved = compression.map(|stats| stats.bytes_saved()).unwrap_or(0);

        match self
            .execute("set", permit, self.backend.set(key, envelope, ttl))
            .await
        {
            Ok(((), elapsed)) => {
                self.stats.record_write(written, saved, elapsed);
                true
            }
            Err(_) => false,
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, &bytes, ttl).await,
            Err(err) => {
                warn!(key, error = %err, "Failed to serialize cache value");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.delete_many(&[key.to_string()]).await > 0
    }

    /// Delete `keys`, returning how many existed.
    pub async fn delete_many(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        match self.guarded("delete", || self.backend.delete(keys)).await {
            Ok((removed, elapsed)) => {
                self.stats.record_latency(elapsed);
                removed
            }
            Err(_) => 0,
        }
    }

    /// Delete every key matching a glob pattern.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let keys = self.scan(pattern).await;
        if keys.is_empty() {
            return 0;
        }

        let mut removed = 0;
        for batch in keys.chunks(DELETE_BATCH) {
            removed += self.delete_many(batch).await;
        }
        debug!(pattern, matched = keys.len(), removed, "Deleted keys by pattern");
        removed
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Ping through the breaker like any other operation.
    pub async fn ping(&self) -> bool {
        self.guarded("ping", || self.backend.ping()).await.is_ok()
    }

    /// Ping the backend directly, bypassing the breaker and statistics.
    pub async fn probe(&self) -> Result<Duration, BackendError> {
        let started = Instant::now();
        self.bounded(self.backend.ping()).await?;
        Ok(started.elapsed())
    }

    /// Memory figures straight from the backend, bypassing the breaker.
    pub async fn memory_usage(&self) -> Result<MemoryUsage, BackendError> {
        self.bounded(self.backend.memory_usage()).await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        timeout(self.config.operation_timeout, call)
            .await
            .map_err(|_| BackendError::Timeout(self.config.operation_timeout))?
    }

    /// Run one backend call behind the enabled flag, breaker and timeout.
    async fn guarded<T, F, Fut>(&self, op: &'static str, call: F) -> Result<(T, Duration), Skipped>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let permit = self.admit(op)?;
        self.execute(op, permit, call()).await
    }

    fn admit(&self, op: &'static str) -> Result<Permit<'_>, Skipped> {
        if !self.config.enabled {
            return Err(Skipped::Disabled);
        }

        self.breaker.try_acquire().ok_or_else(|| {
            self.stats.record_rejected(op);
            debug!(op, "Cache call short-circuited by open breaker");
            Skipped::Rejected
        })
    }

    async fn execute<T>(
        &self,
        op: &'static str,
        permit: Permit<'_>,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<(T, Duration), Skipped> {
        let started = Instant::now();
        let result = self.bounded(call).await;
        let elapsed = started.elapsed();
        histogram!(METRIC_STORE_LATENCY_MS, "op" => op)
            .record(elapsed.as_secs_f64() * 1000.0);

        match result {
            Ok(value) => {
                permit.succeed();
                Ok((value, elapsed))
            }
            Err(error) => {
                if error.counts_as_failure() {
                    permit.fail();
                } else {
                    permit.succeed();
                }
                self.stats.record_error(op, error.kind());
                warn!(
                    op,
                    backend = self.backend.name(),
                    error = %error,
                    "Cache backend call failed, degrading"
                );
                Err(Skipped::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::MemoryBackend;
    use crate::cache::breaker::CircuitState;

    fn store_with(backend: Arc<dyn CacheBackend>, enabled: bool) -> CacheStore {
        CacheStore::new(
            CacheConfig {
                enabled,
                ..Default::default()
            },
            CompressionConfig::default(),
            BreakerConfig::default(),
            backend,
        )
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_json() {
        let store = store_with(Arc::new(MemoryBackend::new()), true);
        let value = json!({"visibility": 41.5, "keywords": [1, 2, 3]});

        assert!(store.set_json("dashcache:dashboard:e:overview", &value, None).await);
        let fetched: serde_json::Value = store
            .get_json("dashcache:dashboard:e:overview")
            .await
            .expect("hit");

        assert_eq!(fetched, value);
        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert!(stats.bytes_written > 0);
    }

    #[tokio::test]
    async fn large_payloads_are_compressed_and_accounted() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), true);
        let payload = "position:3;".repeat(2_000);

        assert!(store.set("k", payload.as_bytes(), None).await);
        let raw = backend.get("k").await.unwrap().expect("stored");
        assert_ne!(raw[0], crate::cache::codec::MARKER_NONE);
        assert!(store.stats().bytes_saved > 0);
        assert_eq!(store.get("k").await.unwrap(), payload.as_bytes());
    }

    #[tokio::test]
    async fn disabled_store_misses_without_touching_backend() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("k", vec![0, 1], None).await.unwrap();
        let store = store_with(backend.clone(), false);

        assert_eq!(store.lookup("k").await, Lookup::Miss);
        assert!(!store.set("other", b"v", None).await);
        assert!(!backend.exists("other").await.unwrap());
        assert_eq!(store.stats().misses, 0);
    }

    #[tokio::test]
    async fn legacy_raw_values_remain_readable() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set("legacy", br#"{"a":1}"#.to_vec(), None)
            .await
            .unwrap();
        let store = store_with(backend, true);

        let value: serde_json::Value = store.get_json("legacy").await.expect("hit");
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn undecodable_json_is_a_miss() {
        let store = store_with(Arc::new(MemoryBackend::new()), true);
        store.set("k", b"not json", None).await;

        let lookup: Lookup<serde_json::Value> = store.lookup_json("k").await;
        assert_eq!(lookup, Lookup::Miss);
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn delete_pattern_removes_only_matching_keys() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), true);
        for key in ["ns:dashboard:a:x", "ns:dashboard:a:y", "ns:dashboard:b:x"] {
            store.set(key, b"1", None).await;
        }

        assert_eq!(store.delete_pattern("ns:dashboard:a:*").await, 2);
        assert_eq!(backend.keys(), vec!["ns:dashboard:b:x".to_string()]);
    }

    #[tokio::test]
    async fn open_breaker_rejects_writes_before_encoding() {
        let backend = Arc::new(MemoryBackend::new());
        let store = CacheStore::new(
            CacheConfig::default(),
            CompressionConfig::default(),
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            backend.clone(),
        );
        store.breaker.try_acquire().expect("closed breaker admits").fail();
        assert_eq!(store.breaker().state, CircuitState::Open);

        let payload = "position:3;".repeat(2_000);
        assert!(!store.set("k", payload.as_bytes(), None).await);

        let stats = store.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.bytes_written, 0);
        assert_eq!(stats.bytes_saved, 0);
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn ttl_and_exists_reflect_backend() {
        let store = store_with(Arc::new(MemoryBackend::new()), true);
        store.set("p", b"1", None).await;

        assert!(store.exists("p").await);
        assert_eq!(store.ttl("p").await, Some(KeyTtl::Persistent));
        assert_eq!(store.ttl("absent").await, Some(KeyTtl::Missing));
        assert_eq!(store.breaker().state, CircuitState::Closed);
        assert!(store.ping().await);
    }
}
