//! Cache configuration.
//!
//! Built from the resolved `[cache]`, `[compression]` and `[breaker]` settings
//! sections; `Default` mirrors the shipped defaults so tests can construct a
//! store without loading settings.

use std::time::Duration;

use serde::Deserialize;

use crate::config::{BreakerSettings, CacheBackendKind, CacheSettings, CompressionSettings};

const DEFAULT_NAMESPACE: &str = "dashcache";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 250;
const DEFAULT_LATENCY_SAMPLE_WINDOW: usize = 1024;

const DEFAULT_MIN_SIZE_BYTES: usize = 1024;
const DEFAULT_HIGH_RATIO_THRESHOLD_BYTES: usize = 64 * 1024;
const DEFAULT_ZSTD_LEVEL: i32 = 3;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_OPEN_TIMEOUT_SECS: u64 = 60;

/// Fast-path cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every read is a miss and every write a no-op.
    pub enabled: bool,
    pub backend: CacheBackendKind,
    /// Prefix of every key written by this process.
    pub namespace: String,
    pub redis_url: String,
    /// Number of multiplexed connections in the Redis pool.
    pub pool_size: usize,
    /// Upper bound on a single backend call.
    pub operation_timeout: Duration,
    /// Rolling window of latency samples kept for percentiles.
    pub latency_sample_window: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Redis,
            namespace: DEFAULT_NAMESPACE.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            latency_sample_window: DEFAULT_LATENCY_SAMPLE_WINDOW,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            backend: settings.backend,
            namespace: settings.namespace.clone(),
            redis_url: settings.redis_url.clone(),
            pool_size: settings.pool_size.get(),
            operation_timeout: settings.operation_timeout,
            latency_sample_window: settings.latency_sample_window.get(),
        }
    }
}

/// Payload compression thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Payloads shorter than this are stored raw.
    pub min_size_bytes: usize,
    /// Payloads at least this long use zstd instead of lz4.
    pub high_ratio_threshold_bytes: usize,
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size_bytes: DEFAULT_MIN_SIZE_BYTES,
            high_ratio_threshold_bytes: DEFAULT_HIGH_RATIO_THRESHOLD_BYTES,
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl From<&CompressionSettings> for CompressionConfig {
    fn from(settings: &CompressionSettings) -> Self {
        Self {
            enabled: settings.enabled,
            min_size_bytes: settings.min_size_bytes,
            high_ratio_threshold_bytes: settings.high_ratio_threshold_bytes,
            zstd_level: settings.zstd_level,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time the breaker stays open before admitting one trial call.
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_timeout: Duration::from_secs(DEFAULT_OPEN_TIMEOUT_SECS),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.get(),
            open_timeout: settings.open_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cache = CacheConfig::default();
        assert!(cache.enabled);
        assert_eq!(cache.namespace, "dashcache");

        let compression = CompressionConfig::default();
        assert_eq!(compression.min_size_bytes, 1024);
        assert_eq!(compression.high_ratio_threshold_bytes, 65536);
        assert_eq!(compression.zstd_level, 3);

        let breaker = BreakerConfig::default();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.open_timeout, Duration::from_secs(60));
    }
}
