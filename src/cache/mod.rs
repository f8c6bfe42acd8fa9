//! Fast-path cache layer.
//!
//! - [`CacheStore`]: namespaced get/set/delete over a [`CacheBackend`], guarded
//!   by a circuit breaker and per-call timeouts, with compressed payloads
//! - [`CacheInvalidator`]: maps [`InvalidationEvent`]s to the narrowest scope
//!   of keys, patterns and edge tags
//! - [`CacheMonitor`]: health checks and trends
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "redis"
//! namespace = "dashcache"
//!
//! [compression]
//! min_size_bytes = 1024
//! high_ratio_threshold_bytes = 65536
//!
//! [breaker]
//! failure_threshold = 5
//! open_timeout_seconds = 60
//! ```

pub mod backend;
pub mod breaker;
pub mod codec;
mod config;
mod events;
mod invalidator;
mod keys;
pub(crate) mod lock;
mod monitor;
mod registry;
mod scope;
mod stats;
mod store;

pub use backend::{BackendError, CacheBackend, KeyTtl, MemoryBackend, MemoryUsage};
pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use codec::{Codec, CodecError, CompressionStats};
pub use config::{BreakerConfig, CacheConfig, CompressionConfig};
pub use events::{EventKind, InvalidationEvent};
pub use invalidator::{CacheInvalidator, EdgeOutcome, InvalidationReport};
pub use keys::CacheKeys;
pub use monitor::{
    CacheMonitor, HealthIssue, HealthReport, HealthStatus, MonitorConfig, Severity, Trend,
};
pub use registry::{HotKeyRegistry, WarmTarget};
pub use scope::{InvalidationScope, WarmRequest, entity_tag, run_tag};
pub use stats::{LatencySummary, StatsSnapshot};
pub use store::{CacheStore, Lookup};
