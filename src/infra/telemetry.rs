use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "dashcache_store_hit_total",
            Unit::Count,
            "Fast-path cache reads that returned a payload."
        );
        describe_counter!(
            "dashcache_store_miss_total",
            Unit::Count,
            "Fast-path cache reads that found no usable payload."
        );
        describe_counter!(
            "dashcache_store_error_total",
            Unit::Count,
            "Fast-path cache operations that failed against the backend."
        );
        describe_counter!(
            "dashcache_store_rejected_total",
            Unit::Count,
            "Fast-path cache operations short-circuited by the open breaker."
        );
        describe_counter!(
            "dashcache_breaker_open_total",
            Unit::Count,
            "Circuit breaker transitions into the open state."
        );
        describe_histogram!(
            "dashcache_store_latency_ms",
            Unit::Milliseconds,
            "Fast-path backend call latency in milliseconds."
        );
        describe_histogram!(
            "dashcache_precompute_ms",
            Unit::Milliseconds,
            "Precomputation run duration in milliseconds."
        );
        describe_counter!(
            "dashcache_precompute_component_failed_total",
            Unit::Count,
            "Dashboard components whose aggregation failed."
        );
        describe_counter!(
            "dashcache_invalidate_keys_total",
            Unit::Count,
            "Fast-path keys deleted by invalidation."
        );
        describe_histogram!(
            "dashcache_warm_ms",
            Unit::Milliseconds,
            "Cache warming pass duration in milliseconds."
        );
    });
}
