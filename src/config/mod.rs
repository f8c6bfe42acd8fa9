//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::types::DataType;

pub use cli::{
    CliArgs, Command, CommonOverrides, HealthArgs, InvalidateArgs, PrecomputeArgs, ServeArgs,
    WarmArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "dashcache";
const ENV_PREFIX: &str = "DASHCACHE";

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

const DEFAULT_CACHE_NAMESPACE: &str = "dashcache";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_REDIS_POOL_SIZE: u64 = 4;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 250;
const DEFAULT_LATENCY_SAMPLE_WINDOW: u64 = 1024;

const DEFAULT_COMPRESSION_MIN_SIZE_BYTES: usize = 1024;
const DEFAULT_COMPRESSION_HIGH_RATIO_BYTES: usize = 64 * 1024;
const DEFAULT_ZSTD_LEVEL: i32 = 3;

const DEFAULT_BREAKER_FAILURE_THRESHOLD: u64 = 5;
const DEFAULT_BREAKER_OPEN_TIMEOUT_SECS: u64 = 60;

const DEFAULT_STALE_WHILE_REVALIDATE_SECS: u64 = 300;

const DEFAULT_WARMER_INTERVAL_SECS: u64 = 900;
const DEFAULT_WARMER_LOOKBACK_DAYS: u64 = 7;
const DEFAULT_WARMER_ACTIVE_LIMIT: u64 = 50;
const DEFAULT_WARMER_EXPIRING_THRESHOLD_MINUTES: u64 = 10;
const DEFAULT_WARMER_CONCURRENCY: u64 = 4;

const DEFAULT_MONITOR_LATENCY_PROBES: u64 = 5;
const DEFAULT_MONITOR_MAX_LATENCY_MS: u64 = 50;
const DEFAULT_MONITOR_MIN_HIT_RATE: f64 = 0.6;
const DEFAULT_MONITOR_MIN_SAMPLE_SIZE: u64 = 100;
const DEFAULT_MONITOR_MAX_MEMORY_RATIO: f64 = 0.9;
const DEFAULT_MONITOR_HISTORY_LEN: u64 = 60;
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 60;

const DEFAULT_EDGE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub compression: CompressionSettings,
    pub breaker: BreakerSettings,
    pub freshness: FreshnessSettings,
    pub warmer: WarmerSettings,
    pub monitor: MonitorSettings,
    pub edge: EdgeSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    /// In-process map; for development and tests.
    Memory,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    pub namespace: String,
    pub redis_url: String,
    pub pool_size: NonZeroUsize,
    pub operation_timeout: Duration,
    pub latency_sample_window: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct CompressionSettings {
    pub enabled: bool,
    pub min_size_bytes: usize,
    pub high_ratio_threshold_bytes: usize,
    pub zstd_level: i32,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: NonZeroU32,
    pub open_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FreshnessSettings {
    pub overview: Duration,
    pub sparklines: Duration,
    pub keyword_overview: Duration,
    pub ranking_distribution: Duration,
    pub competitor_summary: Duration,
    pub content_audit: Duration,
    pub stale_while_revalidate: Duration,
    /// Emit `Cache-Control: private` instead of `public`.
    pub private: bool,
}

impl FreshnessSettings {
    pub fn ttl(&self, data_type: DataType) -> Duration {
        match data_type {
            DataType::Overview => self.overview,
            DataType::Sparklines => self.sparklines,
            DataType::KeywordOverview => self.keyword_overview,
            DataType::RankingDistribution => self.ranking_distribution,
            DataType::CompetitorSummary => self.competitor_summary,
            DataType::ContentAudit => self.content_audit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarmerSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub lookback_days: NonZeroU32,
    pub active_limit: NonZeroU32,
    pub expiring_threshold_minutes: NonZeroU64,
    pub concurrency: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub latency_probes: NonZeroUsize,
    pub max_latency: Duration,
    pub min_hit_rate: f64,
    pub min_sample_size: u64,
    pub max_memory_ratio: f64,
    pub history_len: NonZeroUsize,
    /// Cadence of the health log while serving.
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct EdgeSettings {
    pub zone_id: Option<String>,
    pub api_token: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(args),
        Some(command) => raw.apply_common_overrides(command.common()),
        None => raw.apply_serve_overrides(&ServeArgs::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

// ============================================================================
// Raw settings and overrides
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    compression: RawCompressionSettings,
    breaker: RawBreakerSettings,
    freshness: RawFreshnessSettings,
    warmer: RawWarmerSettings,
    monitor: RawMonitorSettings,
    edge: RawEdgeSettings,
}

impl RawSettings {
    fn apply_common_overrides(&mut self, overrides: &CommonOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(backend) = overrides.cache_backend {
            self.cache.backend = Some(backend);
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(namespace) = overrides.cache_namespace.as_ref() {
            self.cache.namespace = Some(namespace.clone());
        }
    }

    fn apply_serve_overrides(&mut self, args: &ServeArgs) {
        self.apply_common_overrides(&args.common);
        if let Some(enabled) = args.warmer_enabled {
            self.warmer.enabled = Some(enabled);
        }
        if let Some(seconds) = args.warmer_interval_seconds {
            self.warmer.interval_seconds = Some(seconds);
        }
        if let Some(seconds) = args.monitor_interval_seconds {
            self.monitor.interval_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            compression,
            breaker,
            freshness,
            warmer,
            monitor,
            edge,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            compression: build_compression_settings(compression)?,
            breaker: build_breaker_settings(breaker)?,
            freshness: build_freshness_settings(freshness)?,
            warmer: build_warmer_settings(warmer)?,
            monitor: build_monitor_settings(monitor)?,
            edge: build_edge_settings(edge)?,
        })
    }

    /// The database URL, required by commands touching the durable store.
    pub fn database_url(&self) -> Result<&str, LoadError> {
        self.database.url.as_deref().ok_or_else(|| {
            LoadError::invalid(
                "database.url",
                "required (set DASHCACHE__DATABASE__URL or --database-url)",
            )
        })
    }
}

// ============================================================================
// Section builders
// ============================================================================

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let namespace = cache
        .namespace
        .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_string());
    let namespace = namespace.trim().trim_end_matches(':').to_string();
    if namespace.is_empty() {
        return Err(LoadError::invalid("cache.namespace", "must not be empty"));
    }
    if namespace.contains(['*', '?', '[', ']']) {
        return Err(LoadError::invalid(
            "cache.namespace",
            "must not contain glob characters",
        ));
    }

    let redis_url = non_blank(cache.redis_url).unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

    let operation_timeout_ms = cache
        .operation_timeout_ms
        .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS);
    if operation_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.operation_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        backend: cache.backend.unwrap_or(CacheBackendKind::Redis),
        namespace,
        redis_url,
        pool_size: non_zero_usize(
            cache.pool_size.unwrap_or(DEFAULT_REDIS_POOL_SIZE),
            "cache.pool_size",
        )?,
        operation_timeout: Duration::from_millis(operation_timeout_ms),
        latency_sample_window: non_zero_usize(
            cache
                .latency_sample_window
                .unwrap_or(DEFAULT_LATENCY_SAMPLE_WINDOW),
            "cache.latency_sample_window",
        )?,
    })
}

fn build_compression_settings(
    compression: RawCompressionSettings,
) -> Result<CompressionSettings, LoadError> {
    let min_size_bytes = compression
        .min_size_bytes
        .unwrap_or(DEFAULT_COMPRESSION_MIN_SIZE_BYTES);
    let high_ratio_threshold_bytes = compression
        .high_ratio_threshold_bytes
        .unwrap_or(DEFAULT_COMPRESSION_HIGH_RATIO_BYTES);
    if high_ratio_threshold_bytes < min_size_bytes {
        return Err(LoadError::invalid(
            "compression.high_ratio_threshold_bytes",
            "must not be smaller than compression.min_size_bytes",
        ));
    }

    let zstd_level = compression.zstd_level.unwrap_or(DEFAULT_ZSTD_LEVEL);
    if !(1..=22).contains(&zstd_level) {
        return Err(LoadError::invalid(
            "compression.zstd_level",
            "must be between 1 and 22",
        ));
    }

    Ok(CompressionSettings {
        enabled: compression.enabled.unwrap_or(true),
        min_size_bytes,
        high_ratio_threshold_bytes,
        zstd_level,
    })
}

fn build_breaker_settings(breaker: RawBreakerSettings) -> Result<BreakerSettings, LoadError> {
    Ok(BreakerSettings {
        failure_threshold: non_zero_u32(
            breaker
                .failure_threshold
                .unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD),
            "breaker.failure_threshold",
        )?,
        open_timeout: non_zero_secs(
            breaker
                .open_timeout_seconds
                .unwrap_or(DEFAULT_BREAKER_OPEN_TIMEOUT_SECS),
            "breaker.open_timeout_seconds",
        )?,
    })
}

fn build_freshness_settings(
    freshness: RawFreshnessSettings,
) -> Result<FreshnessSettings, LoadError> {
    let ttl = |value: Option<u64>, data_type: DataType, key: &'static str| match value {
        Some(seconds) => non_zero_secs(seconds, key),
        None => Ok(data_type.default_freshness()),
    };

    Ok(FreshnessSettings {
        overview: ttl(
            freshness.overview_seconds,
            DataType::Overview,
            "freshness.overview_seconds",
        )?,
        sparklines: ttl(
            freshness.sparklines_seconds,
            DataType::Sparklines,
            "freshness.sparklines_seconds",
        )?,
        keyword_overview: ttl(
            freshness.keyword_overview_seconds,
            DataType::KeywordOverview,
            "freshness.keyword_overview_seconds",
        )?,
        ranking_distribution: ttl(
            freshness.ranking_distribution_seconds,
            DataType::RankingDistribution,
            "freshness.ranking_distribution_seconds",
        )?,
        competitor_summary: ttl(
            freshness.competitor_summary_seconds,
            DataType::CompetitorSummary,
            "freshness.competitor_summary_seconds",
        )?,
        content_audit: ttl(
            freshness.content_audit_seconds,
            DataType::ContentAudit,
            "freshness.content_audit_seconds",
        )?,
        stale_while_revalidate: Duration::from_secs(
            freshness
                .stale_while_revalidate_seconds
                .unwrap_or(DEFAULT_STALE_WHILE_REVALIDATE_SECS),
        ),
        private: freshness.private.unwrap_or(false),
    })
}

fn build_warmer_settings(warmer: RawWarmerSettings) -> Result<WarmerSettings, LoadError> {
    let expiring_threshold_minutes = warmer
        .expiring_threshold_minutes
        .unwrap_or(DEFAULT_WARMER_EXPIRING_THRESHOLD_MINUTES);

    Ok(WarmerSettings {
        enabled: warmer.enabled.unwrap_or(true),
        interval: non_zero_secs(
            warmer
                .interval_seconds
                .unwrap_or(DEFAULT_WARMER_INTERVAL_SECS),
            "warmer.interval_seconds",
        )?,
        lookback_days: non_zero_u32(
            warmer.lookback_days.unwrap_or(DEFAULT_WARMER_LOOKBACK_DAYS),
            "warmer.lookback_days",
        )?,
        active_limit: non_zero_u32(
            warmer.active_limit.unwrap_or(DEFAULT_WARMER_ACTIVE_LIMIT),
            "warmer.active_limit",
        )?,
        expiring_threshold_minutes: NonZeroU64::new(expiring_threshold_minutes).ok_or_else(
            || {
                LoadError::invalid(
                    "warmer.expiring_threshold_minutes",
                    "must be greater than zero",
                )
            },
        )?,
        concurrency: non_zero_usize(
            warmer.concurrency.unwrap_or(DEFAULT_WARMER_CONCURRENCY),
            "warmer.concurrency",
        )?,
    })
}

fn build_monitor_settings(monitor: RawMonitorSettings) -> Result<MonitorSettings, LoadError> {
    let min_hit_rate = monitor.min_hit_rate.unwrap_or(DEFAULT_MONITOR_MIN_HIT_RATE);
    if !(0.0..=1.0).contains(&min_hit_rate) {
        return Err(LoadError::invalid(
            "monitor.min_hit_rate",
            "must be between 0 and 1",
        ));
    }

    let max_memory_ratio = monitor
        .max_memory_ratio
        .unwrap_or(DEFAULT_MONITOR_MAX_MEMORY_RATIO);
    if !(max_memory_ratio > 0.0 && max_memory_ratio <= 1.0) {
        return Err(LoadError::invalid(
            "monitor.max_memory_ratio",
            "must be greater than 0 and at most 1",
        ));
    }

    let max_latency_ms = monitor
        .max_latency_ms
        .unwrap_or(DEFAULT_MONITOR_MAX_LATENCY_MS);
    if max_latency_ms == 0 {
        return Err(LoadError::invalid(
            "monitor.max_latency_ms",
            "must be greater than zero",
        ));
    }

    Ok(MonitorSettings {
        latency_probes: non_zero_usize(
            monitor
                .latency_probes
                .unwrap_or(DEFAULT_MONITOR_LATENCY_PROBES),
            "monitor.latency_probes",
        )?,
        max_latency: Duration::from_millis(max_latency_ms),
        min_hit_rate,
        min_sample_size: monitor
            .min_sample_size
            .unwrap_or(DEFAULT_MONITOR_MIN_SAMPLE_SIZE),
        max_memory_ratio,
        history_len: non_zero_usize(
            monitor.history_len.unwrap_or(DEFAULT_MONITOR_HISTORY_LEN),
            "monitor.history_len",
        )?,
        interval: non_zero_secs(
            monitor
                .interval_seconds
                .unwrap_or(DEFAULT_MONITOR_INTERVAL_SECS),
            "monitor.interval_seconds",
        )?,
    })
}

fn build_edge_settings(edge: RawEdgeSettings) -> Result<EdgeSettings, LoadError> {
    let zone_id = non_blank(edge.zone_id);
    let api_token = non_blank(edge.api_token);
    if zone_id.is_some() != api_token.is_some() {
        return Err(LoadError::invalid(
            "edge",
            "zone_id and api_token must be configured together",
        ));
    }

    Ok(EdgeSettings {
        zone_id,
        api_token,
        api_base: non_blank(edge.api_base).unwrap_or_else(|| DEFAULT_EDGE_API_BASE.to_string()),
    })
}

// ============================================================================
// Raw sections
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<CacheBackendKind>,
    namespace: Option<String>,
    redis_url: Option<String>,
    pool_size: Option<u64>,
    operation_timeout_ms: Option<u64>,
    latency_sample_window: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompressionSettings {
    enabled: Option<bool>,
    min_size_bytes: Option<usize>,
    high_ratio_threshold_bytes: Option<usize>,
    zstd_level: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBreakerSettings {
    failure_threshold: Option<u64>,
    open_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFreshnessSettings {
    overview_seconds: Option<u64>,
    sparklines_seconds: Option<u64>,
    keyword_overview_seconds: Option<u64>,
    ranking_distribution_seconds: Option<u64>,
    competitor_summary_seconds: Option<u64>,
    content_audit_seconds: Option<u64>,
    stale_while_revalidate_seconds: Option<u64>,
    private: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWarmerSettings {
    enabled: Option<bool>,
    interval_seconds: Option<u64>,
    lookback_days: Option<u64>,
    active_limit: Option<u64>,
    expiring_threshold_minutes: Option<u64>,
    concurrency: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMonitorSettings {
    latency_probes: Option<u64>,
    max_latency_ms: Option<u64>,
    min_hit_rate: Option<f64>,
    min_sample_size: Option<u64>,
    max_memory_ratio: Option<f64>,
    history_len: Option<u64>,
    interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEdgeSettings {
    zone_id: Option<String>,
    api_token: Option<String>,
    api_base: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

#[cfg(test)]
mod tests;
