use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, builder::BoolishValueParser};
use uuid::Uuid;

use crate::domain::types::DataType;

use super::CacheBackendKind;

/// Command-line arguments for the dashcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "dashcache",
    version,
    about = "Dashboard cache, precomputation and invalidation service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DASHCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the background warmer and periodic health checks until interrupted.
    Serve(Box<ServeArgs>),
    /// Compute and publish every dashboard component of one run.
    Precompute(PrecomputeArgs),
    /// Warm one entity, or every recently active entity.
    Warm(WarmArgs),
    /// Print a cache health report as JSON.
    Health(HealthArgs),
    /// Drop cached entries for one entity or the whole namespace.
    Invalidate(InvalidateArgs),
}

/// Overrides accepted by every subcommand.
#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Toggle the fast-path cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the fast-path backend.
    #[arg(long = "cache-backend", value_name = "BACKEND", value_enum)]
    pub cache_backend: Option<CacheBackendKind>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Override the cache key namespace.
    #[arg(long = "cache-namespace", value_name = "PREFIX")]
    pub cache_namespace: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Toggle the background warmer.
    #[arg(
        long = "warmer-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub warmer_enabled: Option<bool>,

    /// Override the warming interval.
    #[arg(long = "warmer-interval-seconds", value_name = "SECONDS")]
    pub warmer_interval_seconds: Option<u64>,

    /// Override the health check interval.
    #[arg(long = "monitor-interval-seconds", value_name = "SECONDS")]
    pub monitor_interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct PrecomputeArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Entity whose run completed.
    #[arg(long, value_name = "UUID")]
    pub entity: Uuid,

    /// The completed run.
    #[arg(long, value_name = "UUID")]
    pub run: Uuid,

    /// Skip invalidation and warming after publishing.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub publish_only: bool,
}

#[derive(Debug, Args, Clone)]
pub struct WarmArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Warm a single entity; all recently active entities when omitted.
    #[arg(long, value_name = "UUID", requires = "run")]
    pub entity: Option<Uuid>,

    /// Run the warmed entity's data belongs to.
    #[arg(long, value_name = "UUID", requires = "entity")]
    pub run: Option<Uuid>,

    /// Comma-separated components to warm; every component when omitted.
    #[arg(long, value_name = "TYPES", value_delimiter = ',', requires = "entity")]
    pub components: Vec<DataType>,

    /// Override the number of active entities warmed.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct HealthArgs {
    #[command(flatten)]
    pub common: CommonOverrides,
}

#[derive(Debug, Args, Clone)]
#[command(group(ArgGroup::new("scope").required(true).args(["all", "entity"])))]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Flush the whole namespace and the edge zone.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub all: bool,

    /// Invalidate everything cached for one entity.
    #[arg(long, value_name = "UUID")]
    pub entity: Option<Uuid>,
}

impl Command {
    pub fn common(&self) -> &CommonOverrides {
        match self {
            Command::Serve(args) => &args.common,
            Command::Precompute(args) => &args.common,
            Command::Warm(args) => &args.common,
            Command::Health(args) => &args.common,
            Command::Invalidate(args) => &args.common,
        }
    }
}
