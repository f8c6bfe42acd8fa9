use std::{process, sync::Arc};

use dashcache::{
    application::{
        aggregation::AggregationSource,
        dashboard::{DashboardService, FreshnessPolicy},
        error::AppError,
        jobs::{DashboardRefresher, WarmerWorker},
        precompute::PrecomputationPipeline,
        repos::PrecomputedRepo,
    },
    cache::{
        BreakerConfig, CacheBackend, CacheConfig, CacheInvalidator, CacheMonitor, CacheStore,
        CompressionConfig, HotKeyRegistry, InvalidationEvent, MemoryBackend, MonitorConfig,
    },
    config::{self, CacheBackendKind},
    infra::{
        cache_warmer::{CacheWarmer, WarmerConfig},
        db::PostgresRepositories,
        edge::{CloudflarePurger, EdgePurger},
        error::InfraError,
        redis::RedisBackend,
        telemetry,
    },
};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Precompute(args) => run_precompute(settings, args).await,
        config::Command::Warm(args) => run_warm(settings, args).await,
        config::Command::Health(_) => run_health(settings).await,
        config::Command::Invalidate(args) => run_invalidate(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let app = build_application_context(repositories.clone(), &settings).await?;

    let worker = if app.warmer.config().enabled {
        Some(WarmerWorker::start(app.warmer.clone()))
    } else {
        info!(target = "dashcache::serve", "Background warmer disabled");
        None
    };

    let monitor = app.monitor.clone();
    let monitor_interval = settings.monitor.interval;
    let monitor_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(monitor_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let report = monitor.health_check().await;
            let database_ok = repositories.health_check().await.is_ok();
            info!(
                target = "dashcache::health",
                status = ?report.status,
                database_ok,
                connected = report.connected,
                latency_ms = ?report.latency_ms,
                hit_rate = ?report.hit_rate,
                issues = report.issues.len(),
                "Cache health"
            );
        }
    });

    info!(
        target = "dashcache::serve",
        backend = app.store.backend_name(),
        cache_enabled = app.store.is_enabled(),
        "Serving; press ctrl-c to stop"
    );

    let result = tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)));

    info!(target = "dashcache::serve", "Shutting down");
    if let Some(worker) = worker {
        worker.stop().await;
    }
    monitor_handle.abort();
    let _ = monitor_handle.await;
    app.shutdown();

    result
}

async fn run_precompute(
    settings: config::Settings,
    args: config::PrecomputeArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let app = build_application_context(repositories, &settings).await?;

    info!(
        target = "dashcache::precompute",
        entity_id = %args.entity,
        run_id = %args.run,
        publish_only = args.publish_only,
        "Starting precomputation"
    );

    let summary = if args.publish_only {
        app.pipeline.run(args.entity, args.run).await?
    } else {
        app.refresher
            .on_computation_completed(args.entity, args.run)
            .await?
            .pipeline
    };

    app.shutdown();
    print_json(&summary)
}

async fn run_warm(settings: config::Settings, args: config::WarmArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let app = build_application_context(repositories, &settings).await?;

    let summary = match (args.entity, args.run) {
        (Some(entity), Some(run)) => {
            let components = (!args.components.is_empty()).then_some(args.components.as_slice());
            app.warmer.warm_entity(entity, run, components).await
        }
        _ => {
            let limit = args.limit.unwrap_or(app.warmer.config().active_limit);
            app.warmer.warm_active_entities(limit).await?
        }
    };

    app.shutdown();
    print_json(&summary)
}

async fn run_health(settings: config::Settings) -> Result<(), AppError> {
    let (store, redis) = init_cache_store(&settings).await;
    let monitor = CacheMonitor::new(store, MonitorConfig::from(&settings.monitor));

    let report = monitor.health_check().await;
    if let Some(redis) = redis {
        redis.close();
    }
    print_json(&report)
}

async fn run_invalidate(
    settings: config::Settings,
    args: config::InvalidateArgs,
) -> Result<(), AppError> {
    let event = match (args.all, args.entity) {
        (true, _) => InvalidationEvent::invalidate_all(),
        // Removal covers every resource kind cached for the entity.
        (false, Some(entity)) => InvalidationEvent::entity_deleted(entity),
        (false, None) => {
            return Err(AppError::validation(
                "invalidate requires either --all or --entity",
            ));
        }
    };

    let (store, redis) = init_cache_store(&settings).await;
    let invalidator = CacheInvalidator::new(
        store,
        Arc::new(HotKeyRegistry::new()),
        init_edge_purger(&settings)?,
    );

    let report = invalidator.invalidate(event).await;
    info!(
        target = "dashcache::invalidate",
        event = report.event,
        keys_deleted = report.keys_deleted,
        edge = ?report.edge,
        "Invalidation complete"
    );

    if let Some(redis) = redis {
        redis.close();
    }
    Ok(())
}

struct ApplicationContext {
    store: Arc<CacheStore>,
    redis: Option<Arc<RedisBackend>>,
    monitor: Arc<CacheMonitor>,
    pipeline: PrecomputationPipeline,
    warmer: CacheWarmer,
    refresher: DashboardRefresher,
}

impl ApplicationContext {
    fn shutdown(&self) {
        if let Some(redis) = self.redis.as_ref() {
            redis.close();
        }
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings.database_url()?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

/// Build the fast-path store. An unreachable Redis degrades to a disabled
/// cache so reads fall through to the durable store.
async fn init_cache_store(
    settings: &config::Settings,
) -> (Arc<CacheStore>, Option<Arc<RedisBackend>>) {
    let mut cache_config = CacheConfig::from(&settings.cache);
    let compression = CompressionConfig::from(&settings.compression);
    let breaker = BreakerConfig::from(&settings.breaker);

    let (backend, redis): (Arc<dyn CacheBackend>, Option<Arc<RedisBackend>>) =
        match cache_config.backend {
            CacheBackendKind::Memory => (Arc::new(MemoryBackend::new()), None),
            CacheBackendKind::Redis if !cache_config.enabled => {
                (Arc::new(MemoryBackend::new()), None)
            }
            CacheBackendKind::Redis => match RedisBackend::connect(&cache_config).await {
                Ok(redis) => {
                    let redis = Arc::new(redis);
                    (redis.clone() as Arc<dyn CacheBackend>, Some(redis))
                }
                Err(err) => {
                    warn!(
                        target = "dashcache::cache",
                        error = %err,
                        "Redis unavailable at startup; continuing with the cache disabled"
                    );
                    cache_config.enabled = false;
                    (Arc::new(MemoryBackend::new()), None)
                }
            },
        };

    let store = Arc::new(CacheStore::new(cache_config, compression, breaker, backend));
    (store, redis)
}

fn init_edge_purger(settings: &config::Settings) -> Result<Option<Arc<dyn EdgePurger>>, AppError> {
    let purger = CloudflarePurger::from_settings(&settings.edge)?;
    Ok(purger.map(|purger| Arc::new(purger) as Arc<dyn EdgePurger>))
}

async fn build_application_context(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let precomputed: Arc<dyn PrecomputedRepo> = repositories.clone();
    let aggregations: Arc<dyn AggregationSource> = repositories;

    let (store, redis) = init_cache_store(settings).await;
    let registry = Arc::new(HotKeyRegistry::new());
    let edge = init_edge_purger(settings)?;

    let dashboard = DashboardService::new(
        store.clone(),
        registry.clone(),
        precomputed.clone(),
        FreshnessPolicy::from(&settings.freshness),
    );
    let warmer = CacheWarmer::new(
        dashboard,
        precomputed.clone(),
        registry.clone(),
        WarmerConfig::from(&settings.warmer),
    );
    let pipeline = PrecomputationPipeline::new(precomputed, aggregations);
    let invalidator = Arc::new(CacheInvalidator::new(store.clone(), registry, edge));
    let refresher = DashboardRefresher::new(pipeline.clone(), invalidator, Some(warmer.clone()));
    let monitor = Arc::new(CacheMonitor::new(
        store.clone(),
        MonitorConfig::from(&settings.monitor),
    ));

    Ok(ApplicationContext {
        store,
        redis,
        monitor,
        pipeline,
        warmer,
        refresher,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
