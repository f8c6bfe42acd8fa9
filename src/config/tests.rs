use super::*;
use uuid::Uuid;


#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.cache.namespace = Some("from-file".to_string());
    raw.logging.level = Some("info".to_string());

    let overrides = ServeArgs {
        common: CommonOverrides {
            cache_namespace: Some("from-cli".to_string()),
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        warmer_interval_seconds: Some(30),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.namespace, "from-cli");
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.warmer.interval, Duration::from_secs(30));
}

#[test]
fn defaults_resolve_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.backend, CacheBackendKind::Redis);
    assert_eq!(settings.cache.namespace, DEFAULT_CACHE_NAMESPACE);
    assert_eq!(settings.breaker.failure_threshold.get(), 5);
    assert_eq!(settings.breaker.open_timeout, Duration::from_secs(60));
    assert_eq!(settings.compression.min_size_bytes, 1024);
    assert_eq!(settings.warmer.interval, Duration::from_secs(15 * 60));
    assert_eq!(settings.warmer.lookback_days.get(), 7);
    assert_eq!(settings.warmer.active_limit.get(), 50);
    assert_eq!(settings.monitor.interval, Duration::from_secs(60));
    assert!(settings.database.url.is_none());
    assert!(settings.edge.zone_id.is_none());
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn freshness_defaults_follow_data_types() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    for data_type in DataType::ALL {
        assert_eq!(
            settings.freshness.ttl(data_type),
            data_type.default_freshness(),
            "{data_type}"
        );
    }
    assert!(!settings.freshness.private);
}

#[test]
fn freshness_override_applies_to_one_component() {
    let mut raw = RawSettings::default();
    raw.freshness.sparklines_seconds = Some(120);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(
        settings.freshness.ttl(DataType::Sparklines),
        Duration::from_secs(120)
    );
    assert_eq!(
        settings.freshness.ttl(DataType::Overview),
        DataType::Overview.default_freshness()
    );
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.breaker.failure_threshold = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero threshold");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "breaker.failure_threshold",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.warmer.concurrency = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.cache.operation_timeout_ms = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn compression_bounds_are_validated() {
    let mut raw = RawSettings::default();
    raw.compression.zstd_level = Some(23);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.compression.min_size_bytes = Some(4096);
    raw.compression.high_ratio_threshold_bytes = Some(1024);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn monitor_ratios_must_be_fractions() {
    let mut raw = RawSettings::default();
    raw.monitor.min_hit_rate = Some(1.5);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.monitor.max_memory_ratio = Some(0.0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn namespace_is_trimmed_and_checked() {
    let mut raw = RawSettings::default();
    raw.cache.namespace = Some(" tenant-a: ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.namespace, "tenant-a");

    let mut raw = RawSettings::default();
    raw.cache.namespace = Some("tenant*".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn edge_credentials_must_be_paired() {
    let mut raw = RawSettings::default();
    raw.edge.zone_id = Some("zone".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.edge.zone_id = Some("zone".to_string());
    raw.edge.api_token = Some("token".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.edge.api_base, DEFAULT_EDGE_API_BASE);
}

#[test]
fn database_url_is_required_on_demand() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert!(settings.database_url().is_err());

    let mut raw = RawSettings::default();
    raw.database.url = Some("postgres://example".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.database_url().ok(), Some("postgres://example"));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = CommonOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_common_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["dashcache"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_precompute_arguments() {
    let entity = Uuid::new_v4();
    let run = Uuid::new_v4();
    let args = CliArgs::parse_from([
        "dashcache",
        "precompute",
        "--database-url",
        "postgres://example",
        "--entity",
        &entity.to_string(),
        "--run",
        &run.to_string(),
    ]);

    match args.command.expect("precompute command") {
        Command::Precompute(precompute) => {
            assert_eq!(
                precompute.common.database_url.as_deref(),
                Some("postgres://example")
            );
            assert_eq!(precompute.entity, entity);
            assert_eq!(precompute.run, run);
            assert!(!precompute.publish_only);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_warm_components() {
    let entity = Uuid::new_v4();
    let run = Uuid::new_v4();
    let args = CliArgs::parse_from([
        "dashcache",
        "warm",
        "--entity",
        &entity.to_string(),
        "--run",
        &run.to_string(),
        "--components",
        "overview,keyword-overview",
        "--cache-backend",
        "memory",
    ]);

    match args.command.expect("warm command") {
        Command::Warm(warm) => {
            assert_eq!(warm.entity, Some(entity));
            assert_eq!(
                warm.components,
                vec![DataType::Overview, DataType::KeywordOverview]
            );
            assert_eq!(warm.common.cache_backend, Some(CacheBackendKind::Memory));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn warm_entity_requires_run() {
    let entity = Uuid::new_v4().to_string();
    let result = CliArgs::try_parse_from(["dashcache", "warm", "--entity", entity.as_str()]);
    assert!(result.is_err());
}

#[test]
fn invalidate_requires_a_scope() {
    assert!(CliArgs::try_parse_from(["dashcache", "invalidate"]).is_err());

    let args = CliArgs::parse_from(["dashcache", "invalidate", "--all"]);
    match args.command.expect("invalidate command") {
        Command::Invalidate(invalidate) => {
            assert!(invalidate.all);
            assert!(invalidate.entity.is_none());
        }
        _ => panic!("wrong command parsed"),
    }

    let entity = Uuid::new_v4().to_string();
    assert!(
        CliArgs::try_parse_from([
            "dashcache",
            "invalidate",
            "--all",
            "--entity",
            entity.as_str()
        ])
        .is_err()
    );
}

#[test]
fn common_overrides_apply_to_every_command() {
    let args = CliArgs::parse_from(["dashcache", "health", "--cache-namespace", "probe"]);
    let command = args.command.expect("health command");

    let mut raw = RawSettings::default();
    raw.apply_common_overrides(command.common());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.namespace, "probe");
}

mod environment {
    use serial_test::serial;

    use super::*;

    const NAMESPACE_VAR: &str = "DASHCACHE__CACHE__NAMESPACE";

    struct EnvGuard(&'static str);

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            // SAFETY: environment-touching tests are serialized.
            unsafe { std::env::set_var(key, value) };
            Self(key)
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            // SAFETY: environment-touching tests are serialized.
            unsafe { std::env::remove_var(self.0) };
        }
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        let _guard = EnvGuard::set(NAMESPACE_VAR, "from-env");
        let args = CliArgs::parse_from(["dashcache", "health"]);

        let settings = load(&args).expect("settings load");
        assert_eq!(settings.cache.namespace, "from-env");
    }

    #[test]
    #[serial]
    fn cli_overrides_environment() {
        let _guard = EnvGuard::set(NAMESPACE_VAR, "from-env");
        let args = CliArgs::parse_from(["dashcache", "health", "--cache-namespace", "from-cli"]);

        let settings = load(&args).expect("settings load");
        assert_eq!(settings.cache.namespace, "from-cli");
    }

    #[test]
    #[serial]
    fn missing_config_file_is_an_error() {
        let args = CliArgs::parse_from([
            "dashcache",
            "--config-file",
            "/nonexistent/dashcache.toml",
            "health",
        ]);
        assert!(matches!(load(&args), Err(LoadError::Build(_))));
    }
}
