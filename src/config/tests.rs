use clap::Parser;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.rest_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        rest_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.rest_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_run_everything_in_memory() {
    let settings = Settings::in_memory().expect("valid settings");
    assert!(settings.database.url.is_none());
    assert_eq!(settings.cache.backend, CacheBackendKind::Memory);
    assert_eq!(settings.cache.query_ttl, Duration::from_secs(300));
    assert_eq!(settings.bus.backend, BusBackendKind::Memory);
    assert!(!settings.search.enabled);
    assert_eq!(settings.auth.session_cookie, "access_token");
    assert_eq!(settings.server.grpc_addr.port(), 50051);
}

#[test]
fn redis_backend_requires_url() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("redis".to_string());
    let err = Settings::from_raw(raw).expect_err("missing redis url");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.redis_url",
            ..
        }
    ));
}

#[test]
fn unknown_bus_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.bus.backend = Some("kafka".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn zero_query_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.query_ttl_seconds = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn clashing_listener_ports_are_rejected() {
    let mut raw = RawSettings::default();
    raw.server.rest_port = Some(7000);
    raw.server.grpc_port = Some(7000);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn search_url_trailing_slash_is_trimmed() {
    let mut raw = RawSettings::default();
    raw.search.url = Some("http://search:9200/".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.search.url, "http://search:9200");
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["review-engagement"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "review-engagement",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--cache-backend",
        "redis",
        "--cache-redis-url",
        "redis://cache:6379",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.cache_backend.as_deref(), Some("redis"));
            assert_eq!(
                serve.overrides.cache_redis_url.as_deref(),
                Some("redis://cache:6379")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_migrate_arguments() {
    let args = CliArgs::parse_from([
        "review-engagement",
        "migrate",
        "--database-url",
        "postgres://example",
    ]);

    match args.command.expect("migrate command") {
        Command::Migrate(database) => {
            assert_eq!(database.database_url.as_deref(), Some("postgres://example"));
        }
        _ => panic!("wrong command parsed"),
    }
}
