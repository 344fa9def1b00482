//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheBackendKind;

pub use cli::{CliArgs, Command, DatabaseOverride, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "review-engagement";
const ENV_PREFIX: &str = "REVIEW_ENGAGEMENT";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_REST_PORT: u16 = 3000;
const DEFAULT_GRPC_PORT: u16 = 50051;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_ENTITY_TTL_SECS: u64 = 3600;
const DEFAULT_QUERY_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: u64 = 10_000;
const DEFAULT_SEARCH_URL: &str = "http://127.0.0.1:9200";
const DEFAULT_SEARCH_INDEX_PREFIX: &str = "reviewengagement";
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TOPIC: &str = "reviewEngagement-service-requests";
const DEFAULT_RESPONSE_TOPIC: &str = "reviewEngagement-service-responses";
const DEFAULT_PAGE_ROW_COUNT: u64 = 20;
const DEFAULT_SESSION_COOKIE: &str = "access_token";
const DEFAULT_ENUM_CADENCE_SECS: u64 = 3600;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub search: SearchSettings,
    pub bus: BusSettings,
    pub auth: AuthSettings,
    pub enums: EnumSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub rest_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
    /// Without a URL the service runs on the in-memory store.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    pub enable_entity_cache: bool,
    pub enable_query_cache: bool,
    pub entity_ttl: Duration,
    pub query_ttl: Duration,
    pub memory_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub enabled: bool,
    pub url: String,
    pub index_prefix: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackendKind {
    Memory,
    Nats,
}

#[derive(Debug, Clone)]
pub struct BusSettings {
    pub backend: BusBackendKind,
    pub nats_url: Option<String>,
    pub request_topic: String,
    pub response_topic: String,
    pub consume_requests: bool,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: Option<String>,
    pub share_token_secret: Option<String>,
    /// Sessions in this tenant skip tenant mismatch checks.
    pub root_tenant_id: Option<String>,
    pub default_page_row_count: NonZeroU64,
    pub require_email_verification: bool,
    pub require_mobile_verification: bool,
    pub session_cookie: String,
    /// Where REST requests in redirect mode are sent when login is missing.
    pub login_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnumSettings {
    pub cadence: Duration,
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
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(database)) => raw.apply_database_override(database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            search,
            bus,
            auth,
            enums,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            search: build_search_settings(search)?,
            bus: build_bus_settings(bus)?,
            auth: build_auth_settings(auth)?,
            enums: build_enum_settings(enums)?,
        })
    }

    /// Settings for tests and local runs: every backend in memory.
    pub fn in_memory() -> Result<Self, LoadError> {
        Self::from_raw(RawSettings::default())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    search: RawSearchSettings,
    bus: RawBusSettings,
    auth: RawAuthSettings,
    enums: RawEnumSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.rest_port {
            self.server.rest_port = Some(port);
        }
        if let Some(port) = overrides.grpc_port {
            self.server.grpc_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(ttl) = overrides.cache_query_ttl_seconds {
            self.cache.query_ttl_seconds = Some(ttl);
        }
        if let Some(enabled) = overrides.search_enabled {
            self.search.enabled = Some(enabled);
        }
        if let Some(url) = overrides.search_url.as_ref() {
            self.search.url = Some(url.clone());
        }
        if let Some(backend) = overrides.bus_backend.as_ref() {
            self.bus.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.bus_nats_url.as_ref() {
            self.bus.nats_url = Some(url.clone());
        }
        if let Some(cadence) = overrides.enums_cadence_seconds {
            self.enums.cadence_seconds = Some(cadence);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let rest_port = non_zero_port(server.rest_port.unwrap_or(DEFAULT_REST_PORT), "server.rest_port")?;
    let grpc_port = non_zero_port(server.grpc_port.unwrap_or(DEFAULT_GRPC_PORT), "server.grpc_port")?;
    if rest_port == grpc_port {
        return Err(LoadError::invalid(
            "server.grpc_port",
            "REST and gRPC listeners need distinct ports",
        ));
    }

    let rest_addr = parse_socket_addr(&host, rest_port)
        .map_err(|reason| LoadError::invalid("server.rest_addr", reason))?;
    let grpc_addr = parse_socket_addr(&host, grpc_port)
        .map_err(|reason| LoadError::invalid("server.grpc_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        rest_addr,
        grpc_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

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
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url: non_empty(database.url),
        max_connections,
        run_migrations: database.run_migrations.unwrap_or(true),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("") | Some("memory") => CacheBackendKind::Memory,
        Some("redis") => CacheBackendKind::Redis,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`, expected memory or redis"),
            ));
        }
    };
    let redis_url = non_empty(cache.redis_url);
    if backend == CacheBackendKind::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when cache.backend is redis",
        ));
    }

    let entity_ttl = non_zero_secs(
        cache.entity_ttl_seconds.unwrap_or(DEFAULT_ENTITY_TTL_SECS),
        "cache.entity_ttl_seconds",
    )?;
    let query_ttl = non_zero_secs(
        cache.query_ttl_seconds.unwrap_or(DEFAULT_QUERY_TTL_SECS),
        "cache.query_ttl_seconds",
    )?;

    let capacity = cache.memory_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    let capacity = usize::try_from(capacity).map_err(|_| {
        LoadError::invalid(
            "cache.memory_capacity",
            "value exceeds supported range for usize",
        )
    })?;
    let memory_capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("cache.memory_capacity", "must be greater than zero"))?;

    Ok(CacheSettings {
        backend,
        redis_url,
        enable_entity_cache: cache.enable_entity_cache.unwrap_or(true),
        enable_query_cache: cache.enable_query_cache.unwrap_or(true),
        entity_ttl,
        query_ttl,
        memory_capacity,
    })
}

fn build_search_settings(search: RawSearchSettings) -> Result<SearchSettings, LoadError> {
    let url = non_empty(search.url).unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string());
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(LoadError::invalid(
            "search.url",
            format!("`{url}` is not an http(s) URL"),
        ));
    }
    let index_prefix = non_empty(search.index_prefix)
        .unwrap_or_else(|| DEFAULT_SEARCH_INDEX_PREFIX.to_string());
    let timeout = non_zero_secs(
        search.timeout_seconds.unwrap_or(DEFAULT_SEARCH_TIMEOUT_SECS),
        "search.timeout_seconds",
    )?;

    Ok(SearchSettings {
        enabled: search.enabled.unwrap_or(false),
        url: url.trim_end_matches('/').to_string(),
        index_prefix,
        timeout,
    })
}

fn build_bus_settings(bus: RawBusSettings) -> Result<BusSettings, LoadError> {
    let backend = match bus.backend.as_deref().map(str::trim) {
        None | Some("") | Some("memory") => BusBackendKind::Memory,
        Some("nats") => BusBackendKind::Nats,
        Some(other) => {
            return Err(LoadError::invalid(
                "bus.backend",
                format!("unknown backend `{other}`, expected memory or nats"),
            ));
        }
    };
    let nats_url = non_empty(bus.nats_url);
    if backend == BusBackendKind::Nats && nats_url.is_none() {
        return Err(LoadError::invalid(
            "bus.nats_url",
            "required when bus.backend is nats",
        ));
    }
    let request_topic =
        non_empty(bus.request_topic).unwrap_or_else(|| DEFAULT_REQUEST_TOPIC.to_string());
    let response_topic =
        non_empty(bus.response_topic).unwrap_or_else(|| DEFAULT_RESPONSE_TOPIC.to_string());
    if request_topic == response_topic {
        return Err(LoadError::invalid(
            "bus.response_topic",
            "must differ from bus.request_topic",
        ));
    }

    Ok(BusSettings {
        backend,
        nats_url,
        request_topic,
        response_topic,
        consume_requests: bus.consume_requests.unwrap_or(true),
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let default_page_row_count = NonZeroU64::new(
        auth.default_page_row_count
            .unwrap_or(DEFAULT_PAGE_ROW_COUNT),
    )
    .ok_or_else(|| LoadError::invalid("auth.default_page_row_count", "must be greater than zero"))?;

    Ok(AuthSettings {
        jwt_secret: non_empty(auth.jwt_secret),
        share_token_secret: non_empty(auth.share_token_secret),
        root_tenant_id: non_empty(auth.root_tenant_id),
        default_page_row_count,
        require_email_verification: auth.require_email_verification.unwrap_or(false),
        require_mobile_verification: auth.require_mobile_verification.unwrap_or(false),
        session_cookie: non_empty(auth.session_cookie)
            .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string()),
        login_url: non_empty(auth.login_url),
    })
}

fn build_enum_settings(enums: RawEnumSettings) -> Result<EnumSettings, LoadError> {
    Ok(EnumSettings {
        cadence: non_zero_secs(
            enums.cadence_seconds.unwrap_or(DEFAULT_ENUM_CADENCE_SECS),
            "enums.cadence_seconds",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    rest_port: Option<u16>,
    grpc_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

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
    run_migrations: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    enable_entity_cache: Option<bool>,
    enable_query_cache: Option<bool>,
    entity_ttl_seconds: Option<u64>,
    query_ttl_seconds: Option<u64>,
    memory_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSearchSettings {
    enabled: Option<bool>,
    url: Option<String>,
    index_prefix: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBusSettings {
    backend: Option<String>,
    nats_url: Option<String>,
    request_topic: Option<String>,
    response_topic: Option<String>,
    consume_requests: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    jwt_secret: Option<String>,
    share_token_secret: Option<String>,
    root_tenant_id: Option<String>,
    default_page_row_count: Option<u64>,
    require_email_verification: Option<bool>,
    require_mobile_verification: Option<bool>,
    session_cookie: Option<String>,
    login_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEnumSettings {
    cadence_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_port(port: u16, key: &'static str) -> Result<u16, LoadError> {
    if port == 0 {
        return Err(LoadError::invalid(key, "port must be greater than zero"));
    }
    Ok(port)
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
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

#[cfg(test)]
mod tests;
