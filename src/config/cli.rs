use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the review-engagement binary.
#[derive(Debug, Parser)]
#[command(
    name = "review-engagement",
    version,
    about = "Review, recommendation and engagement-event service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "REVIEW_ENGAGEMENT_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the REST, gRPC and queue listeners.
    Serve(Box<ServeArgs>),
    /// Apply pending database migrations and exit.
    #[command(name = "migrate")]
    Migrate(DatabaseOverride),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host shared by REST and gRPC.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the REST listener port.
    #[arg(long = "server-rest-port", value_name = "PORT")]
    pub rest_port: Option<u16>,

    /// Override the gRPC listener port.
    #[arg(long = "server-grpc-port", value_name = "PORT")]
    pub grpc_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the cache backend (memory|redis).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis URL used by the redis cache backend.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Override the query cache TTL.
    #[arg(long = "cache-query-ttl-seconds", value_name = "SECONDS")]
    pub cache_query_ttl_seconds: Option<u64>,

    /// Toggle search indexing.
    #[arg(
        long = "search-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub search_enabled: Option<bool>,

    /// Override the Elasticsearch base URL.
    #[arg(long = "search-url", value_name = "URL")]
    pub search_url: Option<String>,

    /// Override the message bus backend (memory|nats).
    #[arg(long = "bus-backend", value_name = "BACKEND")]
    pub bus_backend: Option<String>,

    /// Override the NATS server URL.
    #[arg(long = "bus-nats-url", value_name = "URL")]
    pub bus_nats_url: Option<String>,

    /// Override the enum dictionary reload cadence.
    #[arg(long = "enums-cadence-seconds", value_name = "SECONDS")]
    pub enums_cadence_seconds: Option<u64>,
}
