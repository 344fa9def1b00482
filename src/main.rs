use std::{process, sync::Arc, time::Duration};

use review_engagement::{
    application::{
        bus::MessageBus,
        commands::CommandServices,
        enums::EnumResolver,
        error::AppError,
        events::ServicePublisher,
        hooks::HookRegistry,
        repos::EntityStore,
        search::{SearchIndex, SearchIndexer},
        service::{ServiceContext, ServiceOptions, secret_or_ephemeral},
    },
    cache::{CacheConfig, CacheLayer},
    config::{self, BusBackendKind, Settings},
    infra::{
        bus::{MemoryBus, NatsBus},
        db::{MemoryEntityStore, PostgresRepositories},
        error::InfraError,
        grpc::GrpcService,
        http::{self, ApiState},
        queue::QueueConsumer,
        search::{ElasticSearchIndex, MemorySearchIndex},
        telemetry,
    },
};
use tokio::sync::watch;
use tokio::try_join;
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
        config::Command::Migrate(_) => run_migrations(settings).await,
    }
}

async fn run_migrations(settings: Settings) -> Result<(), AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;
    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    info!(target = "review_engagement::migrate", "Migrations applied");
    Ok(())
}

async fn init_store(settings: &Settings) -> Result<Arc<dyn EntityStore>, AppError> {
    let Some(url) = settings.database.url.as_deref() else {
        warn!(
            target = "review_engagement::bootstrap",
            "No database url configured; records live in memory only"
        );
        return Ok(Arc::new(MemoryEntityStore::new()));
    };
    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    if settings.database.run_migrations {
        PostgresRepositories::run_migrations(&pool)
            .await
            .map_err(|err| InfraError::database(err.to_string()))?;
    }
    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn init_search(settings: &Settings) -> Result<Arc<dyn SearchIndex>, AppError> {
    if !settings.search.enabled {
        return Ok(Arc::new(MemorySearchIndex::default()));
    }
    let index = ElasticSearchIndex::new(&settings.search.url, settings.search.timeout)
        .map_err(|err| InfraError::backend("search", err))?;
    Ok(Arc::new(index))
}

async fn init_bus(settings: &Settings) -> Result<Arc<dyn MessageBus>, AppError> {
    match (settings.bus.backend, settings.bus.nats_url.as_deref()) {
        (BusBackendKind::Nats, Some(url)) => {
            let bus = NatsBus::connect(url)
                .await
                .map_err(|err| InfraError::backend("bus", err))?;
            Ok(Arc::new(bus))
        }
        (BusBackendKind::Nats, None) => Err(InfraError::configuration(
            "nats bus selected without bus.nats_url",
        )
        .into()),
        (BusBackendKind::Memory, _) => Ok(Arc::new(MemoryBus::new())),
    }
}

struct Application {
    service: Arc<ServiceContext>,
    bus: Arc<dyn MessageBus>,
}

async fn build_application(settings: &Settings) -> Result<Application, AppError> {
    let store = init_store(settings).await?;
    let caches = CacheLayer::connect(&CacheConfig::from(&settings.cache))
        .await
        .map_err(|err| InfraError::backend("cache", err))?;
    let search = SearchIndexer::new(init_search(settings)?, settings.search.index_prefix.clone());
    let bus = init_bus(settings).await?;

    let enums = Arc::new(EnumResolver::new(caches.backend.clone(), search.clone()));
    let commands = Arc::new(CommandServices {
        store,
        caches,
        search,
        publisher: ServicePublisher::new(bus.clone()),
        hooks: HookRegistry::with_defaults(),
    });

    let auth = &settings.auth;
    let service = ServiceContext::new(
        commands,
        enums,
        &secret_or_ephemeral(auth.jwt_secret.as_deref(), "auth.jwt_secret"),
        &secret_or_ephemeral(auth.share_token_secret.as_deref(), "auth.share_token_secret"),
        ServiceOptions::from_settings(auth),
    );
    Ok(Application {
        service: Arc::new(service),
        bus,
    })
}

fn shutdown_signal(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let app = build_application(&settings).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let enum_loader = spawn_enum_loader(
        app.service.enums.clone(),
        settings.enums.cadence,
        shutdown_rx.clone(),
    );

    let listener = tokio::net::TcpListener::bind(settings.server.rest_addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "review_engagement::bootstrap",
        addr = %settings.server.rest_addr,
        "REST server listening"
    );
    let router = http::build_router(ApiState::new(app.service.clone()));
    let rest = async {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown_signal(shutdown_rx.clone()))
            .await
            .map_err(InfraError::server)
    };

    let grpc = async {
        GrpcService::new(app.service.clone())
            .serve(settings.server.grpc_addr, shutdown_signal(shutdown_rx.clone()))
            .await
            .map_err(InfraError::server)
    };

    let queue = async {
        if !settings.bus.consume_requests {
            return Ok(());
        }
        let consumer = Arc::new(QueueConsumer::new(
            app.service.clone(),
            app.bus.clone(),
            settings.bus.request_topic.clone(),
            settings.bus.response_topic.clone(),
        ));
        consumer
            .run(shutdown_signal(shutdown_rx.clone()))
            .await
            .map_err(|err| InfraError::backend("bus", err))
    };

    let grace = settings.server.graceful_shutdown;
    let mut signal_rx = shutdown_rx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target = "review_engagement::bootstrap", "Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });
    let deadline = async move {
        let _ = signal_rx.wait_for(|stop| *stop).await;
        tokio::time::sleep(grace).await;
    };

    let result = tokio::select! {
        result = async { try_join!(rest, grpc, queue) } => result.map(|_| ()),
        _ = deadline => {
            warn!(
                target = "review_engagement::bootstrap",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out"
            );
            Ok(())
        }
    };

    enum_loader.abort();
    let _ = enum_loader.await;
    result.map_err(AppError::from)
}

fn spawn_enum_loader(
    enums: Arc<EnumResolver>,
    cadence: Duration,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cadence);
        let stopped = shutdown_signal(shutdown);
        tokio::pin!(stopped);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    enums.load_all().await;
                }
                _ = &mut stopped => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enum_loader_stops_on_shutdown() {
        let caches = CacheLayer::in_memory(&CacheConfig::default());
        let search = SearchIndexer::new(Arc::new(MemorySearchIndex::default()), "test");
        let enums = Arc::new(EnumResolver::new(caches.backend.clone(), search));
        let (stop, stopped) = watch::channel(false);

        let loader = spawn_enum_loader(enums, Duration::from_millis(5), stopped);
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.send(true).expect("loader should still be listening");

        tokio::time::timeout(Duration::from_secs(1), loader)
            .await
            .expect("loader should stop promptly")
            .expect("loader task should not panic");
    }
}
