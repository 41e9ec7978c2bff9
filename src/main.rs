use std::{pin::pin, process, sync::Arc, time::Duration};

use etagger::{
    application::{
        coherence::CoherenceEngine, error::AppError, repos::UsersStore,
        validator::ValidatorGenerator,
    },
    cache::{
        CacheBackendKind, MemoryBackend, RedisBackend, ValidatorBackend, ValidatorCacheConfig,
        ValidatorStore,
    },
    config,
    infra::{
        db::PostgresUsers, error::InfraError, http, memory::InMemoryUsers,
        metrics::MetricsObserver, telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

/// Lower bound for establishing the Redis connection at startup.
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

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

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::CheckConfig(_) => {
            println!("{settings}");
            Ok(())
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repository = init_repository(&settings).await?;
    let store = init_validator_store(&settings).await?;
    let generator = ValidatorGenerator::new(settings.etag.strategy);

    info!(
        strategy = generator.strategy().as_str(),
        cache_backend = settings.cache.backend.as_str(),
        ttl_secs = settings.cache.ttl.as_secs(),
        "coherence engine ready"
    );

    let engine = CoherenceEngine::new(repository, store, generator);
    let state = http::HttpState::new(engine, Arc::new(MetricsObserver::new()));

    serve_http(&settings, state).await
}

async fn init_repository(settings: &config::Settings) -> Result<Arc<dyn UsersStore>, AppError> {
    let Some(database_url) = settings.database.url.as_deref() else {
        warn!("database.url is not configured; users are kept in memory and lost on exit");
        return Ok(Arc::new(InMemoryUsers::new()));
    };

    let pool = PostgresUsers::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    PostgresUsers::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    Ok(Arc::new(PostgresUsers::new(pool)))
}

async fn init_validator_store(settings: &config::Settings) -> Result<ValidatorStore, AppError> {
    let config = ValidatorCacheConfig::from(&settings.cache);

    let backend: Arc<dyn ValidatorBackend> = match config.backend {
        CacheBackendKind::Memory => Arc::new(MemoryBackend::new(&config)),
        CacheBackendKind::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                InfraError::configuration("cache.redis_url is required for the redis backend")
            })?;
            let backend = RedisBackend::connect(url, config.op_timeout.max(REDIS_CONNECT_TIMEOUT))
                .await
                .map_err(|err| InfraError::cache(err.to_string()))?;
            Arc::new(backend)
        }
    };

    Ok(ValidatorStore::new(backend, config))
}

async fn serve_http(settings: &config::Settings, state: http::HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.addr, "listening");

    let drain = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown({
            let drain = drain.clone();
            async move { drain.notified().await }
        })
        .into_future();
    let mut server = pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::from(InfraError::from(err)));
        }
        () = shutdown_signal() => {}
    }

    info!(
        grace_secs = settings.server.graceful_shutdown.as_secs(),
        "shutdown requested; draining connections"
    );
    drain.notify_one();

    match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
        Ok(result) => result.map_err(|err| AppError::from(InfraError::from(err))),
        Err(_) => {
            warn!("graceful shutdown timed out; dropping remaining connections");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
