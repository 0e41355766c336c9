// Main entry point for business-hub

use anyhow::Context;
use business_hub::api::{create_router, AppState};
use business_hub::auth::audit_logger::AuditLogger;
use business_hub::auth::AuthState;
use business_hub::config::{Config, StateBackend};
use business_hub::core::token::TokenService;
use business_hub::metrics::Metrics;
use business_hub::queue::{ConsumerSettings, MemoryBroker, MessageBroker, MessageQueue, RedisBroker};
use business_hub::services::{
    BusinessService, CacheTtls, CredentialTtls, HttpMailer, LogMailer, Mailer, NotificationDispatcher,
    NotificationPublisher, TemplateRegistry, UserService,
};
use business_hub::state::{CacheStore, MemoryCache, RedisCache};
use business_hub::store::{pg_accounts, PgBusinessRepository, PgStore, PoolSettings};

use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load and validate configuration first (before any logging)
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // 2. Initialize tracing; must happen exactly once
    init_tracing(&config)?;

    info!("Starting business-hub");
    info!(
        bind_address = %config.bind_address,
        port = config.port,
        state_backend = ?config.state_backend,
        "Configuration loaded"
    );

    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);

    // 3. Relational store
    let pool_settings = PoolSettings {
        max_connections: config.database_max_connections,
        min_connections: config.database_min_connections,
        acquire_timeout: Duration::from_secs(config.database_acquire_timeout_secs),
    };
    let database = Arc::new(
        PgStore::connect(&config.database_url, &pool_settings)
            .await
            .context("failed to connect to database")?,
    );
    database.migrate().await.context("failed to run migrations")?;
    info!("Database pool initialized");

    // 4. Cache and broker
    let (cache, broker): (Arc<dyn CacheStore>, Arc<dyn MessageBroker>) = match config.state_backend {
        StateBackend::Redis => {
            let cache = RedisCache::new(
                &config.redis_url,
                config.redis_connection_timeout(),
                config.redis_operation_timeout(),
            )
            .await
            .context("failed to initialize Redis cache")?;
            let broker = RedisBroker::connect(
                &config.redis_url,
                config.redis_connection_timeout(),
                config.redis_operation_timeout(),
            )
            .await
            .context("failed to initialize Redis broker")?;
            (Arc::new(cache), Arc::new(broker))
        }
        StateBackend::Memory => {
            warn!("Using in-process cache and broker; state is lost on restart");
            (Arc::new(MemoryCache::default()), Arc::new(MemoryBroker::new()))
        }
    };
    info!("Cache and broker initialized");

    let queue = Arc::new(
        MessageQueue::new(
            broker,
            ConsumerSettings {
                poll_interval: Duration::from_millis(config.consumer_poll_interval_ms),
                poison_warn_threshold: config.poison_warn_threshold,
                visibility_timeout: Duration::from_secs(config.queue_visibility_timeout_secs),
            },
        )
        .with_metrics(metrics.clone()),
    );

    // 5. Notification pipeline
    let templates = TemplateRegistry::load_dir(&config.template_dir)
        .with_context(|| format!("failed to load templates from {}", config.template_dir.display()))?;
    let mailer: Arc<dyn Mailer> = match config.mail_relay_url {
        Some(ref relay_url) => Arc::new(
            HttpMailer::new(relay_url, Duration::from_secs(config.mail_timeout_secs))
                .context("failed to create mail client")?,
        ),
        None => {
            warn!("MAIL_RELAY_URL not set, outgoing mail will only be logged");
            Arc::new(LogMailer)
        }
    };
    Arc::new(NotificationDispatcher::new(Arc::new(templates), mailer))
        .start(&queue)
        .await
        .context("failed to start notification consumer")?;

    // 6. Services
    let tokens = Arc::new(
        TokenService::new(config.jwt_secret.expose_secret(), config.token_ttl()).context("invalid JWT secret")?,
    );
    let publisher = Arc::new(NotificationPublisher::new(queue.clone(), config.mail_from.clone()));

    let users = Arc::new(
        UserService::new(
            Arc::new(pg_accounts(database.clone())),
            cache.clone(),
            tokens.clone(),
            CredentialTtls {
                refresh_token: Duration::from_secs(config.refresh_token_ttl_secs),
                verification_code: Duration::from_secs(config.verification_code_ttl_secs),
            },
        )
        .with_notifications(publisher),
    );

    let businesses = Arc::new(
        BusinessService::new(
            Arc::new(PgBusinessRepository::new(database.pool().clone())),
            cache.clone(),
            CacheTtls {
                entity: Duration::from_secs(config.entity_cache_ttl_secs),
                list: Duration::from_secs(config.list_cache_ttl_secs),
            },
        )
        .with_metrics(metrics.clone()),
    );

    // 7. Authorization gate
    let auth_state = Arc::new(AuthState {
        tokens,
        directory: users.clone(),
        audit_logger: Arc::new(AuditLogger::new(Some(Arc::new(database.pool().clone())))),
        metrics: Some(metrics.clone()),
    });

    // 8. Router
    let app_state = AppState {
        config: Arc::new(config.clone()),
        users,
        businesses,
        cache,
        queue: queue.clone(),
        database: Some(database),
        metrics,
    };
    let router = create_router(app_state, auth_state);

    // 9. Serve until a shutdown signal arrives
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(addr = %addr, "Server listening");

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop consumers even when the server failed
    if let Err(e) = queue.close().await {
        error!(error = %e, "Failed to close message queue");
    }

    served.context("server error")?;
    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber based on configuration
///
/// `RUST_LOG` takes precedence over `LOG_LEVEL`.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log filter")?;

    let subscriber = fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
