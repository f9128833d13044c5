//! Apple Store server - checkout webhook ingestion and cache invalidation.
//!
//! This binary serves the webhook endpoint on port 5000.
//!
//! # Architecture
//!
//! - Axum web framework
//! - `PostgreSQL` for orders and order items
//! - Redis for the shared query cache and domain-event pub/sub
//!   (in-process `moka` cache and event bus when `REDIS_URL` is unset)
//! - Stripe API for line items and customers
//! - SMTP (lettre) for `send-email` events, when configured
//!
//! # Lifecycle
//!
//! Clients are connected here and injected into the router state. On shutdown
//! the listener drains, the Redis subscriber stops, queued events finish, and
//! the database pool is closed.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use sentry::integrations::tracing as sentry_tracing;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use apple_store_server::cache::{
    CacheStore, MokaCacheStore, RedisCacheStore, register_invalidation_workers,
};
use apple_store_server::config::ServerConfig;
use apple_store_server::db::{self, PgOrderStore};
use apple_store_server::events::{
    EventDispatcher, EventPublisher, EventRegistry, LocalEventBus, RedisEventBus,
};
use apple_store_server::notifications::{SmtpMailer, register_email_worker};
use apple_store_server::state::AppState;
use apple_store_server::stripe::StripeClient;

/// How long queued events may take to finish after the listener closes.
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ServerConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            send_default_pii: false,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = ServerConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "apple_store_server=info,tower_http=debug".into());

    // JSON logs for structured log shipping, text locally
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let json_layer =
        json_logs.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!json_logs).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // Initialize database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p apple-store-cli -- migrate

    let stripe = StripeClient::new(&config.stripe).expect("Failed to create Stripe client");

    // Cache and event bus: shared through Redis, or process-local
    let redis_bus = match &config.redis_url {
        Some(url) => Some(
            RedisEventBus::connect(url)
                .await
                .expect("Failed to connect Redis event bus"),
        ),
        None => None,
    };
    let cache: Arc<dyn CacheStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisCacheStore::connect(url, config.cache_ttl)
                .await
                .expect("Failed to connect Redis cache"),
        ),
        None => {
            tracing::warn!("REDIS_URL not set, running in single-instance mode");
            Arc::new(MokaCacheStore::new(config.cache_ttl))
        }
    };

    let mut registry = EventRegistry::new();
    register_invalidation_workers(&mut registry, Arc::clone(&cache));
    match &config.email {
        Some(email) => {
            let mailer = SmtpMailer::new(email).expect("Failed to configure SMTP mailer");
            register_email_worker(&mut registry, Arc::new(mailer));
        }
        None => tracing::warn!("SMTP_HOST not set, send-email events will be ignored"),
    }
    tracing::info!(?registry, "Event handlers registered");
    let (dispatcher, mut event_workers) = EventDispatcher::start(registry);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut subscriber = None;
    let events: Arc<dyn EventPublisher> = match redis_bus {
        Some(bus) => {
            let subscriber_bus = bus.clone();
            subscriber = Some(tokio::spawn(async move {
                subscriber_bus.run_subscriber(dispatcher, shutdown_rx).await;
            }));
            Arc::new(bus)
        }
        None => Arc::new(LocalEventBus::new(dispatcher)),
    };

    let state = AppState::new(
        Arc::new(PgOrderStore::new(pool.clone())),
        Arc::new(stripe),
        events,
        cache,
        &config.stripe,
    );

    // Build router
    let app = apple_store_server::app(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    // Start server
    let addr = config.socket_addr();
    tracing::info!("apple-store-server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Stop the subscriber; dropping the router and subscriber releases every
    // dispatcher handle so the workers drain and exit
    let _ = shutdown_tx.send(true);
    if let Some(subscriber) = subscriber
        && let Err(e) = subscriber.await
    {
        tracing::error!(error = %e, "Redis subscriber task failed");
    }

    let drained = tokio::time::timeout(EVENT_DRAIN_TIMEOUT, async {
        while event_workers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Timed out waiting for event workers, abandoning queued events");
    }

    pool.close().await;
    tracing::info!("Shutdown complete");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
