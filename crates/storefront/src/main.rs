//! FreshMart storefront - the public shop.
//!
//! This binary serves the shop on port 3000.
//!
//! # Architecture
//!
//! - Axum web framework with a little JavaScript for the cart and checkout
//! - Askama templates for server-side rendering
//! - `PostgreSQL` for accounts, catalog, orders and sessions
//! - Redis for carts and browsing history
//! - Alipay page-pay for online payment
//!
//! # Background work
//!
//! Three tasks run beside the server and stop on the shutdown token:
//!
//! - the task worker (activation email, static homepage)
//! - the catalog event bridge (`LISTEN catalog_changed` to the in-process bus)
//! - the homepage invalidator (bus to cache eviction and a rebuild task)

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Router, middleware::from_fn, routing::get};
use sentry::integrations::tracing as sentry_tracing;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions_sqlx_store::PostgresStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use freshmart_storefront::config::StorefrontConfig;
use freshmart_storefront::services::catalog::{HomepageCache, HomepageInvalidator};
use freshmart_storefront::services::email::EmailService;
use freshmart_storefront::services::events::{CatalogEventBridge, EventBus};
use freshmart_storefront::services::payment::{AlipayClient, PaymentGateway};
use freshmart_storefront::services::tasks::{StorefrontTasks, TaskQueue, TaskWorker};
use freshmart_storefront::state::{AppState, StateParts};
use freshmart_storefront::store::RedisStore;
use freshmart_storefront::{db, middleware, routes};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
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
    let config = StorefrontConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "freshmart_storefront=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    // Shop migrations run through the CLI; the session table is owned by the store
    PostgresStore::new(pool.clone())
        .migrate()
        .await
        .expect("Failed to create session table");

    let redis = RedisStore::connect(&config.redis_url)
        .await
        .expect("Failed to connect to Redis");
    tracing::info!("Redis connected");

    let gateway: Option<Arc<dyn PaymentGateway>> = match &config.alipay {
        Some(alipay) => {
            let client = AlipayClient::from_config(alipay).expect("Failed to load Alipay key");
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("Alipay is not configured; online payment is disabled");
            None
        }
    };

    let email = EmailService::new(config.smtp.as_ref(), &config.base_url)
        .expect("Failed to configure SMTP");

    let shutdown = CancellationToken::new();
    let homepage = HomepageCache::new();
    let events = EventBus::default();
    let (tasks, task_rx) = TaskQueue::new();

    // Background workers
    let worker = TaskWorker::new(StorefrontTasks {
        email,
        pool: pool.clone(),
        homepage: homepage.clone(),
        static_dir: config.static_dir.clone(),
    });
    let worker_handle = tokio::spawn(worker.run(task_rx, shutdown.clone()));

    let bridge = CatalogEventBridge::new(pool.clone(), events.clone());
    let bridge_handle = tokio::spawn(bridge.run(shutdown.clone()));

    let invalidator = HomepageInvalidator::new(homepage.clone(), tasks.clone());
    let invalidator_handle = tokio::spawn(invalidator.run(events.subscribe(), shutdown.clone()));

    let carts = Arc::new(redis.clone());
    let state = AppState::new(StateParts {
        config: config.clone(),
        pool,
        carts: carts.clone(),
        history: carts,
        gateway,
        tasks,
        events,
        homepage,
        shutdown: shutdown.clone(),
    });

    let session_layer = middleware::create_session_layer(state.pool(), state.config());

    let app = Router::new()
        .route("/health", get(health))
        .route(
            "/health/ready",
            get(move |State(state): State<AppState>| readiness(state, redis.clone())),
        )
        .merge(routes::routes())
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(middleware::request_id_middleware))
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("storefront listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .expect("Server error");

    for handle in [worker_handle, bridge_handle, invalidator_handle] {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }
    tracing::info!("Shutdown complete");
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable unless both `PostgreSQL` and Redis answer.
async fn readiness(state: AppState, redis: RedisStore) -> StatusCode {
    if let Err(e) = sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        tracing::warn!(error = %e, "Database not ready");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if let Err(e) = redis.ping().await {
        tracing::warn!(error = %e, "Redis not ready");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM), then stop the background tasks.
async fn shutdown_signal(shutdown: CancellationToken) {
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
    shutdown.cancel();
}
