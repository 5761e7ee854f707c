//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::StorefrontConfig;
use crate::db::{AddressRepository, CatalogRepository, OrderRepository, UserRepository};
use crate::services::auth::AuthService;
use crate::services::cart::CartService;
use crate::services::catalog::HomepageCache;
use crate::services::events::EventBus;
use crate::services::orders::OrderService;
use crate::services::payment::{PaymentGateway, PaymentService};
use crate::services::tasks::TaskQueue;
use crate::services::tokens::ActivationTokens;
use crate::store::{CartStore, HistoryStore};

/// Everything [`AppState::new`] needs.
pub struct StateParts {
    pub config: StorefrontConfig,
    pub pool: PgPool,
    pub carts: Arc<dyn CartStore>,
    pub history: Arc<dyn HistoryStore>,
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub tasks: TaskQueue,
    pub events: EventBus,
    pub homepage: HomepageCache,
    pub shutdown: CancellationToken,
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    carts: Arc<dyn CartStore>,
    history: Arc<dyn HistoryStore>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    tokens: ActivationTokens,
    tasks: TaskQueue,
    events: EventBus,
    homepage: HomepageCache,
    shutdown: CancellationToken,
}

impl AppState {
    #[must_use]
    pub fn new(parts: StateParts) -> Self {
        let tokens = ActivationTokens::new(&parts.config.session_secret);

        Self {
            inner: Arc::new(AppStateInner {
                config: parts.config,
                pool: parts.pool,
                carts: parts.carts,
                history: parts.history,
                gateway: parts.gateway,
                tokens,
                tasks: parts.tasks,
                events: parts.events,
                homepage: parts.homepage,
                shutdown: parts.shutdown,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn carts(&self) -> &dyn CartStore {
        self.inner.carts.as_ref()
    }

    #[must_use]
    pub fn history(&self) -> &dyn HistoryStore {
        self.inner.history.as_ref()
    }

    #[must_use]
    pub fn tasks(&self) -> &TaskQueue {
        &self.inner.tasks
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    #[must_use]
    pub fn homepage(&self) -> &HomepageCache {
        &self.inner.homepage
    }

    /// Cancelled when the server starts shutting down.
    #[must_use]
    pub fn shutdown(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    // Repositories and services borrow from the state for one request.

    #[must_use]
    pub fn catalog(&self) -> CatalogRepository<'_> {
        CatalogRepository::new(&self.inner.pool)
    }

    #[must_use]
    pub fn addresses(&self) -> AddressRepository<'_> {
        AddressRepository::new(&self.inner.pool)
    }

    #[must_use]
    pub fn order_records(&self) -> OrderRepository<'_> {
        OrderRepository::new(&self.inner.pool)
    }

    #[must_use]
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.inner.pool)
    }

    #[must_use]
    pub fn auth(&self) -> AuthService<'_> {
        AuthService::new(&self.inner.pool, &self.inner.tokens)
    }

    #[must_use]
    pub fn cart(&self) -> CartService<'_, CatalogRepository<'_>> {
        CartService::new(self.carts(), self.catalog())
    }

    #[must_use]
    pub fn orders(&self) -> OrderService<'_> {
        OrderService::new(&self.inner.pool, self.carts(), self.inner.config.shipping_fee)
    }

    #[must_use]
    pub fn payments(&self) -> PaymentService<'_> {
        PaymentService::new(
            OrderRepository::new(&self.inner.pool),
            self.inner.gateway.as_deref(),
            self.inner.config.payment_poll,
            &self.inner.shutdown,
        )
    }
}
