//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /                          - Home page (also /index)
//!
//! # Catalog
//! GET  /goods/{sku_id}            - SKU detail
//! GET  /list/{category_id}/{page} - Category listing (?sort=default|price|hot)
//!
//! # Cart (JSON, requires auth)
//! GET  /cart/                     - Cart page
//! POST /cart/add                  - Add to cart
//! POST /cart/update               - Replace a line's quantity
//! POST /cart/delete               - Remove a line
//!
//! # Orders (requires auth)
//! POST /order/place               - Checkout page
//! POST /order/commit              - Create the order (JSON)
//! POST /order/pay                 - Alipay page-pay URL (JSON)
//! POST /order/check               - Wait for payment to settle (JSON)
//! GET  /order/comment/{order_id}  - Review form
//! POST /order/comment/{order_id}  - Save reviews
//!
//! # Account
//! GET  /user/register             - Register page
//! POST /user/register             - Register action
//! GET  /user/active/{token}       - Follow the activation link
//! GET  /user/login                - Login page
//! POST /user/login                - Login action
//! GET  /user/logout               - Logout
//! GET  /user/                     - User center (requires auth)
//! GET  /user/order/{page}         - Order history (requires auth)
//! GET  /user/address              - Address page (requires auth)
//! POST /user/address              - Add an address (requires auth)
//! ```

pub mod account;
pub mod auth;
pub mod cart;
pub mod goods;
pub mod home;
pub mod orders;

use axum::{
    Router,
    routing::{get, post},
};

use crate::models::CurrentUser;
use crate::state::AppState;
use crate::store::CartStoreError;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/delete", post(cart::delete))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/place", post(orders::place))
        .route("/commit", post(orders::commit))
        .route("/pay", post(orders::pay))
        .route("/check", post(orders::check))
        .route(
            "/comment/{order_id}",
            get(orders::comment_page).post(orders::comment),
        )
}

/// Create the user routes router.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/register", get(auth::register_page).post(auth::register))
        .route("/active/{token}", get(auth::activate))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", get(auth::logout))
        .route("/order/{page}", get(account::orders))
        .route(
            "/address",
            get(account::address_page).post(account::add_address),
        )
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home::index))
        .route("/index", get(home::index))
        .route("/goods/{sku_id}", get(goods::detail))
        .route("/list/{category_id}/{page}", get(goods::list))
        // Trailing-slash pages sit outside their nests
        .route("/cart/", get(cart::show))
        .route("/user/", get(account::info))
        .nest("/cart", cart_routes())
        .nest("/order", order_routes())
        .nest("/user", user_routes())
}

/// What every page header shows: who is logged in and how many lines are
/// in their cart.
#[derive(Debug, Clone, Default)]
pub struct PageHeader {
    pub user: Option<CurrentUser>,
    pub cart_count: usize,
}

impl PageHeader {
    /// # Errors
    ///
    /// Returns an error if the cart store is unreachable.
    pub async fn load(
        state: &AppState,
        user: Option<CurrentUser>,
    ) -> Result<Self, CartStoreError> {
        let cart_count = match &user {
            Some(user) => state.carts().line_count(user.id).await?,
            None => 0,
        };
        Ok(Self { user, cart_count })
    }

    #[must_use]
    pub fn username(&self) -> &str {
        self.user.as_ref().map_or("", |u| u.username.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use sqlx::postgres::PgPoolOptions;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use tower_sessions::{MemoryStore as SessionMemoryStore, SessionManagerLayer};

    use super::*;
    use crate::config::test_config;
    use crate::services::catalog::HomepageCache;
    use crate::services::events::EventBus;
    use crate::services::tasks::TaskQueue;
    use crate::state::StateParts;
    use crate::store::MemoryStore;

    /// The storefront router over stores that never touch the network.
    fn app() -> Router {
        let config = test_config();
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/test")
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let (tasks, _rx) = TaskQueue::new();

        let state = AppState::new(StateParts {
            config,
            pool,
            carts: store.clone(),
            history: store,
            gateway: None,
            tasks,
            events: EventBus::default(),
            homepage: HomepageCache::new(),
            shutdown: CancellationToken::new(),
        });

        routes()
            .layer(SessionManagerLayer::new(SessionMemoryStore::default()))
            .with_state(state)
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_cart_page_redirects_anonymous_visitor() {
        let response = app()
            .oneshot(Request::get("/cart/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert_eq!(location, "/user/login?next=%2Fcart%2F");
    }

    #[tokio::test]
    async fn test_json_endpoints_answer_res_zero_when_logged_out() {
        for uri in ["/cart/add", "/order/commit", "/order/pay"] {
            let response = app()
                .oneshot(
                    Request::post(uri)
                        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                        .body(Body::from("sku_id=1&count=1"))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
            assert_eq!(json["res"], 0, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_login_page_prefills_remembered_username() {
        let response = app()
            .oneshot(
                Request::get("/user/login?next=/user/")
                    .header(header::COOKIE, "username=alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains(r#"value="alice""#));
        assert!(html.contains("/user/login?next="));
    }

    #[tokio::test]
    async fn test_register_page_renders() {
        let response = app()
            .oneshot(Request::get("/user/register").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains(r#"name="user_name""#));
    }

    #[tokio::test]
    async fn test_unknown_sku_goes_home() {
        let response = app()
            .oneshot(Request::get("/goods/abc").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
    }
}
