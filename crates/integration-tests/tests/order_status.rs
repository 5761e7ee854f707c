//! Order status changes written by the repository.
//!
//! Every status the database moves an order through must be an edge that
//! `OrderStatus::can_transition_to` accepts.

#![allow(clippy::unwrap_used)]

use sqlx::PgPool;

use freshmart_core::{Money, OrderId, OrderStatus, SkuId, UserId};
use freshmart_integration_tests::{create_sku, create_user};
use freshmart_storefront::db::{OrderRepository, RepositoryError};
use freshmart_storefront::services::orders::{CommitForm, OrderService};
use freshmart_storefront::store::{CartStore, MemoryStore};

async fn committed_order(pool: &PgPool) -> (UserId, OrderId, SkuId) {
    let (user, address) = create_user(pool, "carol").await;
    let sku = create_sku(pool, "kiwi", 8, 10).await;

    let carts = MemoryStore::new();
    carts.set(user, sku, 1).await.unwrap();

    let form = CommitForm {
        addr_id: Some(address.to_string()),
        pay_method: Some("3".to_string()),
        sku_ids: Some(sku.to_string()),
    };
    let order_id = OrderService::new(pool, &carts, Money::from_units(10))
        .commit(user, &form)
        .await
        .unwrap();
    (user, order_id, sku)
}

async fn status_of(pool: &PgPool, user: UserId, order_id: OrderId) -> OrderStatus {
    OrderRepository::new(pool)
        .get_owned(user, order_id)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_pay_then_review_follows_state_machine(pool: PgPool) {
    let (user, order_id, sku) = committed_order(&pool).await;
    let orders = OrderRepository::new(&pool);

    let before = status_of(&pool, user, order_id).await;
    assert_eq!(before, OrderStatus::Unpaid);

    assert!(orders.mark_paid(user, order_id, "T1").await.unwrap());
    let paid = status_of(&pool, user, order_id).await;
    assert_eq!(paid, OrderStatus::Paid);
    assert!(before.can_transition_to(paid));

    orders
        .save_comments(order_id, &[(sku, "sweet".to_string())])
        .await
        .unwrap();
    let reviewed = status_of(&pool, user, order_id).await;
    assert_eq!(reviewed, OrderStatus::Reviewed);
    assert!(paid.can_transition_to(reviewed));
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_unpaid_order_cannot_be_reviewed(pool: PgPool) {
    let (user, order_id, sku) = committed_order(&pool).await;

    let result = OrderRepository::new(&pool)
        .save_comments(order_id, &[(sku, "too early".to_string())])
        .await;

    assert!(matches!(result, Err(RepositoryError::NotFound)));
    assert_eq!(status_of(&pool, user, order_id).await, OrderStatus::Unpaid);

    let comment: String =
        sqlx::query_scalar("SELECT comment FROM shop.order_goods WHERE order_id = $1")
            .bind(order_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(comment, "");
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_mark_paid_only_from_states_that_lead_to_paid(pool: PgPool) {
    let (user, order_id, sku) = committed_order(&pool).await;
    let orders = OrderRepository::new(&pool);

    sqlx::query("UPDATE shop.order_info SET status = 'paid_pending' WHERE order_id = $1")
        .bind(order_id)
        .execute(&pool)
        .await
        .unwrap();
    assert!(orders.mark_paid(user, order_id, "T2").await.unwrap());

    // Already paid
    assert!(!orders.mark_paid(user, order_id, "T3").await.unwrap());

    orders
        .save_comments(order_id, &[(sku, "ok".to_string())])
        .await
        .unwrap();
    assert!(!orders.mark_paid(user, order_id, "T4").await.unwrap());
    assert_eq!(status_of(&pool, user, order_id).await, OrderStatus::Reviewed);

    let trade_no: Option<String> =
        sqlx::query_scalar("SELECT trade_no FROM shop.order_info WHERE order_id = $1")
            .bind(order_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(trade_no.as_deref(), Some("T2"));
}
