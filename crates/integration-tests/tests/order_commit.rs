//! Order commit against a real database.
//!
//! Stock is reserved with a conditional update inside the order transaction,
//! so these tests check what is visible after a commit succeeds, fails, or
//! races another commit for the same SKU.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use sqlx::PgPool;
use tokio::task::JoinSet;

use freshmart_core::{AddressId, Money, SkuId};
use freshmart_integration_tests::{create_sku, create_user, order_row_counts, stock_and_sales};
use freshmart_storefront::db::OrderRepository;
use freshmart_storefront::services::orders::{CommitForm, OrderError, OrderService};
use freshmart_storefront::store::{CartStore, MemoryStore};

const SHIPPING: i64 = 10;

fn alipay_form(address: AddressId, skus: &[SkuId]) -> CommitForm {
    CommitForm {
        addr_id: Some(address.to_string()),
        pay_method: Some("3".to_string()),
        sku_ids: Some(
            skus.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

// =============================================================================
// Single commits
// =============================================================================

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_commit_reserves_stock_and_clears_cart(pool: PgPool) {
    let (user, address) = create_user(&pool, "alice").await;
    let sku = create_sku(&pool, "strawberry", 12, 5).await;

    let carts = MemoryStore::new();
    carts.set(user, sku, 2).await.unwrap();

    let service = OrderService::new(&pool, &carts, Money::from_units(SHIPPING));
    let order_id = service.commit(user, &alipay_form(address, &[sku])).await.unwrap();

    assert_eq!(stock_and_sales(&pool, sku).await, (3, 2));
    assert!(carts.lines(user).await.unwrap().is_empty());

    let orders = OrderRepository::new(&pool);
    let order = orders.get_owned(user, order_id).await.unwrap().unwrap();
    assert_eq!(order.total_count, 2);
    assert_eq!(order.total_price, Money::from_units(24));
    assert_eq!(order.total_pay(), Money::from_units(24 + SHIPPING));

    let lines = orders.lines(order_id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].count, 2);
    assert_eq!(lines[0].amount, Money::from_units(24));
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_commit_over_stock_changes_nothing(pool: PgPool) {
    let (user, address) = create_user(&pool, "bob").await;
    let sku = create_sku(&pool, "kiwi", 8, 5).await;

    let carts = MemoryStore::new();
    carts.set(user, sku, 6).await.unwrap();

    let service = OrderService::new(&pool, &carts, Money::from_units(SHIPPING));
    let err = service
        .commit(user, &alipay_form(address, &[sku]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::OutOfStock(id) if id == sku));
    assert_eq!(stock_and_sales(&pool, sku).await, (5, 0));
    assert_eq!(order_row_counts(&pool).await, (0, 0));
    assert_eq!(carts.count(user, sku).await.unwrap(), Some(6));
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_commit_is_all_or_nothing(pool: PgPool) {
    let (user, address) = create_user(&pool, "carol").await;
    let plenty = create_sku(&pool, "apple", 5, 10).await;
    let scarce = create_sku(&pool, "durian", 90, 1).await;

    let carts = MemoryStore::new();
    carts.set(user, plenty, 3).await.unwrap();
    carts.set(user, scarce, 2).await.unwrap();

    let service = OrderService::new(&pool, &carts, Money::from_units(SHIPPING));
    let err = service
        .commit(user, &alipay_form(address, &[plenty, scarce]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::OutOfStock(id) if id == scarce));
    // The first line's reservation was rolled back with the order
    assert_eq!(stock_and_sales(&pool, plenty).await, (10, 0));
    assert_eq!(stock_and_sales(&pool, scarce).await, (1, 0));
    assert_eq!(order_row_counts(&pool).await, (0, 0));
    assert_eq!(carts.lines(user).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_commit_removes_only_committed_lines(pool: PgPool) {
    let (user, address) = create_user(&pool, "dave").await;
    let bought = create_sku(&pool, "grape", 20, 10).await;
    let kept = create_sku(&pool, "lemon", 3, 10).await;

    let carts = MemoryStore::new();
    carts.set(user, bought, 1).await.unwrap();
    carts.set(user, kept, 4).await.unwrap();

    let service = OrderService::new(&pool, &carts, Money::from_units(SHIPPING));
    service
        .commit(user, &alipay_form(address, &[bought]))
        .await
        .unwrap();

    assert_eq!(carts.lines(user).await.unwrap(), vec![(kept, 4)]);
    assert_eq!(stock_and_sales(&pool, kept).await, (10, 0));
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_commit_rejects_foreign_address(pool: PgPool) {
    let (user, _) = create_user(&pool, "erin").await;
    let (_, other_address) = create_user(&pool, "frank").await;
    let sku = create_sku(&pool, "melon", 15, 3).await;

    let carts = MemoryStore::new();
    carts.set(user, sku, 1).await.unwrap();

    let service = OrderService::new(&pool, &carts, Money::from_units(SHIPPING));
    let err = service
        .commit(user, &alipay_form(other_address, &[sku]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::InvalidAddress));
    assert_eq!(order_row_counts(&pool).await, (0, 0));
}

// =============================================================================
// Concurrent commits
// =============================================================================

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_concurrent_commits_for_last_unit(pool: PgPool) {
    let (first, first_address) = create_user(&pool, "gina").await;
    let (second, second_address) = create_user(&pool, "hank").await;
    let sku = create_sku(&pool, "mango", 9, 1).await;

    let carts = MemoryStore::new();
    carts.set(first, sku, 1).await.unwrap();
    carts.set(second, sku, 1).await.unwrap();

    let service = OrderService::new(&pool, &carts, Money::from_units(SHIPPING));
    let first_form = alipay_form(first_address, &[sku]);
    let second_form = alipay_form(second_address, &[sku]);
    let (a, b) = tokio::join!(
        service.commit(first, &first_form),
        service.commit(second, &second_form),
    );

    let results = [a, b];
    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1, "exactly one commit gets the last unit");

    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(e, OrderError::OutOfStock(_) | OrderError::Conflict(_)),
                "unexpected error: {e}"
            );
        }
    }

    assert_eq!(stock_and_sales(&pool, sku).await, (0, 1));
    assert_eq!(order_row_counts(&pool).await, (1, 1));
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_concurrent_commits_never_lose_updates(pool: PgPool) {
    const BUYERS: usize = 6;
    let sku = create_sku(&pool, "peach", 4, 20).await;

    let carts = Arc::new(MemoryStore::new());
    let mut buyers = Vec::new();
    for i in 0..BUYERS {
        let (user, address) = create_user(&pool, &format!("buyer{i}")).await;
        carts.set(user, sku, 3).await.unwrap();
        buyers.push((user, alipay_form(address, &[sku])));
    }

    let mut commits = JoinSet::new();
    for (user, form) in buyers {
        let pool = pool.clone();
        let carts = Arc::clone(&carts);
        commits.spawn(async move {
            OrderService::new(&pool, carts.as_ref(), Money::from_units(SHIPPING))
                .commit(user, &form)
                .await
                .is_ok()
        });
    }

    let mut won = 0;
    while let Some(result) = commits.join_next().await {
        if result.unwrap() {
            won += 1;
        }
    }

    // 20 units, 3 per buyer: at most 6 orders fit
    let (stock, sales) = stock_and_sales(&pool, sku).await;
    assert!(won >= 1);
    assert!(stock >= 0);
    assert_eq!(sales, won * 3);
    assert_eq!(stock, 20 - won * 3);
}
