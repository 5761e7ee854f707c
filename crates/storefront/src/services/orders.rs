//! Order placement and the inventory-safe commit.
//!
//! # Commit
//!
//! An order is written in one transaction. Stock is reserved per line with an
//! optimistic compare-and-swap: read `stock`, then
//! `UPDATE ... WHERE id = $1 AND stock = <value read>`. Zero affected rows
//! means another commit got there first, so the line is retried after a short
//! linear backoff, up to [`COMMIT_ATTEMPTS`] times.
//!
//! | code | meaning |
//! |------|---------|
//! | 1 | missing fields |
//! | 2 | unknown payment method |
//! | 3 | address missing or not the user's |
//! | 4 | SKU not found |
//! | 5 | not enough stock |
//! | 6 | success |
//! | 7 | commit failed |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;

use freshmart_core::{AddressId, Money, OrderId, Paginator, PayMethod, SkuId, UserId};

use crate::db::orders::{NewOrder, OrderWriter, SkuStock};
use crate::db::{AddressRepository, CatalogRepository, OrderRepository, RepositoryError};
use crate::error::{ApiReply, AppError};
use crate::models::{Address, CartLineView, OrderView};
use crate::store::{CartStore, CartStoreError};

/// Reservation attempts per order line.
pub const COMMIT_ATTEMPTS: u32 = 3;

/// Base backoff between attempts; attempt `n` waits `n * COMMIT_BACKOFF`.
pub const COMMIT_BACKOFF: Duration = Duration::from_millis(10);

/// Code of a successful commit.
pub const COMMIT_OK: u8 = 6;

/// Orders shown per page in the user center.
pub const ORDERS_PER_PAGE: u32 = 2;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("missing fields")]
    MissingFields,

    #[error("unsupported payment method")]
    InvalidPayMethod,

    #[error("invalid address")]
    InvalidAddress,

    #[error("sku {0} not found")]
    SkuNotFound(SkuId),

    #[error("sku {0} out of stock")]
    OutOfStock(SkuId),

    #[error("sku {0} is not in the cart")]
    NotInCart(SkuId),

    #[error("stock of sku {0} kept changing")]
    Conflict(SkuId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Store(#[from] CartStoreError),
}

impl From<sqlx::Error> for OrderError {
    fn from(e: sqlx::Error) -> Self {
        Self::Repository(e.into())
    }
}

impl OrderError {
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::MissingFields => 1,
            Self::InvalidPayMethod => 2,
            Self::InvalidAddress => 3,
            Self::SkuNotFound(_) => 4,
            Self::OutOfStock(_) => 5,
            Self::NotInCart(_) | Self::Conflict(_) | Self::Repository(_) | Self::Store(_) => 7,
        }
    }

    /// Every commit failure is answered with a code. Infrastructure failures
    /// are still reported to Sentry.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` matches the other services' replies.
    pub fn into_reply(self) -> Result<ApiReply, AppError> {
        let message = match &self {
            Self::MissingFields => "missing fields",
            Self::InvalidPayMethod => "unsupported payment method",
            Self::InvalidAddress => "invalid address",
            Self::SkuNotFound(_) => "product does not exist",
            Self::OutOfStock(_) => "not enough stock",
            Self::NotInCart(_) | Self::Conflict(_) => "order failed, please try again",
            Self::Repository(_) | Self::Store(_) => {
                let event_id = sentry::capture_error(&self);
                tracing::error!(error = %self, sentry_event_id = %event_id, "Order commit error");
                "order failed, please try again"
            }
        };
        Ok(ApiReply::error(self.code(), message))
    }
}

// =============================================================================
// Stock reservation
// =============================================================================

/// Outcome of a single reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Stock was decremented; carries the snapshot the swap was based on.
    Reserved(SkuStock),
    /// No such SKU.
    Missing,
    /// Fewer units in stock than requested.
    Insufficient,
    /// Stock changed between the read and the swap.
    Conflict,
}

/// Why a reservation gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum ReserveError<E> {
    NotFound,
    OutOfStock,
    Conflict,
    Failed(E),
}

/// One compare-and-swap attempt against a SKU's stock.
#[async_trait]
pub trait StockReserver: Send {
    type Error: Send;

    async fn try_reserve(&mut self, sku: SkuId, count: i32) -> Result<Attempt, Self::Error>;
}

#[async_trait]
impl StockReserver for OrderWriter<'_> {
    type Error = RepositoryError;

    async fn try_reserve(&mut self, sku: SkuId, count: i32) -> Result<Attempt, RepositoryError> {
        let Some(seen) = self.read_stock(sku).await? else {
            return Ok(Attempt::Missing);
        };
        if count > seen.stock {
            return Ok(Attempt::Insufficient);
        }

        let swapped = self
            .swap_stock(sku, seen.stock, seen.stock - count, seen.sales + count)
            .await?;
        Ok(if swapped {
            Attempt::Reserved(seen)
        } else {
            Attempt::Conflict
        })
    }
}

/// Reserve `count` units of `sku`, retrying on shortage or a lost race.
///
/// A missing SKU fails at once. Shortage and conflicts are retried until
/// `attempts` runs out; the last attempt's outcome decides the error.
///
/// # Errors
///
/// Returns the reason the reservation gave up, or the reserver's own error.
pub async fn reserve_with_retry<R: StockReserver>(
    reserver: &mut R,
    sku: SkuId,
    count: i32,
    attempts: u32,
    backoff: Duration,
) -> Result<SkuStock, ReserveError<R::Error>> {
    let mut attempt = 1;
    loop {
        let outcome = reserver
            .try_reserve(sku, count)
            .await
            .map_err(ReserveError::Failed)?;
        let last = attempt >= attempts;

        match outcome {
            Attempt::Reserved(stock) => return Ok(stock),
            Attempt::Missing => return Err(ReserveError::NotFound),
            Attempt::Insufficient if last => return Err(ReserveError::OutOfStock),
            Attempt::Conflict if last => return Err(ReserveError::Conflict),
            retry @ (Attempt::Insufficient | Attempt::Conflict) => {
                tracing::debug!(sku_id = %sku, attempt, outcome = ?retry, "Retrying stock reservation");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
        }
    }
}

impl From<(SkuId, ReserveError<RepositoryError>)> for OrderError {
    fn from((sku, err): (SkuId, ReserveError<RepositoryError>)) -> Self {
        match err {
            ReserveError::NotFound => Self::SkuNotFound(sku),
            ReserveError::OutOfStock => Self::OutOfStock(sku),
            ReserveError::Conflict => Self::Conflict(sku),
            ReserveError::Failed(e) => Self::Repository(e),
        }
    }
}

// =============================================================================
// Forms
// =============================================================================

/// The commit form as posted by the checkout page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitForm {
    pub addr_id: Option<String>,
    pub pay_method: Option<String>,
    /// Comma-separated SKU ids
    pub sku_ids: Option<String>,
}

/// A commit request that passed field validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub addr_id: AddressId,
    pub pay_method: PayMethod,
    pub sku_ids: Vec<SkuId>,
}

impl CommitForm {
    /// Check presence, then the payment method, then the ids' shape.
    ///
    /// Repeated SKU ids collapse to one line.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as an `OrderError`.
    pub fn validate(&self) -> Result<CommitRequest, OrderError> {
        let (Some(addr_id), Some(pay_method), Some(sku_ids)) = (
            present(self.addr_id.as_deref()),
            present(self.pay_method.as_deref()),
            present(self.sku_ids.as_deref()),
        ) else {
            return Err(OrderError::MissingFields);
        };

        let pay_method = pay_method
            .parse::<PayMethod>()
            .map_err(|_| OrderError::InvalidPayMethod)?;

        let addr_id = addr_id
            .parse::<AddressId>()
            .map_err(|_| OrderError::InvalidAddress)?;

        let mut ids = Vec::new();
        for raw in sku_ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let id = raw
                .parse::<SkuId>()
                .map_err(|_| OrderError::SkuNotFound(SkuId::new(0)))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Err(OrderError::MissingFields);
        }

        Ok(CommitRequest {
            addr_id,
            pay_method,
            sku_ids: ids,
        })
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse the review form: `total_count`, then `sku_N` and `content_N` for
/// `N` in `1..=total_count`. A missing comment is stored as empty.
#[must_use]
pub fn parse_comments(form: &HashMap<String, String>) -> Option<Vec<(SkuId, String)>> {
    let total: usize = form.get("total_count")?.trim().parse().ok()?;

    (1..=total)
        .map(|i| {
            let sku = form.get(&format!("sku_{i}"))?.parse::<SkuId>().ok()?;
            let content = form
                .get(&format!("content_{i}"))
                .map(|c| c.trim().to_string())
                .unwrap_or_default();
            Some((sku, content))
        })
        .collect()
}

// =============================================================================
// Service
// =============================================================================

/// What the checkout page shows before committing.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub lines: Vec<CartLineView>,
    pub total_count: i32,
    pub total_price: Money,
    pub transit_price: Money,
    pub total_pay: Money,
    pub addresses: Vec<Address>,
    /// Ids to post back to the commit endpoint, comma-separated
    pub sku_ids: String,
}

/// One page of a user's order history.
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<OrderView>,
    pub page: u32,
    pub num_pages: u32,
    pub pages: Vec<u32>,
}

/// Order service.
pub struct OrderService<'a> {
    pool: &'a PgPool,
    carts: &'a dyn CartStore,
    shipping_fee: Money,
}

impl<'a> OrderService<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool, carts: &'a dyn CartStore, shipping_fee: Money) -> Self {
        Self {
            pool,
            carts,
            shipping_fee,
        }
    }

    /// Build the checkout summary for the selected cart lines.
    ///
    /// Ids that are unknown or no longer in the cart are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the database or cart store fails.
    pub async fn checkout(&self, user: UserId, sku_ids: &[SkuId]) -> Result<Checkout, OrderError> {
        let skus = CatalogRepository::new(self.pool).skus_by_ids(sku_ids).await?;

        let mut lines = Vec::with_capacity(skus.len());
        for sku in skus {
            match self.carts.count(user, sku.id).await? {
                Some(count) if count > 0 => lines.push(CartLineView::new(sku, count)),
                _ => tracing::debug!(sku_id = %sku.id, "Skipping SKU not in cart"),
            }
        }

        let total_count = lines.iter().map(|l| l.count).sum();
        let total_price: Money = lines.iter().map(|l| l.amount).sum();
        let addresses = AddressRepository::new(self.pool).list_for(user).await?;
        let sku_ids = lines
            .iter()
            .map(|l| l.sku.id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        Ok(Checkout {
            lines,
            total_count,
            total_price,
            transit_price: self.shipping_fee,
            total_pay: total_price + self.shipping_fee,
            addresses,
            sku_ids,
        })
    }

    /// Create an order from cart lines, reserving stock for each.
    ///
    /// Either the whole order is written and the committed SKUs leave the
    /// cart, or nothing changes.
    ///
    /// # Errors
    ///
    /// Returns an `OrderError` whose [`OrderError::code`] is the reply code.
    #[tracing::instrument(skip_all, fields(user_id = %user))]
    pub async fn commit(&self, user: UserId, form: &CommitForm) -> Result<OrderId, OrderError> {
        let request = form.validate()?;

        AddressRepository::new(self.pool)
            .get_owned(user, request.addr_id)
            .await?
            .ok_or(OrderError::InvalidAddress)?;

        let order_id = OrderId::generate();
        let mut tx = self.pool.begin().await?;

        match self.write_order(&mut tx, user, order_id, &request).await {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                tracing::info!(order_id = %order_id, error = %e, "Order commit rejected");
                return Err(e);
            }
        }

        // The order exists now; a stale cart line is only cosmetic
        if let Err(e) = self.carts.remove(user, &request.sku_ids).await {
            tracing::error!(order_id = %order_id, error = %e, "Failed to clear committed cart lines");
        }

        tracing::info!(order_id = %order_id, lines = request.sku_ids.len(), "Order committed");
        Ok(order_id)
    }

    async fn write_order(
        &self,
        conn: &mut PgConnection,
        user: UserId,
        order_id: OrderId,
        request: &CommitRequest,
    ) -> Result<(), OrderError> {
        let mut writer = OrderWriter::new(conn);
        writer
            .insert_order(&NewOrder {
                order_id,
                user_id: user,
                address_id: request.addr_id,
                pay_method: request.pay_method,
                transit_price: self.shipping_fee,
            })
            .await?;

        let mut total_count = 0;
        let mut total_price = Money::ZERO;

        for &sku_id in &request.sku_ids {
            let Some(count) = self.carts.count(user, sku_id).await?.filter(|c| *c > 0) else {
                if writer.read_stock(sku_id).await?.is_none() {
                    return Err(OrderError::SkuNotFound(sku_id));
                }
                return Err(OrderError::NotInCart(sku_id));
            };

            let sku = reserve_with_retry(&mut writer, sku_id, count, COMMIT_ATTEMPTS, COMMIT_BACKOFF)
                .await
                .map_err(|e| OrderError::from((sku_id, e)))?;

            writer.insert_line(order_id, sku_id, count, sku.price).await?;
            total_count += count;
            total_price += sku.price.times(count);
        }

        writer.set_totals(order_id, total_count, total_price).await?;
        Ok(())
    }

    /// A page of the user's orders, newest first.
    ///
    /// Out-of-range pages fall back to the first page.
    ///
    /// # Errors
    ///
    /// Returns an error if the database fails.
    pub async fn history(&self, user: UserId, page: u32) -> Result<OrderPage, RepositoryError> {
        let orders = OrderRepository::new(self.pool);
        let paginator = Paginator::new(orders.count_for_user(user).await?, ORDERS_PER_PAGE);
        let page = paginator.clamp_page(page);

        let infos = orders
            .page_for_user(user, i64::from(ORDERS_PER_PAGE), paginator.offset(page))
            .await?;

        let mut views = Vec::with_capacity(infos.len());
        for info in infos {
            let lines = orders.lines(info.order_id).await?;
            views.push(OrderView::new(info, lines));
        }

        Ok(OrderPage {
            orders: views,
            page,
            num_pages: paginator.num_pages(),
            pages: paginator.window(page),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use rust_decimal::Decimal;
    use tokio::time::Instant;

    use super::*;

    struct Scripted {
        outcomes: VecDeque<Attempt>,
        calls: u32,
    }

    impl Scripted {
        fn new(outcomes: impl IntoIterator<Item = Attempt>) -> Self {
            Self {
                outcomes: outcomes.into_iter().collect(),
                calls: 0,
            }
        }
    }

    #[async_trait]
    impl StockReserver for Scripted {
        type Error = &'static str;

        async fn try_reserve(&mut self, _sku: SkuId, _count: i32) -> Result<Attempt, Self::Error> {
            self.calls += 1;
            self.outcomes.pop_front().ok_or("script exhausted")
        }
    }

    fn snapshot(stock: i32) -> SkuStock {
        SkuStock {
            id: SkuId::new(1),
            name: "Strawberries".to_string(),
            price: Money::new(Decimal::new(1990, 2)),
            stock,
            sales: 0,
        }
    }

    async fn reserve(script: &mut Scripted) -> Result<SkuStock, ReserveError<&'static str>> {
        reserve_with_retry(script, SkuId::new(1), 2, COMMIT_ATTEMPTS, COMMIT_BACKOFF).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_first_try() {
        let mut script = Scripted::new([Attempt::Reserved(snapshot(5))]);
        let started = Instant::now();
        assert_eq!(reserve(&mut script).await.unwrap().stock, 5);
        assert_eq!(script.calls, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_retries_conflict_with_linear_backoff() {
        let mut script = Scripted::new([
            Attempt::Conflict,
            Attempt::Conflict,
            Attempt::Reserved(snapshot(3)),
        ]);
        let started = Instant::now();
        assert!(reserve(&mut script).await.is_ok());
        assert_eq!(script.calls, 3);
        assert_eq!(started.elapsed(), COMMIT_BACKOFF * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_gives_up_after_conflicts() {
        let mut script = Scripted::new([Attempt::Conflict, Attempt::Conflict, Attempt::Conflict]);
        assert_eq!(reserve(&mut script).await, Err(ReserveError::Conflict));
        assert_eq!(script.calls, COMMIT_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_out_of_stock_on_last_attempt() {
        let mut script = Scripted::new([
            Attempt::Insufficient,
            Attempt::Conflict,
            Attempt::Insufficient,
        ]);
        assert_eq!(reserve(&mut script).await, Err(ReserveError::OutOfStock));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_missing_sku_fails_immediately() {
        let mut script = Scripted::new([Attempt::Missing, Attempt::Reserved(snapshot(1))]);
        assert_eq!(reserve(&mut script).await, Err(ReserveError::NotFound));
        assert_eq!(script.calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_propagates_reserver_error() {
        let mut script = Scripted::new(Vec::<Attempt>::new());
        assert_eq!(
            reserve(&mut script).await,
            Err(ReserveError::Failed("script exhausted"))
        );
    }

    fn commit_form(addr: &str, pay: &str, skus: &str) -> CommitForm {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        CommitForm {
            addr_id: opt(addr),
            pay_method: opt(pay),
            sku_ids: opt(skus),
        }
    }

    #[test]
    fn test_commit_form_validation_order() {
        assert!(matches!(
            commit_form("", "3", "1").validate(),
            Err(OrderError::MissingFields)
        ));
        assert!(matches!(
            commit_form("4", "  ", "1").validate(),
            Err(OrderError::MissingFields)
        ));
        assert!(matches!(
            commit_form("x", "9", "1").validate(),
            Err(OrderError::InvalidPayMethod)
        ));
        assert!(matches!(
            commit_form("x", "3", "1").validate(),
            Err(OrderError::InvalidAddress)
        ));
        assert!(matches!(
            commit_form("4", "3", "1,abc").validate(),
            Err(OrderError::SkuNotFound(_))
        ));
        assert!(matches!(
            commit_form("4", "3", " , ").validate(),
            Err(OrderError::MissingFields)
        ));
    }

    #[test]
    fn test_commit_form_dedups_sku_ids() {
        let request = commit_form("4", "3", "3, 1,3").validate().unwrap();
        assert_eq!(request.addr_id, AddressId::new(4));
        assert_eq!(request.pay_method, PayMethod::Alipay);
        assert_eq!(request.sku_ids, vec![SkuId::new(3), SkuId::new(1)]);
    }

    #[test]
    fn test_error_codes() {
        let sku = SkuId::new(1);
        assert_eq!(OrderError::MissingFields.code(), 1);
        assert_eq!(OrderError::InvalidPayMethod.code(), 2);
        assert_eq!(OrderError::InvalidAddress.code(), 3);
        assert_eq!(OrderError::SkuNotFound(sku).code(), 4);
        assert_eq!(OrderError::OutOfStock(sku).code(), 5);
        assert_eq!(OrderError::Conflict(sku).code(), 7);
        assert_eq!(OrderError::NotInCart(sku).code(), 7);
        assert_eq!(
            OrderError::Repository(RepositoryError::NotFound).code(),
            7
        );
    }

    #[test]
    fn test_reserve_error_maps_to_order_error() {
        let sku = SkuId::new(9);
        assert!(matches!(
            OrderError::from((sku, ReserveError::OutOfStock)),
            OrderError::OutOfStock(s) if s == sku
        ));
        assert!(matches!(
            OrderError::from((sku, ReserveError::Conflict)),
            OrderError::Conflict(_)
        ));
    }

    #[test]
    fn test_parse_comments() {
        let form: HashMap<String, String> = [
            ("total_count", "2"),
            ("sku_1", "5"),
            ("content_1", " fresh "),
            ("sku_2", "8"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(
            parse_comments(&form).unwrap(),
            vec![
                (SkuId::new(5), "fresh".to_string()),
                (SkuId::new(8), String::new())
            ]
        );
    }

    #[test]
    fn test_parse_comments_rejects_missing_sku() {
        let form: HashMap<String, String> = [("total_count", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(parse_comments(&form).is_none());
    }
}
