//! Cart operations with stock-bound validation.
//!
//! Every mutation validates its input in a fixed order and stops at the first
//! failure, so each failure has its own `res` code. Add and update share one
//! table:
//!
//! | code | meaning |
//! |------|---------|
//! | 1 | missing fields |
//! | 2 | count is not a positive integer |
//! | 3 | SKU not found |
//! | 4 | not enough stock |
//! | 5 | success |
//!
//! Delete has its own:
//!
//! | code | meaning |
//! |------|---------|
//! | 1 | missing SKU id |
//! | 2 | SKU not found |
//! | 3 | success |

use async_trait::async_trait;
use thiserror::Error;

use freshmart_core::{SkuId, UserId};

use crate::db::{CatalogRepository, RepositoryError};
use crate::error::{ApiReply, AppError};
use crate::store::{CartStore, CartStoreError};

/// Code of a successful add or update.
pub const CART_OK: u8 = 5;

/// Code of a successful delete.
pub const DELETE_OK: u8 = 3;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("missing fields")]
    MissingFields,

    #[error("invalid count")]
    InvalidCount,

    #[error("sku not found")]
    SkuNotFound,

    #[error("insufficient stock")]
    InsufficientStock,

    #[error(transparent)]
    Store(#[from] CartStoreError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl CartError {
    /// Add/update `res` code for business-rule failures; `None` for
    /// infrastructure errors.
    #[must_use]
    pub const fn code(&self) -> Option<u8> {
        match self {
            Self::MissingFields => Some(1),
            Self::InvalidCount => Some(2),
            Self::SkuNotFound => Some(3),
            Self::InsufficientStock => Some(4),
            Self::Store(_) | Self::Repository(_) => None,
        }
    }

    /// Delete `res` code for business-rule failures.
    #[must_use]
    pub const fn delete_code(&self) -> Option<u8> {
        match self {
            Self::MissingFields => Some(1),
            Self::SkuNotFound => Some(2),
            Self::InvalidCount
            | Self::InsufficientStock
            | Self::Store(_)
            | Self::Repository(_) => None,
        }
    }

    /// Render an add/update failure as a reply, escalate infrastructure errors.
    ///
    /// # Errors
    ///
    /// Returns the infrastructure error as an `AppError`.
    pub fn into_reply(self) -> Result<ApiReply, AppError> {
        let code = self.code();
        self.reply_with(code)
    }

    /// Render a delete failure as a reply, escalate infrastructure errors.
    ///
    /// # Errors
    ///
    /// Returns the infrastructure error as an `AppError`.
    pub fn into_delete_reply(self) -> Result<ApiReply, AppError> {
        let code = self.delete_code();
        self.reply_with(code)
    }

    fn reply_with(self, code: Option<u8>) -> Result<ApiReply, AppError> {
        let code = code.unwrap_or_default();
        let message = match self {
            Self::MissingFields => "missing fields",
            Self::InvalidCount => "invalid quantity",
            Self::SkuNotFound => "product does not exist",
            Self::InsufficientStock => "not enough stock",
            Self::Store(e) => return Err(e.into()),
            Self::Repository(e) => return Err(e.into()),
        };
        Ok(ApiReply::error(code, message))
    }
}

/// Source of current stock levels.
#[async_trait]
pub trait StockLookup: Send + Sync {
    /// Stock of a SKU, or `None` if there is no such SKU.
    async fn stock_of(&self, sku: SkuId) -> Result<Option<i32>, RepositoryError>;
}

#[async_trait]
impl StockLookup for CatalogRepository<'_> {
    async fn stock_of(&self, sku: SkuId) -> Result<Option<i32>, RepositoryError> {
        self.sku_stock(sku).await
    }
}

/// A cart mutation as posted by the browser. Fields are raw strings so
/// missing and malformed values get distinct codes.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CartForm {
    pub sku_id: Option<String>,
    pub count: Option<String>,
}

/// Cart service over a store and a stock source.
pub struct CartService<'a, L> {
    store: &'a dyn CartStore,
    stock: L,
}

impl<'a, L: StockLookup> CartService<'a, L> {
    #[must_use]
    pub fn new(store: &'a dyn CartStore, stock: L) -> Self {
        Self { store, stock }
    }

    /// Add `count` to the cart line, creating it if needed.
    ///
    /// Returns the number of distinct SKUs now in the cart.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` with a code, or an infrastructure error.
    pub async fn add(&self, user: UserId, form: &CartForm) -> Result<usize, CartError> {
        let (sku_id, count) = parse_line(form)?;
        let stock = self.stock_for(sku_id).await?;

        let existing = self.store.count(user, sku_id).await?.unwrap_or(0);
        let wanted = existing.saturating_add(count);
        if wanted > stock {
            return Err(CartError::InsufficientStock);
        }

        self.store.set(user, sku_id, wanted).await?;
        Ok(self.store.line_count(user).await?)
    }

    /// Replace the quantity of a cart line.
    ///
    /// Returns the total quantity across all lines.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` with a code, or an infrastructure error.
    pub async fn update(&self, user: UserId, form: &CartForm) -> Result<i64, CartError> {
        let (sku_id, count) = parse_line(form)?;
        let stock = self.stock_for(sku_id).await?;

        if count > stock {
            return Err(CartError::InsufficientStock);
        }

        self.store.set(user, sku_id, count).await?;
        Ok(self.store.total_quantity(user).await?)
    }

    /// Remove a cart line.
    ///
    /// Returns the total quantity across the remaining lines.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` with a code, or an infrastructure error.
    pub async fn delete(&self, user: UserId, form: &CartForm) -> Result<i64, CartError> {
        let raw = non_empty(form.sku_id.as_deref()).ok_or(CartError::MissingFields)?;
        let sku_id = raw.parse::<SkuId>().map_err(|_| CartError::SkuNotFound)?;
        self.stock_for(sku_id).await?;

        self.store.remove(user, &[sku_id]).await?;
        Ok(self.store.total_quantity(user).await?)
    }

    async fn stock_for(&self, sku_id: SkuId) -> Result<i32, CartError> {
        self.stock
            .stock_of(sku_id)
            .await?
            .ok_or(CartError::SkuNotFound)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Validate presence, then the count, then the SKU id's shape.
fn parse_line(form: &CartForm) -> Result<(SkuId, i32), CartError> {
    let (Some(raw_sku), Some(raw_count)) = (
        non_empty(form.sku_id.as_deref()),
        non_empty(form.count.as_deref()),
    ) else {
        return Err(CartError::MissingFields);
    };

    let count = raw_count
        .parse::<i32>()
        .ok()
        .filter(|c| *c > 0)
        .ok_or(CartError::InvalidCount)?;

    // A non-numeric id can't name a SKU
    let sku_id = raw_sku.parse::<SkuId>().map_err(|_| CartError::SkuNotFound)?;

    Ok((sku_id, count))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::store::MemoryStore;

    const USER: UserId = UserId::new(7);

    struct FixedStock(HashMap<SkuId, i32>);

    #[async_trait]
    impl StockLookup for FixedStock {
        async fn stock_of(&self, sku: SkuId) -> Result<Option<i32>, RepositoryError> {
            Ok(self.0.get(&sku).copied())
        }
    }

    fn stock(pairs: &[(i32, i32)]) -> FixedStock {
        FixedStock(
            pairs
                .iter()
                .map(|(sku, stock)| (SkuId::new(*sku), *stock))
                .collect(),
        )
    }

    fn form(sku_id: Option<&str>, count: Option<&str>) -> CartForm {
        CartForm {
            sku_id: sku_id.map(String::from),
            count: count.map(String::from),
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CartError::MissingFields.code(), Some(1));
        assert_eq!(CartError::InvalidCount.code(), Some(2));
        assert_eq!(CartError::SkuNotFound.code(), Some(3));
        assert_eq!(CartError::InsufficientStock.code(), Some(4));
    }

    #[test]
    fn test_parse_line_order_of_checks() {
        assert!(matches!(
            parse_line(&form(Some("1"), None)),
            Err(CartError::MissingFields)
        ));
        assert!(matches!(
            parse_line(&form(Some(""), Some("2"))),
            Err(CartError::MissingFields)
        ));
        assert!(matches!(
            parse_line(&form(Some("abc"), Some("two"))),
            Err(CartError::InvalidCount)
        ));
        assert!(matches!(
            parse_line(&form(Some("1"), Some("0"))),
            Err(CartError::InvalidCount)
        ));
        assert!(matches!(
            parse_line(&form(Some("abc"), Some("2"))),
            Err(CartError::SkuNotFound)
        ));
        assert_eq!(
            parse_line(&form(Some(" 3 "), Some("2"))).unwrap(),
            (SkuId::new(3), 2)
        );
    }

    #[tokio::test]
    async fn test_add_accumulates_and_counts_lines() {
        let store = MemoryStore::new();
        let cart = CartService::new(&store, stock(&[(1, 10), (2, 10)]));

        assert_eq!(cart.add(USER, &form(Some("1"), Some("2"))).await.unwrap(), 1);
        assert_eq!(cart.add(USER, &form(Some("1"), Some("3"))).await.unwrap(), 1);
        assert_eq!(cart.add(USER, &form(Some("2"), Some("1"))).await.unwrap(), 2);
        assert_eq!(store.count(USER, SkuId::new(1)).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_add_rejects_sum_over_stock() {
        let store = MemoryStore::new();
        let cart = CartService::new(&store, stock(&[(1, 4)]));

        cart.add(USER, &form(Some("1"), Some("3"))).await.unwrap();
        let err = cart.add(USER, &form(Some("1"), Some("2"))).await.unwrap_err();
        assert!(matches!(err, CartError::InsufficientStock));
        assert_eq!(store.count(USER, SkuId::new(1)).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_add_unknown_sku() {
        let store = MemoryStore::new();
        let cart = CartService::new(&store, stock(&[]));
        let err = cart.add(USER, &form(Some("9"), Some("1"))).await.unwrap_err();
        assert!(matches!(err, CartError::SkuNotFound));
        assert_eq!(store.line_count(USER).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_replaces_and_sums_quantities() {
        let store = MemoryStore::new();
        let cart = CartService::new(&store, stock(&[(1, 10), (2, 10)]));
        cart.add(USER, &form(Some("1"), Some("4"))).await.unwrap();
        cart.add(USER, &form(Some("2"), Some("1"))).await.unwrap();

        let total = cart.update(USER, &form(Some("1"), Some("2"))).await.unwrap();
        assert_eq!(total, 3);

        let err = cart.update(USER, &form(Some("1"), Some("11"))).await.unwrap_err();
        assert!(matches!(err, CartError::InsufficientStock));
    }

    #[tokio::test]
    async fn test_delete_removes_line() {
        let store = MemoryStore::new();
        let cart = CartService::new(&store, stock(&[(1, 10), (2, 10)]));
        cart.add(USER, &form(Some("1"), Some("4"))).await.unwrap();
        cart.add(USER, &form(Some("2"), Some("1"))).await.unwrap();

        let total = cart.delete(USER, &form(Some("1"), None)).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(DELETE_OK, 3);

        let missing = cart.delete(USER, &form(None, None)).await.unwrap_err();
        assert!(matches!(missing, CartError::MissingFields));
        assert_eq!(missing.into_delete_reply().unwrap().code(), 1);

        let unknown = cart.delete(USER, &form(Some("42"), None)).await.unwrap_err();
        assert!(matches!(unknown, CartError::SkuNotFound));
        assert_eq!(unknown.into_delete_reply().unwrap().code(), 2);

        let malformed = cart.delete(USER, &form(Some("abc"), None)).await.unwrap_err();
        assert_eq!(malformed.into_delete_reply().unwrap().code(), 2);
    }

    #[test]
    fn test_delete_codes_differ_from_add() {
        assert_eq!(CartError::SkuNotFound.code(), Some(3));
        assert_eq!(CartError::SkuNotFound.delete_code(), Some(2));
        assert_eq!(CartError::MissingFields.delete_code(), Some(1));
        assert!(
            CartError::Store(CartStoreError::Corrupt("x".to_string()))
                .into_delete_reply()
                .is_err()
        );
    }

    #[test]
    fn test_into_reply_for_business_error() {
        let reply = CartError::InsufficientStock.into_reply().unwrap();
        assert_eq!(reply.code(), 4);
    }
}
