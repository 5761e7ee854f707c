//! Per-user cart and browsing history, kept outside the database.
//!
//! # Keys
//!
//! - `cart_<user_id>` - hash of `sku_id` to quantity
//! - `history_<user_id>` - list of recently viewed `sku_id`s, newest first
//!
//! [`RedisStore`] is the production backend. [`MemoryStore`] implements the
//! same traits in process and backs the service tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use freshmart_core::{SkuId, UserId};

/// Number of recently viewed SKUs kept per user.
pub const HISTORY_LEN: usize = 5;

/// Errors from the cart/history store.
#[derive(Debug, Error)]
pub enum CartStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed cart entry: {0}")]
    Corrupt(String),
}

/// Per-user mapping of SKU to quantity.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Quantity of one SKU in the cart.
    async fn count(&self, user: UserId, sku: SkuId) -> Result<Option<i32>, CartStoreError>;

    /// Set the quantity of one SKU.
    async fn set(&self, user: UserId, sku: SkuId, count: i32) -> Result<(), CartStoreError>;

    /// Remove the given SKUs, leaving every other line alone.
    async fn remove(&self, user: UserId, skus: &[SkuId]) -> Result<(), CartStoreError>;

    /// All lines, ordered by SKU id.
    async fn lines(&self, user: UserId) -> Result<Vec<(SkuId, i32)>, CartStoreError>;

    /// Number of distinct SKUs in the cart.
    async fn line_count(&self, user: UserId) -> Result<usize, CartStoreError>;

    /// Sum of all quantities.
    async fn total_quantity(&self, user: UserId) -> Result<i64, CartStoreError> {
        let lines = self.lines(user).await?;
        Ok(lines.iter().map(|(_, count)| i64::from(*count)).sum())
    }
}

/// Per-user list of recently viewed SKUs.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Move `sku` to the front of the history and trim it to [`HISTORY_LEN`].
    async fn record_view(&self, user: UserId, sku: SkuId) -> Result<(), CartStoreError>;

    /// Up to `limit` most recent SKUs, newest first.
    async fn recent(&self, user: UserId, limit: usize) -> Result<Vec<SkuId>, CartStoreError>;
}

fn cart_key(user: UserId) -> String {
    format!("cart_{user}")
}

fn history_key(user: UserId) -> String {
    format!("history_{user}")
}

// =============================================================================
// Redis
// =============================================================================

/// Redis-backed store. Cheap to clone; all clones share one multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &SecretString) -> Result<Self, CartStoreError> {
        let client = redis::Client::open(url.expose_secret())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Round-trip a `PING`, used by the readiness check.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis does not answer.
    pub async fn ping(&self) -> Result<(), CartStoreError> {
        let mut conn = self.conn.clone();
        let (): () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CartStore for RedisStore {
    async fn count(&self, user: UserId, sku: SkuId) -> Result<Option<i32>, CartStoreError> {
        let mut conn = self.conn.clone();
        let count: Option<i32> = conn.hget(cart_key(user), sku.as_i32()).await?;
        Ok(count)
    }

    async fn set(&self, user: UserId, sku: SkuId, count: i32) -> Result<(), CartStoreError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(cart_key(user), sku.as_i32(), count)
            .await?;
        Ok(())
    }

    async fn remove(&self, user: UserId, skus: &[SkuId]) -> Result<(), CartStoreError> {
        if skus.is_empty() {
            return Ok(());
        }
        let fields: Vec<i32> = skus.iter().map(SkuId::as_i32).collect();
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(cart_key(user), fields).await?;
        Ok(())
    }

    async fn lines(&self, user: UserId) -> Result<Vec<(SkuId, i32)>, CartStoreError> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(cart_key(user)).await?;

        let mut lines = raw
            .into_iter()
            .map(|(field, value)| {
                let sku = field
                    .parse::<SkuId>()
                    .map_err(|_| CartStoreError::Corrupt(format!("field {field:?}")))?;
                let count = value
                    .parse::<i32>()
                    .map_err(|_| CartStoreError::Corrupt(format!("count {value:?} for {sku}")))?;
                Ok((sku, count))
            })
            .collect::<Result<Vec<_>, CartStoreError>>()?;
        lines.sort_by_key(|(sku, _)| *sku);
        Ok(lines)
    }

    async fn line_count(&self, user: UserId) -> Result<usize, CartStoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.hlen(cart_key(user)).await?;
        Ok(len)
    }
}

#[async_trait]
impl HistoryStore for RedisStore {
    async fn record_view(&self, user: UserId, sku: SkuId) -> Result<(), CartStoreError> {
        let key = history_key(user);
        let mut conn = self.conn.clone();
        let (): () = redis::pipe()
            .lrem(&key, 0, sku.as_i32())
            .ignore()
            .lpush(&key, sku.as_i32())
            .ignore()
            .ltrim(&key, 0, history_stop(HISTORY_LEN))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recent(&self, user: UserId, limit: usize) -> Result<Vec<SkuId>, CartStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let ids: Vec<i32> = conn
            .lrange(history_key(user), 0, history_stop(limit))
            .await?;
        Ok(ids.into_iter().map(SkuId::new).collect())
    }
}

/// Inclusive stop index for `LRANGE`/`LTRIM` covering `len` elements.
fn history_stop(len: usize) -> isize {
    isize::try_from(len).map_or(isize::MAX, |n| n - 1)
}

// =============================================================================
// In-memory
// =============================================================================

/// In-process store with the same semantics as [`RedisStore`].
#[derive(Default)]
pub struct MemoryStore {
    carts: Mutex<HashMap<UserId, BTreeMap<SkuId, i32>>>,
    histories: Mutex<HashMap<UserId, VecDeque<SkuId>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn count(&self, user: UserId, sku: SkuId) -> Result<Option<i32>, CartStoreError> {
        let carts = self.carts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(carts.get(&user).and_then(|cart| cart.get(&sku)).copied())
    }

    async fn set(&self, user: UserId, sku: SkuId, count: i32) -> Result<(), CartStoreError> {
        let mut carts = self.carts.lock().unwrap_or_else(PoisonError::into_inner);
        carts.entry(user).or_default().insert(sku, count);
        Ok(())
    }

    async fn remove(&self, user: UserId, skus: &[SkuId]) -> Result<(), CartStoreError> {
        let mut carts = self.carts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cart) = carts.get_mut(&user) {
            for sku in skus {
                cart.remove(sku);
            }
        }
        Ok(())
    }

    async fn lines(&self, user: UserId) -> Result<Vec<(SkuId, i32)>, CartStoreError> {
        let carts = self.carts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(carts
            .get(&user)
            .map(|cart| cart.iter().map(|(sku, count)| (*sku, *count)).collect())
            .unwrap_or_default())
    }

    async fn line_count(&self, user: UserId) -> Result<usize, CartStoreError> {
        let carts = self.carts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(carts.get(&user).map_or(0, BTreeMap::len))
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn record_view(&self, user: UserId, sku: SkuId) -> Result<(), CartStoreError> {
        let mut histories = self.histories.lock().unwrap_or_else(PoisonError::into_inner);
        let history = histories.entry(user).or_default();
        history.retain(|s| *s != sku);
        history.push_front(sku);
        history.truncate(HISTORY_LEN);
        Ok(())
    }

    async fn recent(&self, user: UserId, limit: usize) -> Result<Vec<SkuId>, CartStoreError> {
        let histories = self.histories.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(histories
            .get(&user)
            .map(|h| h.iter().take(limit).copied().collect())
            .unwrap_or_default())
    }
}
