//! Order queries and the writes performed by an order commit.
//!
//! [`OrderRepository`] runs on the pool. [`OrderWriter`] runs on the commit
//! transaction and holds the stock compare-and-swap.

use sqlx::{PgConnection, PgPool};

use freshmart_core::{AddressId, Money, OrderId, OrderStatus, PayMethod, SkuId, UserId};

use super::RepositoryError;
use crate::models::{OrderInfo, OrderLineView};

const ORDER_COLUMNS: &str = "order_id, user_id, address_id, pay_method, total_count, \
     total_price, transit_price, status, trade_no, created_at";

/// Labels of the statuses allowed to move to `next`, for `status::text = ANY($n)`.
#[must_use]
pub fn statuses_leading_to(next: OrderStatus) -> Vec<String> {
    OrderStatus::preceding(next).map(|s| s.to_string()).collect()
}

/// Stock snapshot of a SKU, read at the start of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SkuStock {
    pub id: SkuId,
    pub name: String,
    pub price: Money,
    pub stock: i32,
    pub sales: i32,
}

/// Header of an order about to be committed. Totals start at zero.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub pay_method: PayMethod,
    pub transit_price: Money,
}

/// Repository for reading and updating committed orders.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Fetch an order only if it belongs to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_owned(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Option<OrderInfo>, RepositoryError> {
        let order = sqlx::query_as::<_, OrderInfo>(&format!(
            "SELECT {ORDER_COLUMNS} FROM shop.order_info WHERE order_id = $1 AND user_id = $2"
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(order)
    }

    /// Lines of an order joined with their SKUs, amounts filled in.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn lines(&self, order_id: OrderId) -> Result<Vec<OrderLineView>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderLineView>(
            r"
            SELECT g.sku_id, s.name AS sku_name, s.image, s.unit, g.price, g.count, g.comment
            FROM shop.order_goods g
            JOIN shop.sku s ON s.id = g.sku_id
            WHERE g.order_id = $1
            ORDER BY g.id
            ",
        )
        .bind(order_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(OrderLineView::with_amount).collect())
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn count_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shop.order_info WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// One page of the user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn page_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<OrderInfo>, RepositoryError> {
        let orders = sqlx::query_as::<_, OrderInfo>(&format!(
            "SELECT {ORDER_COLUMNS} FROM shop.order_info WHERE user_id = $1 \
             ORDER BY created_at DESC, order_id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;
        Ok(orders)
    }

    /// Record a settled payment.
    ///
    /// Only moves orders whose status may become `paid`; returns `false` when
    /// the order was already paid or belongs to someone else.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn mark_paid(
        &self,
        user_id: UserId,
        order_id: OrderId,
        trade_no: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE shop.order_info
            SET status = $4, trade_no = $3, updated_at = NOW()
            WHERE order_id = $1 AND user_id = $2 AND status::text = ANY($5)
            ",
        )
        .bind(order_id)
        .bind(user_id)
        .bind(trade_no)
        .bind(OrderStatus::Paid)
        .bind(statuses_leading_to(OrderStatus::Paid))
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Store the buyer's comments and close the order as reviewed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if a SKU is not a line of the order,
    /// or the order is not in a state that accepts comments.
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn save_comments(
        &self,
        order_id: OrderId,
        comments: &[(SkuId, String)],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for (sku_id, comment) in comments {
            let result = sqlx::query(
                r"
                UPDATE shop.order_goods
                SET comment = $3, updated_at = NOW()
                WHERE order_id = $1 AND sku_id = $2
                ",
            )
            .bind(order_id)
            .bind(sku_id)
            .bind(comment)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(RepositoryError::NotFound);
            }
        }

        let result = sqlx::query(
            r"
            UPDATE shop.order_info
            SET status = $2, updated_at = NOW()
            WHERE order_id = $1 AND status::text = ANY($3)
            ",
        )
        .bind(order_id)
        .bind(OrderStatus::Reviewed)
        .bind(statuses_leading_to(OrderStatus::Reviewed))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Order-commit writes on an open transaction.
pub struct OrderWriter<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> OrderWriter<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn insert_order(&mut self, order: &NewOrder) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO shop.order_info
                (order_id, user_id, address_id, pay_method, total_count, total_price, transit_price)
            VALUES ($1, $2, $3, $4, 0, 0, $5)
            ",
        )
        .bind(order.order_id)
        .bind(order.user_id)
        .bind(order.address_id)
        .bind(order.pay_method)
        .bind(order.transit_price)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Plain read of a SKU's stock, without taking a row lock.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn read_stock(&mut self, sku_id: SkuId) -> Result<Option<SkuStock>, RepositoryError> {
        let row = sqlx::query_as::<_, SkuStock>(
            "SELECT id, name, price, stock, sales FROM shop.sku WHERE id = $1",
        )
        .bind(sku_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(row)
    }

    /// Write new stock and sales only if stock still equals `seen_stock`.
    ///
    /// Returns `false` when another transaction changed the row first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn swap_stock(
        &mut self,
        sku_id: SkuId,
        seen_stock: i32,
        new_stock: i32,
        new_sales: i32,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE shop.sku SET stock = $3, sales = $4 WHERE id = $1 AND stock = $2",
        )
        .bind(sku_id)
        .bind(seen_stock)
        .bind(new_stock)
        .bind(new_sales)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn insert_line(
        &mut self,
        order_id: OrderId,
        sku_id: SkuId,
        count: i32,
        price: Money,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO shop.order_goods (order_id, sku_id, count, price) VALUES ($1, $2, $3, $4)",
        )
        .bind(order_id)
        .bind(sku_id)
        .bind(count)
        .bind(price)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order header is missing.
    pub async fn set_totals(
        &mut self,
        order_id: OrderId,
        total_count: i32,
        total_price: Money,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE shop.order_info
            SET total_count = $2, total_price = $3, updated_at = NOW()
            WHERE order_id = $1
            ",
        )
        .bind(order_id)
        .bind(total_count)
        .bind(total_price)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses_leading_to_match_enum_labels() {
        assert_eq!(
            statuses_leading_to(OrderStatus::Paid),
            vec!["unpaid", "paid_pending"]
        );
        assert_eq!(
            statuses_leading_to(OrderStatus::Reviewed),
            vec!["paid", "delivered", "reviewable"]
        );
    }
}
