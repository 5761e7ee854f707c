//! Catalog queries and mutations.
//!
//! Reads go through [`CatalogRepository`] on the pool. Writes go through
//! [`CatalogWriter`] on a caller-owned transaction so the caller can emit a
//! change notification in the same transaction.

use sqlx::{PgConnection, PgPool};

use freshmart_core::{BannerId, CategoryId, GoodsId, SkuId};

use super::RepositoryError;
use crate::models::{
    Category, CategoryGoodsInput, CategoryInput, CategoryTile, Goods, GoodsBanner,
    GoodsBannerInput, GoodsInput, HomepageData, ListSort, PromotionBanner, PromotionBannerInput,
    Sku, SkuComment, SkuInput,
};

const SKU_COLUMNS: &str =
    "id, category_id, goods_id, name, summary, price, unit, image, stock, sales";

/// Read-only catalog access.
pub struct CatalogRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CatalogRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Live categories in display order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn categories(&self) -> Result<Vec<Category>, RepositoryError> {
        let rows = sqlx::query_as::<_, Category>(
            "SELECT id, name, logo, image FROM shop.category WHERE NOT is_deleted ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn category(&self, id: CategoryId) -> Result<Option<Category>, RepositoryError> {
        let row = sqlx::query_as::<_, Category>(
            "SELECT id, name, logo, image FROM shop.category WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    /// Load everything the homepage shows.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if any query fails.
    pub async fn homepage(&self) -> Result<HomepageData, RepositoryError> {
        let categories = self.categories().await?;

        let goods_banners = sqlx::query_as::<_, GoodsBanner>(
            "SELECT id, sku_id, image, index FROM shop.index_goods_banner ORDER BY index, id",
        )
        .fetch_all(self.pool)
        .await?;

        let promotion_banners = sqlx::query_as::<_, PromotionBanner>(
            "SELECT id, name, url, image, index FROM shop.index_promotion_banner ORDER BY index, id",
        )
        .fetch_all(self.pool)
        .await?;

        let tiles = sqlx::query_as::<_, CategoryTile>(
            r"
            SELECT t.category_id, t.sku_id, s.name AS sku_name, s.image, t.display_type
            FROM shop.index_category_goods t
            JOIN shop.sku s ON s.id = t.sku_id
            WHERE s.is_online
            ORDER BY t.index, t.id
            ",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(HomepageData::assemble(
            categories,
            tiles,
            goods_banners,
            promotion_banners,
        ))
    }

    /// An online SKU by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn sku(&self, id: SkuId) -> Result<Option<Sku>, RepositoryError> {
        let row = sqlx::query_as::<_, Sku>(&format!(
            "SELECT {SKU_COLUMNS} FROM shop.sku WHERE id = $1 AND is_online"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    /// Current stock of a SKU, or `None` if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn sku_stock(&self, id: SkuId) -> Result<Option<i32>, RepositoryError> {
        let stock: Option<i32> =
            sqlx::query_scalar("SELECT stock FROM shop.sku WHERE id = $1 AND is_online")
                .bind(id)
                .fetch_optional(self.pool)
                .await?;
        Ok(stock)
    }

    /// SKUs for the given ids, in the order the ids were given. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn skus_by_ids(&self, ids: &[SkuId]) -> Result<Vec<Sku>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<i32> = ids.iter().map(SkuId::as_i32).collect();
        let mut rows = sqlx::query_as::<_, Sku>(&format!(
            "SELECT {SKU_COLUMNS} FROM shop.sku WHERE id = ANY($1)"
        ))
        .bind(raw)
        .fetch_all(self.pool)
        .await?;

        rows.sort_by_key(|s| ids.iter().position(|id| *id == s.id));
        Ok(rows)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn goods(&self, id: GoodsId) -> Result<Option<Goods>, RepositoryError> {
        let row = sqlx::query_as::<_, Goods>("SELECT id, name, detail FROM shop.goods WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }

    /// Other SKUs of the same SPU.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn sibling_skus(
        &self,
        goods_id: GoodsId,
        exclude: SkuId,
    ) -> Result<Vec<Sku>, RepositoryError> {
        let rows = sqlx::query_as::<_, Sku>(&format!(
            "SELECT {SKU_COLUMNS} FROM shop.sku WHERE goods_id = $1 AND id <> $2 AND is_online ORDER BY id"
        ))
        .bind(goods_id)
        .bind(exclude)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Most recently added SKUs in a category.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn newest_in_category(
        &self,
        category_id: CategoryId,
        limit: i64,
    ) -> Result<Vec<Sku>, RepositoryError> {
        let rows = sqlx::query_as::<_, Sku>(&format!(
            "SELECT {SKU_COLUMNS} FROM shop.sku WHERE category_id = $1 AND is_online ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(category_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn count_in_category(&self, category_id: CategoryId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM shop.sku WHERE category_id = $1 AND is_online",
        )
        .bind(category_id)
        .fetch_one(self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// One page of a category listing.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_in_category(
        &self,
        category_id: CategoryId,
        sort: ListSort,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Sku>, RepositoryError> {
        let rows = sqlx::query_as::<_, Sku>(&format!(
            "SELECT {SKU_COLUMNS} FROM shop.sku WHERE category_id = $1 AND is_online ORDER BY {} LIMIT $2 OFFSET $3",
            sort.order_by()
        ))
        .bind(category_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Non-empty buyer comments on a SKU, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn sku_comments(&self, sku_id: SkuId) -> Result<Vec<SkuComment>, RepositoryError> {
        let rows = sqlx::query_as::<_, SkuComment>(
            r"
            SELECT u.username, g.comment, g.updated_at
            FROM shop.order_goods g
            JOIN shop.order_info o ON o.order_id = g.order_id
            JOIN shop.user u ON u.id = o.user_id
            WHERE g.sku_id = $1 AND g.comment <> ''
            ORDER BY g.updated_at DESC
            ",
        )
        .bind(sku_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}

/// Catalog mutations on an open transaction.
pub struct CatalogWriter<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> CatalogWriter<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Insert a category, or update it when `id` is given.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` when updating a missing row.
    pub async fn upsert_category(
        &mut self,
        id: Option<CategoryId>,
        input: &CategoryInput,
    ) -> Result<CategoryId, RepositoryError> {
        let query = if id.is_some() {
            "UPDATE shop.category SET name = $2, logo = $3, image = $4 WHERE id = $1 RETURNING id"
        } else {
            "INSERT INTO shop.category (name, logo, image) VALUES ($2, $3, $4) RETURNING id"
        };
        let row: Option<CategoryId> = sqlx::query_scalar(query)
            .bind(id)
            .bind(&input.name)
            .bind(&input.logo)
            .bind(&input.image)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.ok_or(RepositoryError::NotFound)
    }

    /// Soft-delete a category; its SKUs stay referenced by past orders.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the category doesn't exist.
    pub async fn delete_category(&mut self, id: CategoryId) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE shop.category SET is_deleted = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        expect_one(result.rows_affected())
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn create_goods(&mut self, input: &GoodsInput) -> Result<GoodsId, RepositoryError> {
        let id: GoodsId =
            sqlx::query_scalar("INSERT INTO shop.goods (name, detail) VALUES ($1, $2) RETURNING id")
                .bind(&input.name)
                .bind(&input.detail)
                .fetch_one(&mut *self.conn)
                .await?;
        Ok(id)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn create_sku(&mut self, input: &SkuInput) -> Result<SkuId, RepositoryError> {
        let id: SkuId = sqlx::query_scalar(
            r"
            INSERT INTO shop.sku (category_id, goods_id, name, summary, price, unit, image, stock)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            ",
        )
        .bind(input.category_id)
        .bind(input.goods_id)
        .bind(&input.name)
        .bind(&input.summary)
        .bind(input.price)
        .bind(&input.unit)
        .bind(&input.image)
        .bind(input.stock)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(id)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` when updating a missing row.
    pub async fn upsert_goods_banner(
        &mut self,
        id: Option<BannerId>,
        input: &GoodsBannerInput,
    ) -> Result<BannerId, RepositoryError> {
        let query = if id.is_some() {
            "UPDATE shop.index_goods_banner SET sku_id = $2, image = $3, index = $4 WHERE id = $1 RETURNING id"
        } else {
            "INSERT INTO shop.index_goods_banner (sku_id, image, index) VALUES ($2, $3, $4) RETURNING id"
        };
        let row: Option<BannerId> = sqlx::query_scalar(query)
            .bind(id)
            .bind(input.sku_id)
            .bind(&input.image)
            .bind(input.index)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.ok_or(RepositoryError::NotFound)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the banner doesn't exist.
    pub async fn delete_goods_banner(&mut self, id: BannerId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM shop.index_goods_banner WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        expect_one(result.rows_affected())
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` when updating a missing row.
    pub async fn upsert_promotion_banner(
        &mut self,
        id: Option<BannerId>,
        input: &PromotionBannerInput,
    ) -> Result<BannerId, RepositoryError> {
        let query = if id.is_some() {
            "UPDATE shop.index_promotion_banner SET name = $2, url = $3, image = $4, index = $5 WHERE id = $1 RETURNING id"
        } else {
            "INSERT INTO shop.index_promotion_banner (name, url, image, index) VALUES ($2, $3, $4, $5) RETURNING id"
        };
        let row: Option<BannerId> = sqlx::query_scalar(query)
            .bind(id)
            .bind(&input.name)
            .bind(&input.url)
            .bind(&input.image)
            .bind(input.index)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.ok_or(RepositoryError::NotFound)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the banner doesn't exist.
    pub async fn delete_promotion_banner(&mut self, id: BannerId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM shop.index_promotion_banner WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        expect_one(result.rows_affected())
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` when updating a missing row.
    pub async fn upsert_category_goods(
        &mut self,
        id: Option<BannerId>,
        input: &CategoryGoodsInput,
    ) -> Result<BannerId, RepositoryError> {
        let query = if id.is_some() {
            "UPDATE shop.index_category_goods SET category_id = $2, sku_id = $3, display_type = $4, index = $5 WHERE id = $1 RETURNING id"
        } else {
            "INSERT INTO shop.index_category_goods (category_id, sku_id, display_type, index) VALUES ($2, $3, $4, $5) RETURNING id"
        };
        let row: Option<BannerId> = sqlx::query_scalar(query)
            .bind(id)
            .bind(input.category_id)
            .bind(input.sku_id)
            .bind(input.display_type)
            .bind(input.index)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.ok_or(RepositoryError::NotFound)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the row doesn't exist.
    pub async fn delete_category_goods(&mut self, id: BannerId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM shop.index_category_goods WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        expect_one(result.rows_affected())
    }
}

fn expect_one(rows_affected: u64) -> Result<(), RepositoryError> {
    if rows_affected == 0 {
        Err(RepositoryError::NotFound)
    } else {
        Ok(())
    }
}
