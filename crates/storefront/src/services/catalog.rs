//! Homepage caching, catalog mutations and their side effects.
//!
//! Catalog writes go through [`CatalogAdmin`], which announces every change
//! on the `catalog_changed` channel in the same transaction. The
//! [`HomepageInvalidator`] reacts to those announcements by dropping the
//! cached homepage data and queueing a static homepage rebuild.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use moka::future::Cache;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use freshmart_core::{BannerId, CategoryId, GoodsId, SkuId};

use super::events::{CATALOG_CHANNEL, CatalogEntity, CatalogEvent};
use super::tasks::{Task, TaskError, TaskQueue};
use crate::db::catalog::CatalogWriter;
use crate::db::{CatalogRepository, RepositoryError};
use crate::models::{
    CategoryGoodsInput, CategoryInput, GoodsBannerInput, GoodsInput, HomepageData,
    PromotionBannerInput, SkuInput,
};

const HOMEPAGE_KEY: &str = "index_page_data";
const HOMEPAGE_TTL: Duration = Duration::from_secs(3600);

// =============================================================================
// Homepage cache
// =============================================================================

/// Homepage data under a single key, kept for an hour or until invalidated.
#[derive(Clone)]
pub struct HomepageCache {
    cache: Cache<&'static str, Arc<HomepageData>>,
}

impl Default for HomepageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HomepageCache {
    #[must_use]
    pub fn new() -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(HOMEPAGE_TTL)
            .build();
        Self { cache }
    }

    pub async fn get(&self) -> Option<Arc<HomepageData>> {
        self.cache.get(HOMEPAGE_KEY).await
    }

    pub async fn put(&self, data: Arc<HomepageData>) {
        self.cache.insert(HOMEPAGE_KEY, data).await;
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate(HOMEPAGE_KEY).await;
    }

    /// Cached data, loading it from the database on a miss.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if loading fails.
    pub async fn get_or_load(&self, pool: &PgPool) -> Result<Arc<HomepageData>, RepositoryError> {
        if let Some(data) = self.get().await {
            tracing::debug!("Cache hit for homepage");
            return Ok(data);
        }

        let data = Arc::new(CatalogRepository::new(pool).homepage().await?);
        self.put(Arc::clone(&data)).await;
        Ok(data)
    }
}

// =============================================================================
// Static homepage
// =============================================================================

#[derive(Template)]
#[template(path = "static_index.html")]
struct StaticIndexTemplate<'a> {
    data: &'a HomepageData,
}

/// Render the anonymous homepage into `<static_dir>/index.html`.
///
/// The page is written to a temporary file and renamed over the old one, so
/// a reader never sees a half-written page.
///
/// # Errors
///
/// Returns an error if loading, rendering or writing fails.
pub async fn regenerate_homepage(
    pool: &PgPool,
    cache: &HomepageCache,
    static_dir: &Path,
) -> Result<(), TaskError> {
    let data = cache.get_or_load(pool).await?;
    let html = StaticIndexTemplate { data: &data }.render()?;
    write_atomically(static_dir, "index.html", &html).await?;
    tracing::info!(dir = %static_dir.display(), "Static homepage regenerated");
    Ok(())
}

async fn write_atomically(dir: &Path, name: &str, contents: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(name);
    let tmp = dir.join(format!(".{name}.tmp"));
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, &target).await
}

// =============================================================================
// Invalidation
// =============================================================================

/// Subscriber that keeps the homepage fresh after catalog changes.
pub struct HomepageInvalidator {
    cache: HomepageCache,
    tasks: TaskQueue,
}

impl HomepageInvalidator {
    #[must_use]
    pub const fn new(cache: HomepageCache, tasks: TaskQueue) -> Self {
        Self { cache, tasks }
    }

    /// Run until `shutdown` is cancelled or the bus closes.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<CatalogEvent>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Homepage invalidator started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        tracing::debug!(?event, "Invalidating homepage");
                        self.refresh().await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Homepage invalidator lagged");
                        self.refresh().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        tracing::info!("Homepage invalidator stopped");
    }

    async fn refresh(&self) {
        self.cache.invalidate().await;
        self.tasks.dispatch(Task::RegenerateHomepage);
    }
}

// =============================================================================
// Mutations
// =============================================================================

/// Catalog writes that announce themselves on commit.
pub struct CatalogAdmin<'a> {
    pool: &'a PgPool,
}

impl<'a> CatalogAdmin<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` when updating a missing category.
    pub async fn upsert_category(
        &self,
        id: Option<CategoryId>,
        input: &CategoryInput,
    ) -> Result<CategoryId, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            let id = CatalogWriter::new(&mut tx).upsert_category(id, input).await?;
            notify(&mut tx, CatalogEvent::upserted(CatalogEntity::Category, id.as_i32())).await?;
            Ok::<_, RepositoryError>(id)
        }
        .await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the category doesn't exist.
    pub async fn delete_category(&self, id: CategoryId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            CatalogWriter::new(&mut tx).delete_category(id).await?;
            notify(&mut tx, CatalogEvent::deleted(CatalogEntity::Category, id.as_i32())).await
        }
        .await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn create_goods(&self, input: &GoodsInput) -> Result<GoodsId, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            let id = CatalogWriter::new(&mut tx).create_goods(input).await?;
            notify(&mut tx, CatalogEvent::upserted(CatalogEntity::Goods, id.as_i32())).await?;
            Ok::<_, RepositoryError>(id)
        }
        .await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn create_sku(&self, input: &SkuInput) -> Result<SkuId, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            let id = CatalogWriter::new(&mut tx).create_sku(input).await?;
            notify(&mut tx, CatalogEvent::upserted(CatalogEntity::Sku, id.as_i32())).await?;
            Ok::<_, RepositoryError>(id)
        }
        .await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` when updating a missing banner.
    pub async fn upsert_goods_banner(
        &self,
        id: Option<BannerId>,
        input: &GoodsBannerInput,
    ) -> Result<BannerId, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            let id = CatalogWriter::new(&mut tx)
                .upsert_goods_banner(id, input)
                .await?;
            notify(&mut tx, CatalogEvent::upserted(CatalogEntity::GoodsBanner, id.as_i32()))
                .await?;
            Ok::<_, RepositoryError>(id)
        }
        .await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the banner doesn't exist.
    pub async fn delete_goods_banner(&self, id: BannerId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            CatalogWriter::new(&mut tx).delete_goods_banner(id).await?;
            notify(&mut tx, CatalogEvent::deleted(CatalogEntity::GoodsBanner, id.as_i32())).await
        }
        .await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` when updating a missing banner.
    pub async fn upsert_promotion_banner(
        &self,
        id: Option<BannerId>,
        input: &PromotionBannerInput,
    ) -> Result<BannerId, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            let id = CatalogWriter::new(&mut tx)
                .upsert_promotion_banner(id, input)
                .await?;
            notify(
                &mut tx,
                CatalogEvent::upserted(CatalogEntity::PromotionBanner, id.as_i32()),
            )
            .await?;
            Ok::<_, RepositoryError>(id)
        }
        .await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the banner doesn't exist.
    pub async fn delete_promotion_banner(&self, id: BannerId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            CatalogWriter::new(&mut tx).delete_promotion_banner(id).await?;
            notify(
                &mut tx,
                CatalogEvent::deleted(CatalogEntity::PromotionBanner, id.as_i32()),
            )
            .await
        }
        .await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` when updating a missing row.
    pub async fn upsert_category_goods(
        &self,
        id: Option<BannerId>,
        input: &CategoryGoodsInput,
    ) -> Result<BannerId, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            let id = CatalogWriter::new(&mut tx)
                .upsert_category_goods(id, input)
                .await?;
            notify(
                &mut tx,
                CatalogEvent::upserted(CatalogEntity::CategoryGoods, id.as_i32()),
            )
            .await?;
            Ok::<_, RepositoryError>(id)
        }
        .await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the row doesn't exist.
    pub async fn delete_category_goods(&self, id: BannerId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = async {
            CatalogWriter::new(&mut tx).delete_category_goods(id).await?;
            notify(
                &mut tx,
                CatalogEvent::deleted(CatalogEntity::CategoryGoods, id.as_i32()),
            )
            .await
        }
        .await;
        finish(tx, result).await
    }
}

/// Queue a change notification; Postgres delivers it only on commit.
async fn notify(conn: &mut PgConnection, event: CatalogEvent) -> Result<(), RepositoryError> {
    let payload = event
        .to_payload()
        .map_err(|e| RepositoryError::DataCorruption(e.to_string()))?;
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CATALOG_CHANNEL)
        .bind(payload)
        .execute(conn)
        .await?;
    Ok(())
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: Transaction<'_, Postgres>,
    result: Result<T, RepositoryError>,
) -> Result<T, RepositoryError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Catalog rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_put_get_invalidate() {
        let cache = HomepageCache::new();
        assert!(cache.get().await.is_none());

        cache.put(Arc::new(HomepageData::default())).await;
        assert!(cache.get().await.is_some());

        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_invalidator_drops_cache_and_queues_rebuild() {
        let cache = HomepageCache::new();
        cache.put(Arc::new(HomepageData::default())).await;

        let (tasks, mut queued) = TaskQueue::new();
        let (tx, rx) = broadcast::channel(4);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            HomepageInvalidator::new(cache.clone(), tasks).run(rx, shutdown.clone()),
        );

        tx.send(CatalogEvent::upserted(CatalogEntity::GoodsBanner, 1))
            .unwrap();
        assert_eq!(queued.recv().await.unwrap(), Task::RegenerateHomepage);
        assert!(cache.get().await.is_none());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_atomically_replaces_file() {
        let dir = std::env::temp_dir().join(format!("freshmart-static-{}", uuid::Uuid::now_v7()));

        write_atomically(&dir, "index.html", "<p>old</p>").await.unwrap();
        write_atomically(&dir, "index.html", "<p>new</p>").await.unwrap();

        let written = tokio::fs::read_to_string(dir.join("index.html")).await.unwrap();
        assert_eq!(written, "<p>new</p>");
        assert!(!dir.join(".index.html.tmp").exists());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn test_static_index_renders_empty_homepage() {
        let data = HomepageData::default();
        let html = StaticIndexTemplate { data: &data }.render().unwrap();
        assert!(html.contains("FreshMart"));
    }
}
