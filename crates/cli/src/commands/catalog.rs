//! Catalog commands: seeding from YAML, deleting rows and rebuilding the
//! static homepage.
//!
//! Every write goes through `CatalogAdmin`, so a running storefront sees the
//! changes through `catalog_changed` notifications and refreshes its homepage.
//!
//! # Seed file
//!
//! Rows refer to each other by `key`, not by database id:
//!
//! ```yaml
//! categories:
//!   - key: fruit
//!     name: Fresh fruit
//!     logo: fruit
//!     image: /static/images/banner01.jpg
//! goods:
//!   - key: strawberry
//!     name: Strawberry
//!     detail: "<p>Sweet and juicy.</p>"
//! skus:
//!   - key: strawberry-500g
//!     category: fruit
//!     goods: strawberry
//!     name: Strawberry 500g
//!     price: "12.50"
//!     unit: 500g
//!     stock: 100
//! goods_banners:
//!   - sku: strawberry-500g
//!     image: /static/images/slide.jpg
//! promotion_banners:
//!   - name: Weekend deals
//!     url: /list/1/1
//!     image: /static/images/adv01.jpg
//! category_goods:
//!   - category: fruit
//!     sku: strawberry-500g
//!     display_type: 1
//! ```
//!
//! Categories and the three homepage sections also take an optional `id`.
//! An entry with an `id` updates that row instead of inserting a new one, and
//! the command fails if the row doesn't exist.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use clap::ValueEnum;

use freshmart_core::{BannerId, CategoryId, GoodsId, Money, SkuId};
use freshmart_storefront::db::RepositoryError;
use freshmart_storefront::models::{
    CategoryGoodsInput, CategoryInput, GoodsBannerInput, GoodsInput, PromotionBannerInput,
    SkuInput,
};
use freshmart_storefront::services::catalog::{CatalogAdmin, HomepageCache, regenerate_homepage};
use freshmart_storefront::services::tasks::TaskError;

use super::{ConnectError, connect};

const DEFAULT_STATIC_DIR: &str = "crates/storefront/static";

#[derive(Debug, Error)]
pub enum CatalogCommandError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{} validation errors found", .0.len())]
    Invalid(Vec<String>),

    #[error("Database error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Homepage rebuild failed: {0}")]
    Homepage(#[from] TaskError),
}

// =============================================================================
// Seed file
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSeed {
    #[serde(default)]
    pub categories: Vec<SeedCategory>,
    #[serde(default)]
    pub goods: Vec<SeedGoods>,
    #[serde(default)]
    pub skus: Vec<SeedSku>,
    #[serde(default)]
    pub goods_banners: Vec<SeedGoodsBanner>,
    #[serde(default)]
    pub promotion_banners: Vec<SeedPromotionBanner>,
    #[serde(default)]
    pub category_goods: Vec<SeedCategoryGoods>,
}

#[derive(Debug, Deserialize)]
pub struct SeedCategory {
    pub key: String,
    #[serde(default)]
    pub id: Option<CategoryId>,
    #[serde(flatten)]
    pub input: CategoryInput,
}

#[derive(Debug, Deserialize)]
pub struct SeedGoods {
    pub key: String,
    #[serde(flatten)]
    pub input: GoodsInput,
}

#[derive(Debug, Deserialize)]
pub struct SeedSku {
    pub key: String,
    pub category: String,
    pub goods: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    pub price: Money,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub image: String,
    pub stock: i32,
}

#[derive(Debug, Deserialize)]
pub struct SeedGoodsBanner {
    #[serde(default)]
    pub id: Option<BannerId>,
    pub sku: String,
    pub image: String,
    #[serde(default)]
    pub index: i16,
}

#[derive(Debug, Deserialize)]
pub struct SeedPromotionBanner {
    #[serde(default)]
    pub id: Option<BannerId>,
    #[serde(flatten)]
    pub input: PromotionBannerInput,
}

#[derive(Debug, Deserialize)]
pub struct SeedCategoryGoods {
    #[serde(default)]
    pub id: Option<BannerId>,
    pub category: String,
    pub sku: String,
    #[serde(default = "default_display_type")]
    pub display_type: i16,
    #[serde(default)]
    pub index: i16,
}

const fn default_display_type() -> i16 {
    1
}

/// Check keys and cross-references before touching the database.
#[must_use]
pub fn validate(seed: &CatalogSeed) -> Vec<String> {
    let mut errors = Vec::new();

    let categories = unique_keys("category", seed.categories.iter().map(|c| &c.key), &mut errors);
    let goods = unique_keys("goods", seed.goods.iter().map(|g| &g.key), &mut errors);
    let skus = unique_keys("sku", seed.skus.iter().map(|s| &s.key), &mut errors);

    for sku in &seed.skus {
        if !categories.contains(sku.category.as_str()) {
            errors.push(format!("sku {}: unknown category {}", sku.key, sku.category));
        }
        if !goods.contains(sku.goods.as_str()) {
            errors.push(format!("sku {}: unknown goods {}", sku.key, sku.goods));
        }
        if sku.stock < 0 {
            errors.push(format!("sku {}: negative stock", sku.key));
        }
        if sku.price < Money::ZERO {
            errors.push(format!("sku {}: negative price", sku.key));
        }
    }
    for banner in &seed.goods_banners {
        if !skus.contains(banner.sku.as_str()) {
            errors.push(format!("goods banner: unknown sku {}", banner.sku));
        }
    }
    for tile in &seed.category_goods {
        if !categories.contains(tile.category.as_str()) {
            errors.push(format!("category goods: unknown category {}", tile.category));
        }
        if !skus.contains(tile.sku.as_str()) {
            errors.push(format!("category goods: unknown sku {}", tile.sku));
        }
        if !(0..=1).contains(&tile.display_type) {
            errors.push(format!(
                "category goods {}/{}: display_type must be 0 or 1",
                tile.category, tile.sku
            ));
        }
    }

    errors
}

fn unique_keys<'a>(
    what: &str,
    keys: impl Iterator<Item = &'a String>,
    errors: &mut Vec<String>,
) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key.as_str()) {
            errors.push(format!("duplicate {what} key {key}"));
        }
    }
    seen
}

// =============================================================================
// Commands
// =============================================================================

/// Seed the catalog from a YAML file.
///
/// # Errors
///
/// Returns an error if the file can't be read or validated, or an insert fails.
/// Rows inserted before a failure stay in place.
pub async fn seed(path: &Path) -> Result<(), CatalogCommandError> {
    info!(path = %path.display(), "Loading catalog seed");

    // Read and validate before connecting to the database
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CatalogCommandError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let seed: CatalogSeed = serde_yaml::from_str(&content)?;

    let errors = validate(&seed);
    if !errors.is_empty() {
        tracing::error!("Seed validation failed:");
        for err in &errors {
            tracing::error!("  - {err}");
        }
        return Err(CatalogCommandError::Invalid(errors));
    }

    let pool = connect().await?;
    let admin = CatalogAdmin::new(&pool);

    let mut categories: HashMap<&str, CategoryId> = HashMap::new();
    for category in &seed.categories {
        let id = admin.upsert_category(category.id, &category.input).await?;
        categories.insert(&category.key, id);
    }

    let mut goods: HashMap<&str, GoodsId> = HashMap::new();
    for item in &seed.goods {
        let id = admin.create_goods(&item.input).await?;
        goods.insert(&item.key, id);
    }

    let mut skus: HashMap<&str, SkuId> = HashMap::new();
    for sku in &seed.skus {
        let input = SkuInput {
            category_id: lookup(&categories, &sku.category)?,
            goods_id: lookup(&goods, &sku.goods)?,
            name: sku.name.clone(),
            summary: sku.summary.clone(),
            price: sku.price,
            unit: sku.unit.clone(),
            image: sku.image.clone(),
            stock: sku.stock,
        };
        let id = admin.create_sku(&input).await?;
        skus.insert(&sku.key, id);
    }

    for banner in &seed.goods_banners {
        let input = GoodsBannerInput {
            sku_id: lookup(&skus, &banner.sku)?,
            image: banner.image.clone(),
            index: banner.index,
        };
        admin.upsert_goods_banner(banner.id, &input).await?;
    }

    for banner in &seed.promotion_banners {
        admin.upsert_promotion_banner(banner.id, &banner.input).await?;
    }

    for tile in &seed.category_goods {
        let input = CategoryGoodsInput {
            category_id: lookup(&categories, &tile.category)?,
            sku_id: lookup(&skus, &tile.sku)?,
            display_type: tile.display_type,
            index: tile.index,
        };
        admin.upsert_category_goods(tile.id, &input).await?;
    }

    info!("Seeding complete!");
    info!("  Categories: {}", categories.len());
    info!("  Goods: {}", goods.len());
    info!("  SKUs: {}", skus.len());
    info!(
        "  Homepage rows: {}",
        seed.goods_banners.len() + seed.promotion_banners.len() + seed.category_goods.len()
    );
    Ok(())
}

fn lookup<T: Copy>(ids: &HashMap<&str, T>, key: &str) -> Result<T, CatalogCommandError> {
    ids.get(key)
        .copied()
        .ok_or_else(|| CatalogCommandError::Invalid(vec![format!("unresolved key {key}")]))
}

/// Catalog rows that can be deleted by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CatalogKind {
    Category,
    GoodsBanner,
    PromotionBanner,
    CategoryGoods,
}

/// Delete one catalog row.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if no such row exists.
pub async fn delete_row(
    admin: &CatalogAdmin<'_>,
    kind: CatalogKind,
    id: i32,
) -> Result<(), RepositoryError> {
    match kind {
        CatalogKind::Category => admin.delete_category(CategoryId::new(id)).await,
        CatalogKind::GoodsBanner => admin.delete_goods_banner(BannerId::new(id)).await,
        CatalogKind::PromotionBanner => admin.delete_promotion_banner(BannerId::new(id)).await,
        CatalogKind::CategoryGoods => admin.delete_category_goods(BannerId::new(id)).await,
    }
}

/// Delete a catalog row by id.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the row doesn't exist.
pub async fn delete(kind: CatalogKind, id: i32) -> Result<(), CatalogCommandError> {
    let pool = connect().await?;
    delete_row(&CatalogAdmin::new(&pool), kind, id).await?;
    info!(?kind, id, "Catalog row deleted");
    Ok(())
}

/// Render the static homepage into `static_dir`.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the page can't be written.
pub async fn regenerate_index(static_dir: Option<PathBuf>) -> Result<(), CatalogCommandError> {
    let pool = connect().await?;

    let dir = static_dir.unwrap_or_else(|| {
        std::env::var("STOREFRONT_STATIC_DIR")
            .map_or_else(|_| PathBuf::from(DEFAULT_STATIC_DIR), PathBuf::from)
    });

    regenerate_homepage(&pool, &HomepageCache::new(), &dir).await?;
    info!(dir = %dir.display(), "Static homepage written");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SEED: &str = r#"
categories:
  - key: fruit
    name: Fresh fruit
    logo: fruit
goods:
  - key: strawberry
    name: Strawberry
skus:
  - key: strawberry-500g
    category: fruit
    goods: strawberry
    name: Strawberry 500g
    price: "12.50"
    unit: 500g
    stock: 100
goods_banners:
  - sku: strawberry-500g
    image: /static/images/slide.jpg
promotion_banners:
  - name: Weekend deals
    url: /list/1/1
    image: /static/images/adv01.jpg
category_goods:
  - category: fruit
    sku: strawberry-500g
"#;

    #[test]
    fn test_parse_seed() {
        let seed: CatalogSeed = serde_yaml::from_str(SEED).unwrap();
        assert_eq!(seed.categories.len(), 1);
        assert_eq!(seed.categories[0].input.name, "Fresh fruit");
        assert_eq!(seed.skus[0].price.to_string(), "12.50");
        assert_eq!(seed.category_goods[0].display_type, 1);
        assert!(validate(&seed).is_empty());
    }

    #[test]
    fn test_validate_unknown_references() {
        let mut seed: CatalogSeed = serde_yaml::from_str(SEED).unwrap();
        seed.skus[0].category = "veg".to_string();
        seed.goods_banners[0].sku = "missing".to_string();

        let errors = validate(&seed);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("unknown category veg"));
        assert!(errors[1].contains("unknown sku missing"));
    }

    #[test]
    fn test_validate_duplicate_keys() {
        let seed: CatalogSeed = serde_yaml::from_str(
            "categories:\n  - key: a\n    name: A\n  - key: a\n    name: B\n",
        )
        .unwrap();
        assert_eq!(validate(&seed), vec!["duplicate category key a".to_string()]);
    }

    #[test]
    fn test_seed_ids_select_updates() {
        let seed: CatalogSeed = serde_yaml::from_str(
            r"
categories:
  - key: fruit
    id: 3
    name: Fruit
  - key: veg
    name: Vegetables
promotion_banners:
  - id: 7
    name: Weekend deals
    url: /list/1/1
    image: /static/images/adv01.jpg
  - name: New arrivals
    url: /list/2/1
    image: /static/images/adv02.jpg
",
        )
        .unwrap();

        assert_eq!(seed.categories[0].id, Some(CategoryId::new(3)));
        assert_eq!(seed.categories[0].input.name, "Fruit");
        assert_eq!(seed.categories[1].id, None);
        assert_eq!(seed.promotion_banners[0].id, Some(BannerId::new(7)));
        assert_eq!(seed.promotion_banners[0].input.name, "Weekend deals");
        assert_eq!(seed.promotion_banners[1].id, None);
        assert!(validate(&seed).is_empty());
    }

    #[test]
    fn test_catalog_kind_names() {
        assert_eq!(
            CatalogKind::from_str("goods-banner", false).unwrap(),
            CatalogKind::GoodsBanner
        );
        assert_eq!(
            CatalogKind::from_str("category-goods", false).unwrap(),
            CatalogKind::CategoryGoods
        );
        assert!(CatalogKind::from_str("sku", false).is_err());
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(serde_yaml::from_str::<CatalogSeed>("brands: []\n").is_err());
    }
}
