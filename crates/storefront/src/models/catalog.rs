//! Catalog types: categories, SKUs and homepage content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use freshmart_core::{BannerId, CategoryId, GoodsId, Money, SkuId};

/// A product category.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    /// CSS class of the category icon
    pub logo: String,
    pub image: String,
}

/// A purchasable SKU.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sku {
    pub id: SkuId,
    pub category_id: CategoryId,
    pub goods_id: GoodsId,
    pub name: String,
    pub summary: String,
    pub price: Money,
    pub unit: String,
    pub image: String,
    pub stock: i32,
    pub sales: i32,
}

/// Carousel banner linking to a SKU.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GoodsBanner {
    pub id: BannerId,
    pub sku_id: SkuId,
    pub image: String,
    pub index: i16,
}

/// Promotion banner linking to an arbitrary URL.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PromotionBanner {
    pub id: BannerId,
    pub name: String,
    pub url: String,
    pub image: String,
    pub index: i16,
}

/// A SKU featured in a category row on the homepage.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CategoryTile {
    pub category_id: CategoryId,
    pub sku_id: SkuId,
    pub sku_name: String,
    pub image: String,
    /// 0 = text link, 1 = image tile
    pub display_type: i16,
}

impl CategoryTile {
    pub const TITLE: i16 = 0;
    pub const IMAGE: i16 = 1;
}

/// One category row on the homepage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySection {
    pub category: Category,
    pub title_banners: Vec<CategoryTile>,
    pub image_banners: Vec<CategoryTile>,
}

/// Everything the homepage renders apart from the per-user cart count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HomepageData {
    pub sections: Vec<CategorySection>,
    pub goods_banners: Vec<GoodsBanner>,
    pub promotion_banners: Vec<PromotionBanner>,
}

impl HomepageData {
    /// Group featured tiles under their categories, split by display type.
    #[must_use]
    pub fn assemble(
        categories: Vec<Category>,
        tiles: Vec<CategoryTile>,
        goods_banners: Vec<GoodsBanner>,
        promotion_banners: Vec<PromotionBanner>,
    ) -> Self {
        let sections = categories
            .into_iter()
            .map(|category| {
                let (image_banners, title_banners) = tiles
                    .iter()
                    .filter(|t| t.category_id == category.id)
                    .cloned()
                    .partition(|t| t.display_type == CategoryTile::IMAGE);
                CategorySection {
                    category,
                    title_banners,
                    image_banners,
                }
            })
            .collect();

        Self {
            sections,
            goods_banners,
            promotion_banners,
        }
    }
}

/// The SPU that groups several SKUs.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Goods {
    pub id: GoodsId,
    pub name: String,
    /// Rich-text description shown on the detail page
    pub detail: String,
}

/// A buyer's comment on a SKU, shown on the detail page.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SkuComment {
    pub username: String,
    pub comment: String,
    pub updated_at: DateTime<Utc>,
}

/// Sort order of a category listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSort {
    /// Newest first
    #[default]
    Default,
    /// Cheapest first
    Price,
    /// Best selling first
    Hot,
}

impl ListSort {
    /// Parse the `sort` query parameter; anything unknown is the default order.
    #[must_use]
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("price") => Self::Price,
            Some("hot") => Self::Hot,
            _ => Self::Default,
        }
    }

    #[must_use]
    pub const fn as_param(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Price => "price",
            Self::Hot => "hot",
        }
    }

    /// `ORDER BY` clause for the listing query.
    #[must_use]
    pub const fn order_by(self) -> &'static str {
        match self {
            Self::Default => "id DESC",
            Self::Price => "price ASC, id DESC",
            Self::Hot => "sales DESC, id DESC",
        }
    }
}

// =============================================================================
// Catalog mutation inputs
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryInput {
    pub name: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoodsInput {
    pub name: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkuInput {
    pub category_id: CategoryId,
    pub goods_id: GoodsId,
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

#[derive(Debug, Clone, Deserialize)]
pub struct GoodsBannerInput {
    pub sku_id: SkuId,
    pub image: String,
    #[serde(default)]
    pub index: i16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromotionBannerInput {
    pub name: String,
    pub url: String,
    pub image: String,
    #[serde(default)]
    pub index: i16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryGoodsInput {
    pub category_id: CategoryId,
    pub sku_id: SkuId,
    #[serde(default = "default_display_type")]
    pub display_type: i16,
    #[serde(default)]
    pub index: i16,
}

const fn default_display_type() -> i16 {
    CategoryTile::IMAGE
}
