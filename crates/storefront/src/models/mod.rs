//! Domain models and view DTOs for the storefront.
//!
//! Row types derive `sqlx::FromRow` directly; the `*View` structs are
//! computed for templates and never written back.

pub mod address;
pub mod catalog;
pub mod order;
pub mod session;
pub mod user;

pub use address::{Address, NewAddress};
pub use catalog::{
    Category, CategoryGoodsInput, CategoryInput, CategorySection, CategoryTile, Goods,
    GoodsBanner, GoodsBannerInput, GoodsInput, HomepageData, ListSort, PromotionBanner,
    PromotionBannerInput, Sku, SkuComment, SkuInput,
};
pub use order::{CartLineView, OrderInfo, OrderLineView, OrderView};
pub use session::{CurrentUser, keys as session_keys};
pub use user::User;
