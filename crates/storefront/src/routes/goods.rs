//! Catalog route handlers: SKU detail and category listing.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::instrument;

use freshmart_core::{CategoryId, Paginator, SkuId};

use super::PageHeader;
use crate::error::Result;
use crate::filters;
use crate::middleware::OptionalAuth;
use crate::models::{Category, Goods, ListSort, Sku, SkuComment};
use crate::state::AppState;

/// SKUs per category listing page.
pub const LIST_PER_PAGE: u32 = 10;

/// Newest SKUs shown beside a detail or listing page.
const NEW_SKUS: i64 = 2;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub sort: Option<String>,
}

/// SKU detail page template.
#[derive(Template, WebTemplate)]
#[template(path = "detail.html")]
pub struct DetailTemplate {
    pub header: PageHeader,
    pub categories: Vec<Category>,
    pub sku: Sku,
    pub goods: Option<Goods>,
    pub siblings: Vec<Sku>,
    pub new_skus: Vec<Sku>,
    pub comments: Vec<SkuComment>,
}

/// Category listing template.
#[derive(Template, WebTemplate)]
#[template(path = "list.html")]
pub struct ListTemplate {
    pub header: PageHeader,
    pub categories: Vec<Category>,
    pub category: Category,
    pub skus: Vec<Sku>,
    pub new_skus: Vec<Sku>,
    pub sort: &'static str,
    pub page: u32,
    pub num_pages: u32,
    pub pages: Vec<u32>,
}

/// Display a SKU and record the visit in the user's browsing history.
///
/// Unknown SKUs send the visitor back to the home page.
#[instrument(skip(state, user))]
pub async fn detail(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(sku_id): Path<String>,
) -> Result<Response> {
    let catalog = state.catalog();

    let Ok(sku_id) = sku_id.parse::<SkuId>() else {
        return Ok(Redirect::to("/").into_response());
    };
    let Some(sku) = catalog.sku(sku_id).await? else {
        return Ok(Redirect::to("/").into_response());
    };

    let goods = catalog.goods(sku.goods_id).await?;
    let siblings = catalog.sibling_skus(sku.goods_id, sku.id).await?;
    let new_skus = catalog.newest_in_category(sku.category_id, NEW_SKUS).await?;
    let comments = catalog.sku_comments(sku.id).await?;
    let categories = catalog.categories().await?;

    if let Some(user) = &user {
        state.history().record_view(user.id, sku.id).await?;
    }

    let header = PageHeader::load(&state, user).await?;
    Ok(DetailTemplate {
        header,
        categories,
        sku,
        goods,
        siblings,
        new_skus,
        comments,
    }
    .into_response())
}

/// Display one page of a category.
///
/// An unknown category goes back to the home page; a bad or out-of-range
/// page number shows the first page.
#[instrument(skip(state, user, query))]
pub async fn list(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path((category_id, page)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let catalog = state.catalog();

    let Ok(category_id) = category_id.parse::<CategoryId>() else {
        return Ok(Redirect::to("/").into_response());
    };
    let Some(category) = catalog.category(category_id).await? else {
        return Ok(Redirect::to("/").into_response());
    };

    let sort = ListSort::from_param(query.sort.as_deref());
    let paginator = Paginator::new(catalog.count_in_category(category.id).await?, LIST_PER_PAGE);
    let page = paginator.clamp_page(page.trim().parse().unwrap_or(1));

    let skus = catalog
        .list_in_category(
            category.id,
            sort,
            i64::from(LIST_PER_PAGE),
            paginator.offset(page),
        )
        .await?;
    let new_skus = catalog.newest_in_category(category.id, NEW_SKUS).await?;
    let categories = catalog.categories().await?;

    let header = PageHeader::load(&state, user).await?;
    Ok(ListTemplate {
        header,
        categories,
        category,
        skus,
        new_skus,
        sort: sort.as_param(),
        page,
        num_pages: paginator.num_pages(),
        pages: paginator.window(page),
    }
    .into_response())
}
