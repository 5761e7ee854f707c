//! Cart route handlers.
//!
//! The mutation endpoints answer JSON for the page scripts; see
//! [`crate::services::cart`] for the reply codes.

use askama::Template;
use askama_web::WebTemplate;
use axum::{Form, extract::State};
use tracing::instrument;

use freshmart_core::{Money, SkuId};

use super::PageHeader;
use crate::error::{ApiReply, Result};
use crate::filters;
use crate::middleware::{RequireAuth, RequireAuthJson};
use crate::models::CartLineView;
use crate::services::cart::{CART_OK, CartForm, DELETE_OK};
use crate::state::AppState;

/// Cart page template.
#[derive(Template, WebTemplate)]
#[template(path = "cart.html")]
pub struct CartTemplate {
    pub header: PageHeader,
    pub lines: Vec<CartLineView>,
    pub total_count: i32,
    pub total_price: Money,
}

/// Display the cart.
///
/// Lines whose SKU no longer exists are not shown.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<CartTemplate> {
    let cart = state.carts().lines(user.id).await?;
    let ids: Vec<SkuId> = cart.iter().map(|(id, _)| *id).collect();
    let skus = state.catalog().skus_by_ids(&ids).await?;

    let lines: Vec<CartLineView> = skus
        .into_iter()
        .filter_map(|sku| {
            let count = cart.iter().find(|(id, _)| *id == sku.id)?.1;
            Some(CartLineView::new(sku, count))
        })
        .collect();

    let total_count = lines.iter().map(|l| l.count).sum();
    let total_price = lines.iter().map(|l| l.amount).sum();
    let header = PageHeader::load(&state, Some(user)).await?;

    Ok(CartTemplate {
        header,
        lines,
        total_count,
        total_price,
    })
}

/// Add to the cart. Replies with the number of distinct lines.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn add(
    State(state): State<AppState>,
    RequireAuthJson(user): RequireAuthJson,
    Form(form): Form<CartForm>,
) -> Result<ApiReply> {
    match state.cart().add(user.id, &form).await {
        Ok(lines) => Ok(ApiReply::success(CART_OK, "added to cart").with("total_count", lines)),
        Err(e) => e.into_reply(),
    }
}

/// Replace a line's quantity. Replies with the total quantity.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn update(
    State(state): State<AppState>,
    RequireAuthJson(user): RequireAuthJson,
    Form(form): Form<CartForm>,
) -> Result<ApiReply> {
    match state.cart().update(user.id, &form).await {
        Ok(total) => Ok(ApiReply::success(CART_OK, "cart updated").with("total_count", total)),
        Err(e) => e.into_reply(),
    }
}

/// Remove a line. Replies with the total quantity left.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn delete(
    State(state): State<AppState>,
    RequireAuthJson(user): RequireAuthJson,
    Form(form): Form<CartForm>,
) -> Result<ApiReply> {
    match state.cart().delete(user.id, &form).await {
        Ok(total) => Ok(ApiReply::success(DELETE_OK, "removed from cart").with("total_count", total)),
        Err(e) => e.into_delete_reply(),
    }
}
