//! Order route handlers: checkout, commit, payment and reviews.

use std::collections::HashMap;

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::instrument;

use freshmart_core::{OrderId, SkuId};

use super::PageHeader;
use crate::db::RepositoryError;
use crate::error::{ApiReply, Result};
use crate::filters;
use crate::middleware::{RequireAuth, RequireAuthJson};
use crate::models::{CurrentUser, OrderInfo, OrderLineView};
use crate::services::orders::{COMMIT_OK, Checkout, CommitForm, parse_comments};
use crate::services::payment::PAYMENT_OK;
use crate::state::AppState;

/// Where review failures land.
const ORDERS_PAGE: &str = "/user/order/1";

/// Body of the pay and check endpoints.
#[derive(Debug, Deserialize)]
pub struct PaymentForm {
    pub order_id: Option<String>,
}

/// Checkout page template.
#[derive(Template, WebTemplate)]
#[template(path = "place_order.html")]
pub struct PlaceOrderTemplate {
    pub header: PageHeader,
    pub checkout: Checkout,
}

/// Review form template.
#[derive(Template, WebTemplate)]
#[template(path = "order_comment.html")]
pub struct CommentTemplate {
    pub header: PageHeader,
    pub order: OrderInfo,
    pub lines: Vec<OrderLineView>,
}

/// Display the checkout page for the ticked cart lines.
///
/// The cart page posts one `sku_ids` field per ticked line.
#[instrument(skip(state, user, form), fields(user_id = %user.id))]
pub async fn place(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Form(form): Form<Vec<(String, String)>>,
) -> Result<Response> {
    let sku_ids: Vec<SkuId> = form
        .iter()
        .filter(|(key, _)| key == "sku_ids")
        .filter_map(|(_, value)| value.parse().ok())
        .collect();

    if sku_ids.is_empty() {
        return Ok(Redirect::to("/cart/").into_response());
    }

    let checkout = state.orders().checkout(user.id, &sku_ids).await?;
    let header = PageHeader::load(&state, Some(user)).await?;
    Ok(PlaceOrderTemplate { header, checkout }.into_response())
}

/// Create the order. Replies `res = 6` with the new `order_id`.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn commit(
    State(state): State<AppState>,
    RequireAuthJson(user): RequireAuthJson,
    Form(form): Form<CommitForm>,
) -> Result<ApiReply> {
    match state.orders().commit(user.id, &form).await {
        Ok(order_id) => Ok(ApiReply::success(COMMIT_OK, "order created")
            .with("order_id", order_id.to_string())),
        Err(e) => e.into_reply(),
    }
}

/// Start an Alipay payment. Replies `res = 3` with the `pay_url`.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn pay(
    State(state): State<AppState>,
    RequireAuthJson(user): RequireAuthJson,
    Form(form): Form<PaymentForm>,
) -> Result<ApiReply> {
    match state.payments().pay(user.id, form.order_id.as_deref()).await {
        Ok(url) => Ok(ApiReply::success(PAYMENT_OK, "redirecting to payment").with("pay_url", url)),
        Err(e) => e.into_reply(),
    }
}

/// Wait until the gateway settles the payment, bounded by the poll deadline.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn check(
    State(state): State<AppState>,
    RequireAuthJson(user): RequireAuthJson,
    Form(form): Form<PaymentForm>,
) -> Result<ApiReply> {
    match state.payments().check(user.id, form.order_id.as_deref()).await {
        Ok(()) => Ok(ApiReply::success(PAYMENT_OK, "payment succeeded")),
        Err(e) => e.into_reply(),
    }
}

/// The user's order if it exists and is open for reviews.
async fn reviewable_order(
    state: &AppState,
    user: &CurrentUser,
    raw_order_id: &str,
) -> Result<Option<OrderInfo>> {
    let Ok(order_id) = raw_order_id.parse::<OrderId>() else {
        return Ok(None);
    };
    let order = state.order_records().get_owned(user.id, order_id).await?;
    Ok(order.filter(|o| o.status.can_comment()))
}

/// Display the review form.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn comment_page(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(order_id): Path<String>,
) -> Result<Response> {
    let Some(order) = reviewable_order(&state, &user, &order_id).await? else {
        return Ok(Redirect::to(ORDERS_PAGE).into_response());
    };

    let lines = state.order_records().lines(order.order_id).await?;
    let header = PageHeader::load(&state, Some(user)).await?;
    Ok(CommentTemplate {
        header,
        order,
        lines,
    }
    .into_response())
}

/// Save reviews and move the order to `reviewed`.
///
/// Rejected or malformed reviews also land on the order list.
#[instrument(skip(state, user, form), fields(user_id = %user.id))]
pub async fn comment(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(order_id): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Redirect> {
    let Some(order) = reviewable_order(&state, &user, &order_id).await? else {
        return Ok(Redirect::to(ORDERS_PAGE));
    };
    let Some(comments) = parse_comments(&form) else {
        tracing::debug!(order_id = %order.order_id, "Malformed review form");
        return Ok(Redirect::to(ORDERS_PAGE));
    };

    match state
        .order_records()
        .save_comments(order.order_id, &comments)
        .await
    {
        Ok(()) => {
            tracing::info!(order_id = %order.order_id, lines = comments.len(), "Order reviewed");
        }
        Err(RepositoryError::NotFound) => {
            tracing::debug!(order_id = %order.order_id, "Review names a line not in the order");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Redirect::to(ORDERS_PAGE))
}
