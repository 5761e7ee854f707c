//! User center route handlers: profile, order history and addresses.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
};
use tracing::instrument;

use super::PageHeader;
use crate::error::Result;
use crate::filters;
use crate::middleware::RequireAuth;
use crate::models::{Address, CurrentUser, OrderView, Sku};
use crate::services::address::AddressForm;
use crate::state::AppState;
use crate::store::HISTORY_LEN;

/// User center page template.
#[derive(Template, WebTemplate)]
#[template(path = "user_center_info.html")]
pub struct UserInfoTemplate {
    pub header: PageHeader,
    pub address: Option<Address>,
    pub history: Vec<Sku>,
}

/// Order history template.
#[derive(Template, WebTemplate)]
#[template(path = "user_center_order.html")]
pub struct UserOrdersTemplate {
    pub header: PageHeader,
    pub orders: Vec<OrderView>,
    pub page: u32,
    pub num_pages: u32,
    pub pages: Vec<u32>,
}

/// Address page template.
#[derive(Template, WebTemplate)]
#[template(path = "user_center_site.html")]
pub struct UserAddressTemplate {
    pub header: PageHeader,
    pub address: Option<Address>,
    pub addresses: Vec<Address>,
    pub error: Option<&'static str>,
}

/// Display the user center: default address and recently viewed SKUs.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn info(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<UserInfoTemplate> {
    let address = state.addresses().default_for(user.id).await?;
    let recent = state.history().recent(user.id, HISTORY_LEN).await?;
    let history = state.catalog().skus_by_ids(&recent).await?;

    let header = PageHeader::load(&state, Some(user)).await?;
    Ok(UserInfoTemplate {
        header,
        address,
        history,
    })
}

/// Display one page of the user's orders, newest first.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn orders(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(page): Path<String>,
) -> Result<UserOrdersTemplate> {
    let page = page.trim().parse().unwrap_or(1);
    let history = state.orders().history(user.id, page).await?;

    let header = PageHeader::load(&state, Some(user)).await?;
    Ok(UserOrdersTemplate {
        header,
        orders: history.orders,
        page: history.page,
        num_pages: history.num_pages,
        pages: history.pages,
    })
}

async fn address_template(
    state: &AppState,
    user: CurrentUser,
    error: Option<&'static str>,
) -> Result<UserAddressTemplate> {
    let addresses = state.addresses().list_for(user.id).await?;
    let address = addresses.iter().find(|a| a.is_default).cloned();
    let header = PageHeader::load(state, Some(user)).await?;
    Ok(UserAddressTemplate {
        header,
        address,
        addresses,
        error,
    })
}

/// Display the address page.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn address_page(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<UserAddressTemplate> {
    address_template(&state, user, None).await
}

/// Add an address. The first one a user adds becomes their default.
#[instrument(skip(state, user, form), fields(user_id = %user.id))]
pub async fn add_address(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Form(form): Form<AddressForm>,
) -> Result<Response> {
    let address = match form.validate() {
        Ok(address) => address,
        Err(e) => {
            tracing::debug!(error = %e, "Address rejected");
            let page = address_template(&state, user, Some(e.user_message())).await?;
            return Ok(page.into_response());
        }
    };

    let created = state.addresses().create(user.id, &address).await?;
    tracing::info!(address_id = %created.id, is_default = created.is_default, "Address added");
    Ok(Redirect::to("/user/address").into_response())
}
