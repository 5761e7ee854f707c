//! Home page route handler.

use std::sync::Arc;

use askama::Template;
use askama_web::WebTemplate;
use axum::extract::State;
use tracing::instrument;

use super::PageHeader;
use crate::error::Result;
use crate::filters;
use crate::middleware::OptionalAuth;
use crate::models::HomepageData;
use crate::state::AppState;

/// Home page template.
#[derive(Template, WebTemplate)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub header: PageHeader,
    pub data: Arc<HomepageData>,
}

/// Display the home page.
///
/// Catalog content comes from the homepage cache; only the header is
/// per-visitor.
#[instrument(skip(state, user))]
pub async fn index(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
) -> Result<IndexTemplate> {
    let data = state.homepage().get_or_load(state.pool()).await?;
    let header = PageHeader::load(&state, user).await?;
    Ok(IndexTemplate { header, data })
}
