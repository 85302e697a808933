use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blocks::catalog::CatalogEvent;
use crate::errors::AppError;
use crate::models::block::Block;
use crate::models::request::RequestContext;
use crate::state::AppState;

/// Request context as passed on the query string.
#[derive(Debug, Default, Deserialize)]
pub struct ContextQuery {
    pub path: Option<String>,
    pub locale: Option<String>,
    /// Comma-separated role ids; absent for anonymous visitors.
    pub roles: Option<String>,
    /// Only read by routes whose path doesn't name a theme.
    pub theme: Option<String>,
}

impl ContextQuery {
    pub fn to_context(&self, theme: &str, default_locale: &str) -> RequestContext {
        let roles = self
            .roles
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty());
        RequestContext::new(
            self.path.clone().unwrap_or_else(|| "/".to_string()),
            self.locale
                .clone()
                .unwrap_or_else(|| default_locale.to_string()),
            theme,
        )
        .with_roles(roles)
    }
}

#[derive(Serialize)]
pub struct RegionListingResponse {
    pub theme: String,
    pub region: String,
    pub blocks: Vec<Block>,
}

#[derive(Serialize)]
pub struct AllowedResponse {
    pub block_id: Uuid,
    pub allowed: bool,
}

#[derive(Deserialize)]
pub struct ListenersUpdate {
    pub listeners: Vec<String>,
}

fn ensure_region(state: &AppState, theme: &str, region: &str) -> Result<(), AppError> {
    let known = state
        .composer
        .themes()
        .get(theme)
        .is_some_and(|t| t.has_region(region));
    if known {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("Region {theme}/{region} not found")))
    }
}

/// GET /api/v1/regions/:theme/:region
pub async fn handle_region(
    State(state): State<AppState>,
    Path((theme, region)): Path<(String, String)>,
    Query(params): Query<ContextQuery>,
) -> Result<Json<RegionListingResponse>, AppError> {
    ensure_region(&state, &theme, &region)?;
    let ctx = params.to_context(&theme, &state.default_locale);
    let blocks = state.composer.list_for(&theme, &region, &ctx).await;
    Ok(Json(RegionListingResponse {
        theme,
        region,
        blocks,
    }))
}

/// GET /api/v1/regions/:theme/:region/all
pub async fn handle_region_all(
    State(state): State<AppState>,
    Path((theme, region)): Path<(String, String)>,
) -> Result<Json<RegionListingResponse>, AppError> {
    ensure_region(&state, &theme, &region)?;
    let blocks = state.composer.list_all_for(&theme, &region).await;
    Ok(Json(RegionListingResponse {
        theme,
        region,
        blocks,
    }))
}

/// GET /api/v1/blocks/:id/allowed
pub async fn handle_block_allowed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ContextQuery>,
) -> Result<Json<AllowedResponse>, AppError> {
    let theme = params
        .theme
        .clone()
        .unwrap_or_else(|| state.composer.themes().front.id.clone());
    let ctx = params.to_context(&theme, &state.default_locale);
    let allowed = state
        .composer
        .is_block_allowed(id, &ctx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Block {id} not found")))?;
    Ok(Json(AllowedResponse {
        block_id: id,
        allowed,
    }))
}

/// GET /api/v1/blocks/unused
pub async fn handle_unused(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.composer.unused().await)
}

/// POST /api/v1/blocks/events
pub async fn handle_catalog_event(
    State(state): State<AppState>,
    Json(event): Json<CatalogEvent>,
) -> StatusCode {
    state.composer.handle_event(&event).await;
    StatusCode::NO_CONTENT
}

/// POST /api/v1/blocks/cache/clear
pub async fn handle_clear_cache(State(state): State<AppState>) -> StatusCode {
    state.composer.clear_cache().await;
    StatusCode::NO_CONTENT
}

/// PUT /api/v1/plugins/listeners
pub async fn handle_replace_listeners(
    State(state): State<AppState>,
    Json(req): Json<ListenersUpdate>,
) -> Result<StatusCode, AppError> {
    if req.listeners.iter().any(|l| l.trim().is_empty()) {
        return Err(AppError::Validation(
            "Listener keys must not be blank".to_string(),
        ));
    }
    state.listeners.replace_listeners(&req.listeners);
    state.composer.plugins_changed().await;
    Ok(StatusCode::NO_CONTENT)
}
