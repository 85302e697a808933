pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::blocks::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Region listings (request path)
        .route(
            "/api/v1/regions/:theme/:region",
            get(handlers::handle_region),
        )
        .route(
            "/api/v1/regions/:theme/:region/all",
            get(handlers::handle_region_all),
        )
        // Block administration
        .route("/api/v1/blocks/unused", get(handlers::handle_unused))
        .route(
            "/api/v1/blocks/:id/allowed",
            get(handlers::handle_block_allowed),
        )
        .route("/api/v1/blocks/events", post(handlers::handle_catalog_event))
        .route(
            "/api/v1/blocks/cache/clear",
            post(handlers::handle_clear_cache),
        )
        // Plugin state
        .route(
            "/api/v1/plugins/listeners",
            put(handlers::handle_replace_listeners),
        )
        .with_state(state)
}
