mod cache;
mod entities;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::{application::content::ContentService, cache::CacheRuntime};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub cache: Arc<CacheRuntime>,
    pub content: Arc<ContentService>,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/cache/purge", post(cache::purge))
        .route("/admin/cache/cooldown", post(cache::engage_cooldown))
        .route("/admin/cache/status", get(cache::status))
        .route(
            "/admin/entities/{id}",
            put(entities::save).delete(entities::delete),
        )
        .route("/admin/entities/{id}/status", post(entities::set_status))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
