use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, Uri},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use uuid::Uuid;

use crate::{
    application::error::HttpError,
    cache::{CacheState, ControlContext, response_cache_layer},
    host::EntityId,
    site::{Page, Site, render_page},
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub site: Arc<Site>,
    pub cache: Option<CacheState>,
}

pub fn build_router(state: HttpState) -> Router {
    let routes = Router::new()
        .route("/_preview/{id}", get(preview))
        .fallback(get(site_page))
        .with_state(state.clone());

    let routes = match state.cache {
        Some(cache_state) => routes.layer(middleware::from_fn_with_state(
            cache_state,
            response_cache_layer,
        )),
        None => routes,
    };

    routes
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn site_page(State(state): State<HttpState>, uri: Uri) -> Response {
    match state.site.resolve(uri.path()) {
        Some(page) => render_response(state.site.title(), &page),
        None => not_found(uri.path()),
    }
}

/// Render any live entity regardless of status. Never cached.
async fn preview(State(state): State<HttpState>, Path(id): Path<Uuid>) -> Response {
    let Some(entity) = state.site.get(EntityId(id)) else {
        return not_found(&format!("/_preview/{id}"));
    };
    let mut response = render_response(state.site.title(), &Page::Entity(entity));
    response.extensions_mut().insert(ControlContext);
    response
}

fn render_response(site_title: &str, page: &Page) -> Response {
    match render_page(site_title, page) {
        Ok(html) => Html(html).into_response(),
        Err(err) => HttpError::from_error(
            "infra::http::public::render_response",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Template rendering failed",
            &err,
        )
        .into_response(),
    }
}

fn not_found(path: &str) -> Response {
    HttpError::new(
        "infra::http::public::not_found",
        StatusCode::NOT_FOUND,
        "Page not found",
        format!("no page routed at `{path}`"),
    )
    .into_response()
}
