use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::info;

use crate::application::error::HttpError;
use crate::cache::MAX_LIFETIME_SECONDS;

use super::AdminState;

pub(super) async fn purge(State(state): State<AdminState>) -> Response {
    match state.cache.purge_all().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => HttpError::from_error(
            "infra::http::admin::cache::purge",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Cache purge failed",
            &err,
        )
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct CooldownQuery {
    seconds: u64,
}

/// Suppress cache writes for `seconds`; zero lifts the cooldown.
pub(super) async fn engage_cooldown(
    State(state): State<AdminState>,
    Query(query): Query<CooldownQuery>,
) -> Response {
    if query.seconds > MAX_LIFETIME_SECONDS {
        return HttpError::new(
            "infra::http::admin::cache::engage_cooldown",
            StatusCode::BAD_REQUEST,
            "Cooldown is too long",
            format!(
                "requested {} seconds, limit is {MAX_LIFETIME_SECONDS}",
                query.seconds
            ),
        )
        .into_response();
    }

    state
        .cache
        .cooldown()
        .engage(Duration::from_secs(query.seconds));
    info!(seconds = query.seconds, "write cooldown set by operator");
    Json(state.cache.status()).into_response()
}

pub(super) async fn status(State(state): State<AdminState>) -> Response {
    Json(state.cache.status()).into_response()
}
