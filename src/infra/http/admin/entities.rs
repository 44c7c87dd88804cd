use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    application::content::EntityInput,
    host::{EntityId, EntityStatus},
};

use super::AdminState;

pub(super) async fn save(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(input): Json<EntityInput>,
) -> Response {
    match state.content.save(EntityId(id), input).await {
        Ok(entity) => Json(entity).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct StatusInput {
    status: EntityStatus,
}

#[derive(Debug, Serialize)]
struct StatusChange {
    old: EntityStatus,
    new: EntityStatus,
}

pub(super) async fn set_status(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(input): Json<StatusInput>,
) -> Response {
    match state.content.set_status(EntityId(id), input.status).await {
        Ok(old) => Json(StatusChange {
            old,
            new: input.status,
        })
        .into_response(),
        Err(err) => err.into_response(),
    }
}

pub(super) async fn delete(State(state): State<AdminState>, Path(id): Path<Uuid>) -> Response {
    match state.content.delete(EntityId(id)).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
