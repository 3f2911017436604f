use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::RasidError;
use crate::router::RasidState;
use crate::types::{ApiConnection, ConnectionId, ConnectionInput};

pub async fn list_connections(
    State(state): State<RasidState>,
) -> Result<Json<Vec<ApiConnection>>, RasidError> {
    Ok(Json(state.registry.list().await?))
}

pub async fn get_connection(
    State(state): State<RasidState>,
    Path(id): Path<ConnectionId>,
) -> Result<Json<ApiConnection>, RasidError> {
    Ok(Json(state.registry.get(id).await?))
}

pub async fn create_connection(
    State(state): State<RasidState>,
    Json(input): Json<ConnectionInput>,
) -> Result<(StatusCode, Json<ApiConnection>), RasidError> {
    let created = state.registry.create(input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_connection(
    State(state): State<RasidState>,
    Path(id): Path<ConnectionId>,
    Json(input): Json<ConnectionInput>,
) -> Result<Json<ApiConnection>, RasidError> {
    Ok(Json(state.registry.update(id, input).await?))
}

pub async fn delete_connection(
    State(state): State<RasidState>,
    Path(id): Path<ConnectionId>,
) -> Result<StatusCode, RasidError> {
    state.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveToggle {
    pub is_active: bool,
}

pub async fn set_connection_active(
    State(state): State<RasidState>,
    Path(id): Path<ConnectionId>,
    Json(toggle): Json<ActiveToggle>,
) -> Result<Json<ApiConnection>, RasidError> {
    Ok(Json(state.registry.set_active(id, toggle.is_active).await?))
}
