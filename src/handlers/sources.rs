use axum::{Json, extract::State, http::StatusCode};
use tracing::info;

use crate::RasidError;
use crate::router::RasidState;
use crate::types::{BalanceSource, NewSource};

pub async fn list_sources(
    State(state): State<RasidState>,
) -> Result<Json<Vec<BalanceSource>>, RasidError> {
    Ok(Json(state.storage.list_sources().await?))
}

pub async fn create_source(
    State(state): State<RasidState>,
    Json(source): Json<NewSource>,
) -> Result<(StatusCode, Json<BalanceSource>), RasidError> {
    if source.name.trim().is_empty() {
        return Err(RasidError::Configuration(
            "source name must not be empty".to_string(),
        ));
    }
    let created = state.storage.insert_source(&source).await?;
    info!(id = created.id, name = %created.name, "source created");
    Ok((StatusCode::CREATED, Json(created)))
}
