use axum::{Json, extract::State};

use crate::RasidError;
use crate::api::{ProbeReport, ProbeRequest};
use crate::router::RasidState;

pub async fn probe(
    State(state): State<RasidState>,
    Json(request): Json<ProbeRequest>,
) -> Result<Json<ProbeReport>, RasidError> {
    Ok(Json(state.discovery.probe(request).await?))
}
