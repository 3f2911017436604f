use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::RasidError;
use crate::middleware::HumanEditor;
use crate::router::RasidState;
use crate::types::{BalanceHistory, BalanceId, BalancePatch, BalanceView, Limits, NewBalance};

pub async fn list_balances(
    State(state): State<RasidState>,
) -> Result<Json<Vec<BalanceView>>, RasidError> {
    let balances = state.storage.list_balances().await?;
    Ok(Json(balances.into_iter().map(BalanceView::from).collect()))
}

pub async fn get_balance(
    State(state): State<RasidState>,
    Path(id): Path<BalanceId>,
) -> Result<Json<BalanceView>, RasidError> {
    Ok(Json(state.storage.get_balance(id).await?.into()))
}

pub async fn create_balance(
    State(state): State<RasidState>,
    HumanEditor(editor): HumanEditor,
    Json(new): Json<NewBalance>,
) -> Result<(StatusCode, Json<BalanceView>), RasidError> {
    let created = state.ops.create(new, &editor).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn update_balance(
    State(state): State<RasidState>,
    HumanEditor(editor): HumanEditor,
    Path(id): Path<BalanceId>,
    Json(patch): Json<BalancePatch>,
) -> Result<Json<BalanceView>, RasidError> {
    let updated = state.ops.manual_update(id, patch, &editor).await?;
    Ok(Json(updated.into()))
}

pub async fn delete_balance(
    State(state): State<RasidState>,
    HumanEditor(editor): HumanEditor,
    Path(id): Path<BalanceId>,
) -> Result<StatusCode, RasidError> {
    state.ops.delete(id, &editor).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `{"limits": null}` clears the thresholds.
#[derive(Debug, Deserialize)]
pub struct LimitsBody {
    pub limits: Option<Limits>,
}

pub async fn set_limits(
    State(state): State<RasidState>,
    HumanEditor(editor): HumanEditor,
    Path(id): Path<BalanceId>,
    Json(body): Json<LimitsBody>,
) -> Result<Json<BalanceView>, RasidError> {
    let updated = state.ops.set_limits(id, body.limits, &editor).await?;
    Ok(Json(updated.into()))
}

pub async fn balance_history(
    State(state): State<RasidState>,
    Path(id): Path<BalanceId>,
) -> Result<Json<Vec<BalanceHistory>>, RasidError> {
    Ok(Json(state.storage.history_for_balance(id).await?))
}
