use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::RasidError;
use crate::middleware::HumanEditor;
use crate::router::RasidState;
use crate::types::BalanceHistory;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// Newest first.
pub async fn list_history(
    State(state): State<RasidState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<BalanceHistory>>, RasidError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.storage.list_history(limit).await?))
}

#[derive(Debug, Serialize)]
pub struct Cleared {
    pub deleted: u64,
}

/// Administrative purge of the audit trail.
pub async fn clear_history(
    State(state): State<RasidState>,
    HumanEditor(editor): HumanEditor,
) -> Result<Json<Cleared>, RasidError> {
    let deleted = state.storage.clear_history().await?;
    warn!(deleted, editor = %editor.email, "balance history cleared");
    Ok(Json(Cleared { deleted }))
}
