use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BalanceId, Currency, Editor};
use crate::error::RasidError;

pub type HistoryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Created,
    Updated,
    Deleted,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Updated => "updated",
            HistoryAction::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, RasidError> {
        match s {
            "created" => Ok(HistoryAction::Created),
            "updated" => Ok(HistoryAction::Updated),
            "deleted" => Ok(HistoryAction::Deleted),
            other => Err(RasidError::Configuration(format!(
                "unknown history action `{other}`"
            ))),
        }
    }
}

/// One immutable audit row for a balance mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceHistory {
    pub id: HistoryId,
    #[serde(flatten)]
    pub entry: HistoryEntry,
}

/// History row before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub balance_id: BalanceId,
    pub source_name: String,
    pub action: HistoryAction,
    pub old_amount: Option<f64>,
    pub new_amount: Option<f64>,
    pub old_currency: Option<Currency>,
    pub new_currency: Option<Currency>,
    pub old_notes: Option<String>,
    pub new_notes: Option<String>,
    pub changes: String,
    pub timestamp: DateTime<Utc>,
    pub updated_by: Editor,
}
