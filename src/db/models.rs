use crate::error::RasidError;
use crate::types::{
    ApiConnection, ApiMethod, Balance, BalanceHistory, BalanceSource, BalanceType, Currency,
    Editor, HistoryAction, HistoryEntry, LastSyncStatus, Limits, Ownership,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbSource {
    pub id: i64,
    pub name: String,
    pub source_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbConnection {
    pub id: i64,
    pub source_id: i64,
    pub name: String,
    pub api_url: String,
    pub api_method: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub auth_token: Option<String>,
    pub currency: String,
    pub is_active: bool,
    pub auto_sync: bool,
    pub sync_interval_seconds: i64,
    pub last_sync: Option<String>,
    pub last_sync_status: Option<String>,
    pub last_sync_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbBalance {
    pub id: i64,
    pub source_id: i64,
    pub source_name: String,
    pub amount: f64,
    pub currency: String,
    pub balance_type: String,
    pub limit_red: Option<f64>,
    pub limit_yellow: Option<f64>,
    pub limit_green: Option<f64>,
    pub is_auto_sync: bool,
    pub api_source: Option<String>,
    pub notes: Option<String>,
    pub last_updated: String,
    pub last_updated_by_email: String,
    pub last_updated_by_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbHistory {
    pub id: i64,
    pub balance_id: i64,
    pub source_name: String,
    pub action: String,
    pub old_amount: Option<f64>,
    pub new_amount: Option<f64>,
    pub old_currency: Option<String>,
    pub new_currency: Option<String>,
    pub old_notes: Option<String>,
    pub new_notes: Option<String>,
    pub changes: String,
    pub timestamp: String,
    pub updated_by_email: String,
    pub updated_by_name: String,
}

fn decode_err(msg: impl Into<String>) -> RasidError {
    RasidError::DatabaseError(sqlx::Error::Decode(msg.into().into()))
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, RasidError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_err(format!("bad timestamp `{s}`: {e}")))
}

fn parse_currency(s: &str) -> Result<Currency, RasidError> {
    s.parse().map_err(|e: RasidError| decode_err(e.to_string()))
}

fn parse_method(s: &str) -> Result<ApiMethod, RasidError> {
    match s {
        "POST" => Ok(ApiMethod::Post),
        "GET" => Ok(ApiMethod::Get),
        other => Err(decode_err(format!("unknown api_method `{other}`"))),
    }
}

fn parse_sync_status(s: &str) -> Result<LastSyncStatus, RasidError> {
    match s {
        "success" => Ok(LastSyncStatus::Success),
        "error" => Ok(LastSyncStatus::Error),
        other => Err(decode_err(format!("unknown last_sync_status `{other}`"))),
    }
}

impl TryFrom<DbSource> for BalanceSource {
    type Error = RasidError;

    fn try_from(d: DbSource) -> Result<Self, Self::Error> {
        Ok(BalanceSource {
            id: d.id,
            name: d.name,
            source_type: BalanceType::parse(&d.source_type)
                .map_err(|e| decode_err(e.to_string()))?,
        })
    }
}

impl TryFrom<DbConnection> for ApiConnection {
    type Error = RasidError;

    fn try_from(d: DbConnection) -> Result<Self, Self::Error> {
        Ok(ApiConnection {
            id: d.id,
            source_id: d.source_id,
            name: d.name,
            api_url: d.api_url,
            api_method: parse_method(&d.api_method)?,
            email: d.email,
            password: d.password,
            auth_token: d.auth_token,
            currency: parse_currency(&d.currency)?,
            is_active: d.is_active,
            auto_sync: d.auto_sync,
            sync_interval_seconds: d.sync_interval_seconds.max(0) as u64,
            last_sync: d.last_sync.as_deref().map(parse_ts).transpose()?,
            last_sync_status: d
                .last_sync_status
                .as_deref()
                .map(parse_sync_status)
                .transpose()?,
            last_sync_error: d.last_sync_error,
        })
    }
}

impl TryFrom<DbBalance> for Balance {
    type Error = RasidError;

    fn try_from(d: DbBalance) -> Result<Self, Self::Error> {
        let limits = match (d.limit_red, d.limit_yellow, d.limit_green) {
            (Some(red), Some(yellow), Some(green)) => Some(Limits { red, yellow, green }),
            _ => None,
        };
        let ownership = Ownership::from_fields(d.is_auto_sync, d.api_source)
            .map_err(|e| decode_err(format!("balance {}: {e}", d.id)))?;
        Ok(Balance {
            id: d.id,
            source_id: d.source_id,
            source_name: d.source_name,
            amount: d.amount,
            currency: parse_currency(&d.currency)?,
            balance_type: BalanceType::parse(&d.balance_type)
                .map_err(|e| decode_err(e.to_string()))?,
            limits,
            ownership,
            notes: d.notes,
            last_updated: parse_ts(&d.last_updated)?,
            last_updated_by: Editor {
                email: d.last_updated_by_email,
                name: d.last_updated_by_name,
            },
        })
    }
}

impl TryFrom<DbHistory> for BalanceHistory {
    type Error = RasidError;

    fn try_from(d: DbHistory) -> Result<Self, Self::Error> {
        Ok(BalanceHistory {
            id: d.id,
            entry: HistoryEntry {
                balance_id: d.balance_id,
                source_name: d.source_name,
                action: HistoryAction::parse(&d.action).map_err(|e| decode_err(e.to_string()))?,
                old_amount: d.old_amount,
                new_amount: d.new_amount,
                old_currency: d.old_currency.as_deref().map(parse_currency).transpose()?,
                new_currency: d.new_currency.as_deref().map(parse_currency).transpose()?,
                old_notes: d.old_notes,
                new_notes: d.new_notes,
                changes: d.changes,
                timestamp: parse_ts(&d.timestamp)?,
                updated_by: Editor {
                    email: d.updated_by_email,
                    name: d.updated_by_name,
                },
            },
        })
    }
}
