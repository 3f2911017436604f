use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

use crate::types::BalanceId;

#[derive(Debug, ThisError)]
pub enum RasidError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Balance {balance_id} is owned by connection `{api_source}`; deactivate it before editing")]
    OwnershipConflict {
        balance_id: BalanceId,
        api_source: String,
    },

    #[error("{collection} record {id} not found")]
    NotFound { collection: &'static str, id: i64 },

    #[error("Partner client error: {0}")]
    Client(#[from] ClientError),

    #[error("Balance extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("Sync pass aborted: {0}")]
    PassAborted(String),

    #[error("Config load error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport and HTTP failures talking to a partner API.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),

    #[error("endpoint not found (HTTP 404)")]
    NotFound,

    #[error("partner server error (HTTP {0})")]
    ServerError(u16),

    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ClientError {
    /// Deterministic mapping from a non-success HTTP status.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => ClientError::Unauthorized(status.as_u16()),
            404 => ClientError::NotFound,
            500..=599 => ClientError::ServerError(status.as_u16()),
            other => ClientError::UnexpectedStatus(other),
        }
    }

    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if let Some(status) = e.status() {
            ClientError::from_status(status)
        } else if e.is_decode() || e.is_body() {
            ClientError::MalformedResponse(e.to_string())
        } else {
            ClientError::NetworkUnreachable(e.to_string())
        }
    }
}

/// The partner answered, but no balance could be read from the payload.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ExtractionError {
    #[error("no balance found for the expected currency")]
    NoBalanceFound,

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Why polling a single connection failed. Persisted as `lastSyncError`.
#[derive(Debug, ThisError)]
pub enum SyncFailure {
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("client: {0}")]
    Client(#[from] ClientError),

    #[error("extraction: {0}")]
    Extraction(#[from] ExtractionError),

    /// The value was read but no balance of the source is owned by this connection.
    #[error("ownership: {0}")]
    Ownership(String),

    #[error("store: {0}")]
    Store(String),
}

impl From<RasidError> for SyncFailure {
    fn from(e: RasidError) -> Self {
        match e {
            RasidError::Configuration(msg) => SyncFailure::Configuration(msg),
            RasidError::Client(e) => SyncFailure::Client(e),
            RasidError::Extraction(e) => SyncFailure::Extraction(e),
            other => SyncFailure::Store(other.to_string()),
        }
    }
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ClientError {
    // Timeouts are final: a hanging partner must not hold the pass for several timeouts.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::NetworkUnreachable(_) | ClientError::ServerError(_)
        )
    }
}

impl IntoResponse for RasidError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            RasidError::Configuration(_) | RasidError::Json(_) | RasidError::UrlParse(_) => {
                (StatusCode::BAD_REQUEST, "CONFIGURATION_ERROR")
            }
            RasidError::OwnershipConflict { .. } => (StatusCode::CONFLICT, "OWNERSHIP_CONFLICT"),
            RasidError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            RasidError::Client(_) | RasidError::Reqwest(_) => {
                (StatusCode::BAD_GATEWAY, "BAD_GATEWAY")
            }
            RasidError::Extraction(_) => (StatusCode::UNPROCESSABLE_ENTITY, "EXTRACTION_ERROR"),
            RasidError::DatabaseError(_)
            | RasidError::RactorError(_)
            | RasidError::PassAborted(_)
            | RasidError::Config(_)
            | RasidError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "An internal server error occurred.".to_string()
        } else {
            self.to_string()
        };
        let body = ApiErrorBody {
            code: code.to_string(),
            message,
        };
        (status, Json(ApiErrorResponse { error: body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_total_and_deterministic() {
        assert_eq!(
            ClientError::from_status(StatusCode::UNAUTHORIZED),
            ClientError::Unauthorized(401)
        );
        assert_eq!(
            ClientError::from_status(StatusCode::FORBIDDEN),
            ClientError::Unauthorized(403)
        );
        assert_eq!(
            ClientError::from_status(StatusCode::NOT_FOUND),
            ClientError::NotFound
        );
        assert_eq!(
            ClientError::from_status(StatusCode::BAD_GATEWAY),
            ClientError::ServerError(502)
        );
        assert_eq!(
            ClientError::from_status(StatusCode::TOO_MANY_REQUESTS),
            ClientError::UnexpectedStatus(429)
        );
    }

    #[test]
    fn failure_messages_carry_kind_prefix() {
        let f: SyncFailure = ClientError::Timeout.into();
        assert_eq!(f.to_string(), "client: request timed out");
        let f: SyncFailure = ExtractionError::NoBalanceFound.into();
        assert!(f.to_string().starts_with("extraction: "));
        let f: SyncFailure = RasidError::Configuration("missing apiUrl".into()).into();
        assert_eq!(f.to_string(), "configuration: missing apiUrl");
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(ClientError::ServerError(503).is_retryable());
        assert!(ClientError::NetworkUnreachable("refused".into()).is_retryable());
        assert!(!ClientError::Timeout.is_retryable());
        assert!(!ClientError::Unauthorized(401).is_retryable());
    }
}
