//! Exploratory probe for a partner endpoint that is not saved yet.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::normalizer::{self, Amount};
use super::partner_api::PartnerClient;
use crate::config::SyncSettings;
use crate::error::RasidError;
use crate::types::{ApiConnection, ApiMethod, Currency};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    pub api_url: String,
    pub api_method: ApiMethod,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    pub currency: Currency,
}

impl ProbeRequest {
    fn into_connection(self) -> ApiConnection {
        ApiConnection {
            id: 0,
            source_id: 0,
            name: "discovery-probe".to_string(),
            api_url: self.api_url,
            api_method: self.api_method,
            email: self.email,
            password: self.password,
            auth_token: self.auth_token,
            currency: self.currency,
            is_active: false,
            auto_sync: false,
            sync_interval_seconds: 0,
            last_sync: None,
            last_sync_status: None,
            last_sync_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub reachable: bool,
    pub client_error: Option<String>,
    pub raw_response: Option<Value>,
    pub wallet_currencies: Vec<String>,
    pub detected: Option<Amount>,
    pub extraction_error: Option<String>,
}

#[derive(Clone)]
pub struct Discovery {
    client: PartnerClient,
    timeout: Duration,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl Discovery {
    pub fn new(client: PartnerClient, settings: &SyncSettings) -> Self {
        let per_minute = NonZeroU32::new(settings.discovery_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            client,
            timeout: settings.discovery_timeout(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        }
    }

    /// Call the endpoint once with the short timeout and report what the
    /// normalizer makes of the answer. Configuration errors are returned;
    /// partner-side failures are part of the report.
    pub async fn probe(&self, request: ProbeRequest) -> Result<ProbeReport, RasidError> {
        let conn = request.into_connection();
        conn.preflight()?;
        self.limiter.until_ready().await;

        info!(url = %conn.api_url, method = %conn.api_method, "discovery probe");
        let body = match self.client.request_once(&conn, self.timeout).await {
            Ok(body) => body,
            Err(e) => {
                return Ok(ProbeReport {
                    reachable: false,
                    client_error: Some(e.to_string()),
                    raw_response: None,
                    wallet_currencies: Vec::new(),
                    detected: None,
                    extraction_error: None,
                });
            }
        };

        let raw = match normalizer::parse_payload(&body) {
            Ok(raw) => raw,
            Err(e) => {
                return Ok(ProbeReport {
                    reachable: true,
                    client_error: None,
                    raw_response: None,
                    wallet_currencies: Vec::new(),
                    detected: None,
                    extraction_error: Some(e.to_string()),
                });
            }
        };
        let (detected, extraction_error) = match normalizer::normalize(&raw, conn.currency) {
            Ok(amount) => (Some(amount), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Ok(ProbeReport {
            reachable: true,
            client_error: None,
            wallet_currencies: normalizer::wallet_currencies(&raw),
            raw_response: Some(raw),
            detected,
            extraction_error,
        })
    }
}
