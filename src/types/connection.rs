use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

use super::{Currency, SourceId};
use crate::config::{MAX_INTERVAL_SECS, MIN_INTERVAL_SECS};
use crate::error::RasidError;

pub type ConnectionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiMethod {
    /// Login-and-balance in one call: body `{email, password, type: "login"}`.
    Post,
    /// Bearer-token read.
    Get,
}

impl ApiMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Post => "POST",
            ApiMethod::Get => "GET",
        }
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastSyncStatus {
    Success,
    Error,
}

impl LastSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LastSyncStatus::Success => "success",
            LastSyncStatus::Error => "error",
        }
    }
}

/// A configured credential/endpoint pair for one partner balance API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConnection {
    pub id: ConnectionId,
    pub source_id: SourceId,
    pub name: String,
    pub api_url: String,
    pub api_method: ApiMethod,
    pub email: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    #[serde(skip_serializing, default)]
    pub auth_token: Option<String>,
    pub currency: Currency,
    pub is_active: bool,
    pub auto_sync: bool,
    pub sync_interval_seconds: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_sync_status: Option<LastSyncStatus>,
    pub last_sync_error: Option<String>,
}

impl ApiConnection {
    /// When the next poll is owed after `last`. `None` if the interval does not
    /// fit the calendar.
    fn next_sync_after(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = i64::try_from(self.sync_interval_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)?;
        last.checked_add_signed(interval)
    }

    /// Whether a timer-driven pass at `now` should poll this connection.
    ///
    /// `window` is the time until the next tick. A connection is polled at the
    /// tick nearest to its due time, so `lastSync` trailing the tick by the time
    /// a pass takes does not push the poll a whole tick late.
    pub fn is_due(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if !self.auto_sync {
            return false;
        }
        let Some(last) = self.last_sync else {
            return true;
        };
        let Some(next) = self.next_sync_after(last) else {
            return false;
        };
        if next <= now {
            return true;
        }
        TimeDelta::from_std(window / 2)
            .ok()
            .and_then(|w| now.checked_add_signed(w))
            .is_some_and(|horizon| next < horizon)
    }

    /// Rejects connections that cannot be called at all, before any network I/O.
    pub fn preflight(&self) -> Result<(), RasidError> {
        check_endpoint(
            &self.api_url,
            self.api_method,
            self.email.as_deref(),
            self.password.as_deref(),
        )
    }
}

/// Body of create/update requests for a connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInput {
    pub source_id: SourceId,
    pub name: String,
    pub api_url: String,
    pub api_method: ApiMethod,
    #[serde(default)]
    pub email: Option<String>,
    /// On update, `None` keeps the stored secret.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    pub currency: Currency,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub auto_sync: bool,
    #[serde(default = "default_interval")]
    pub sync_interval_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

impl ConnectionInput {
    pub fn validate(&self) -> Result<(), RasidError> {
        if self.name.trim().is_empty() {
            return Err(RasidError::Configuration(
                "connection name must not be empty".to_string(),
            ));
        }
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.sync_interval_seconds) {
            return Err(RasidError::Configuration(format!(
                "syncIntervalSeconds must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS}, got {}",
                self.sync_interval_seconds
            )));
        }
        check_endpoint(
            &self.api_url,
            self.api_method,
            self.email.as_deref(),
            self.password.as_deref(),
        )
    }
}

fn check_endpoint(
    api_url: &str,
    method: ApiMethod,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<(), RasidError> {
    if api_url.trim().is_empty() {
        return Err(RasidError::Configuration("missing apiUrl".to_string()));
    }
    let url = Url::parse(api_url.trim())
        .map_err(|e| RasidError::Configuration(format!("invalid apiUrl `{api_url}`: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RasidError::Configuration(format!(
            "apiUrl must be http(s), got `{}`",
            url.scheme()
        )));
    }
    if method == ApiMethod::Post {
        let present = |v: Option<&str>| v.is_some_and(|s| !s.trim().is_empty());
        if !present(email) || !present(password) {
            return Err(RasidError::Configuration(
                "POST connections require email and password".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ApiConnection {
        ApiConnection {
            id: 1,
            source_id: 7,
            name: "flydubai".to_string(),
            api_url: "https://partner.example/api/balance".to_string(),
            api_method: ApiMethod::Post,
            email: Some("ops@agency.example".to_string()),
            password: Some("secret".to_string()),
            auth_token: None,
            currency: Currency::Iqd,
            is_active: true,
            auto_sync: true,
            sync_interval_seconds: 120,
            last_sync: None,
            last_sync_status: None,
            last_sync_error: None,
        }
    }

    fn input() -> ConnectionInput {
        ConnectionInput {
            source_id: 7,
            name: "flydubai".to_string(),
            api_url: "https://partner.example/api/balance".to_string(),
            api_method: ApiMethod::Get,
            email: None,
            password: None,
            auth_token: Some("token".to_string()),
            currency: Currency::Iqd,
            is_active: true,
            auto_sync: true,
            sync_interval_seconds: 60,
        }
    }

    #[test]
    fn due_respects_interval_and_auto_sync() {
        let now = Utc::now();
        let mut c = conn();
        assert!(c.is_due(now, Duration::ZERO));

        c.last_sync = Some(now - TimeDelta::seconds(60));
        assert!(!c.is_due(now, Duration::ZERO));

        c.last_sync = Some(now - TimeDelta::seconds(120));
        assert!(c.is_due(now, Duration::ZERO));

        c.auto_sync = false;
        assert!(!c.is_due(now, Duration::ZERO));
    }

    #[test]
    fn interval_equal_to_tick_is_due_every_tick() {
        // Polled 800ms into the previous tick; the next tick is exactly 120s later.
        let tick = Utc::now();
        let mut c = conn();
        c.last_sync = Some(tick - TimeDelta::seconds(120) + TimeDelta::milliseconds(800));
        assert!(!c.is_due(tick, Duration::ZERO));
        assert!(c.is_due(tick, Duration::from_secs(120)));

        // A longer interval waits for the tick nearest to it.
        c.sync_interval_seconds = 300;
        assert!(!c.is_due(tick, Duration::from_secs(120)));
        c.last_sync = Some(tick - TimeDelta::seconds(240) + TimeDelta::milliseconds(800));
        assert!(!c.is_due(tick, Duration::from_secs(120)));
        c.last_sync = Some(tick - TimeDelta::seconds(250));
        assert!(c.is_due(tick, Duration::from_secs(120)));
    }

    #[test]
    fn oversized_interval_is_never_due() {
        let now = Utc::now();
        let mut c = conn();
        c.last_sync = Some(now - TimeDelta::days(365));
        for interval in [u64::MAX, i64::MAX as u64, 1 << 62] {
            c.sync_interval_seconds = interval;
            assert_eq!(c.next_sync_after(now), None);
            assert!(!c.is_due(now, Duration::from_secs(300)));
        }
    }

    #[test]
    fn interval_is_bounded_on_input() {
        assert!(input().validate().is_ok());
        for interval in [0, MIN_INTERVAL_SECS - 1, MAX_INTERVAL_SECS + 1, u64::MAX] {
            let mut bad = input();
            bad.sync_interval_seconds = interval;
            assert!(
                matches!(bad.validate(), Err(RasidError::Configuration(_))),
                "{interval} accepted"
            );
        }
        let mut edge = input();
        edge.sync_interval_seconds = MAX_INTERVAL_SECS;
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn preflight_requires_post_credentials() {
        let mut c = conn();
        assert!(c.preflight().is_ok());
        c.password = None;
        assert!(matches!(c.preflight(), Err(RasidError::Configuration(_))));
    }

    #[test]
    fn preflight_rejects_bad_urls() {
        let mut c = conn();
        c.api_method = ApiMethod::Get;
        c.api_url = "".to_string();
        assert!(c.preflight().is_err());
        c.api_url = "ftp://partner.example".to_string();
        assert!(c.preflight().is_err());
        c.api_url = "https://partner.example/wallet".to_string();
        assert!(c.preflight().is_ok());
    }

    #[test]
    fn secrets_are_not_serialized() {
        let json = serde_json::to_value(conn()).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("authToken").is_none());
        assert_eq!(json["apiMethod"], "POST");
    }
}
