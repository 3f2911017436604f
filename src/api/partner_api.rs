use crate::config::SyncSettings;
use crate::error::{ClientError, IsRetryable, RasidError};
use crate::types::{ApiConnection, ApiMethod};
use backon::{ExponentialBuilder, Retryable};
use reqwest::header::ACCEPT;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Body of a POST login-and-balance call.
#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Stateless caller for partner balance endpoints.
#[derive(Clone)]
pub struct PartnerClient {
    http: reqwest::Client,
    retry_max_times: usize,
}

impl PartnerClient {
    pub fn new(settings: &SyncSettings, proxy: Option<&Url>) -> Result<Self, RasidError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("rasid/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10));
        if let Some(proxy_url) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }
        Ok(Self {
            http: builder.build()?,
            retry_max_times: settings.retry_max_times,
        })
    }

    /// Fetch the raw balance body, retrying transient failures. Decoding the
    /// body is the normalizer's job.
    pub async fn fetch_balance(
        &self,
        conn: &ApiConnection,
        timeout: Duration,
    ) -> Result<Vec<u8>, ClientError> {
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(3))
            .with_max_times(self.retry_max_times)
            .with_jitter();

        (|| async { self.request_once(conn, timeout).await })
            .retry(retry_policy)
            .when(|e: &ClientError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(
                    connection = %conn.name,
                    error = %err,
                    "partner call failed, retrying after {:?}",
                    dur
                );
            })
            .await
    }

    /// One attempt, no retries.
    pub async fn request_once(
        &self,
        conn: &ApiConnection,
        timeout: Duration,
    ) -> Result<Vec<u8>, ClientError> {
        let request = match conn.api_method {
            ApiMethod::Post => self.http.post(conn.api_url.trim()).json(&LoginBody {
                email: conn.email.as_deref().unwrap_or_default(),
                password: conn.password.as_deref().unwrap_or_default(),
                kind: "login",
            }),
            ApiMethod::Get => {
                let request = self.http.get(conn.api_url.trim());
                match conn.auth_token.as_deref().filter(|t| !t.trim().is_empty()) {
                    Some(token) => request.bearer_auth(token.trim()),
                    None => request,
                }
            }
        };

        let resp = request
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))?;

        let status = resp.status();
        debug!(connection = %conn.name, %status, "partner responded");
        if !status.is_success() {
            return Err(ClientError::from_status(status));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))?;
        Ok(body.to_vec())
    }
}
