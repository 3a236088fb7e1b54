use std::time::Duration;

use reqwest::StatusCode;
use tracing::info;

use super::{BillingRecord, BillingSubmitter};
use crate::config::BillingConfig;
use crate::error::{SessionError, SessionResult};

/// Posts billing records to the platform REST API
pub struct HttpBillingClient {
    endpoint: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl HttpBillingClient {
    pub fn new(
        api_url: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::BillingSubmission(format!("HTTP client: {}", e)))?;

        let endpoint = format!("{}/billing/", api_url.trim_end_matches('/'));
        info!("Billing client initialized: {}", endpoint);

        Ok(Self {
            endpoint,
            access_token,
            client,
        })
    }

    pub fn from_config(cfg: &BillingConfig, access_token: Option<String>) -> SessionResult<Self> {
        Self::new(&cfg.api_url, access_token, Duration::from_secs(cfg.timeout_secs))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl BillingSubmitter for HttpBillingClient {
    async fn submit(&self, record: &BillingRecord) -> SessionResult<()> {
        let mut request = self.client.post(&self.endpoint).json(record);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::BillingSubmission(e.to_string()))?;

        match response.status() {
            StatusCode::CREATED => Ok(()),
            status => Err(SessionError::BillingSubmission(format!(
                "unexpected status {}",
                status
            ))),
        }
    }
}
