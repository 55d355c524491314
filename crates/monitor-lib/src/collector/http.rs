//! HTTP usage source
//!
//! Polls a JSON usage endpoint for one provider and converts the report into
//! a validated [`UsageSample`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{AuthScheme, Credentials, ProviderSpec, UsageSource};
use crate::error::{MonitorError, Result};
use crate::models::UsageSample;

/// Default request timeout for usage endpoints
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Usage report body returned by a usage endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub requests_per_hour: f64,
    pub estimated_cost: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Usage source backed by an HTTP endpoint
pub struct HttpUsageSource {
    service: String,
    client: Client,
    endpoint: Url,
    auth: AuthScheme,
    secret: String,
}

impl HttpUsageSource {
    /// Create a source for a configured provider
    pub fn new(provider: &ProviderSpec, endpoint: &str, credentials: &Credentials) -> Result<Self> {
        let secret = credentials.get(provider.secret).ok_or_else(|| {
            MonitorError::fetch(provider.name, format!("missing credential {}", provider.secret))
        })?;

        Self::with_timeout(
            provider.name,
            endpoint,
            provider.auth,
            secret,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Create a source with explicit settings
    pub fn with_timeout(
        service: &str,
        endpoint: &str,
        auth: AuthScheme,
        secret: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| MonitorError::fetch(service, format!("invalid endpoint: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::fetch(service, format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            service: service.to_string(),
            client,
            endpoint,
            auth,
            secret: secret.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth {
            AuthScheme::Bearer => request.bearer_auth(&self.secret),
            AuthScheme::Token => {
                request.header(reqwest::header::AUTHORIZATION, format!("token {}", self.secret))
            }
            AuthScheme::ApiKeyAndBearer => request
                .header("apikey", &self.secret)
                .bearer_auth(&self.secret),
        }
    }
}

#[async_trait]
impl UsageSource for HttpUsageSource {
    fn service(&self) -> &str {
        &self.service
    }

    async fn fetch_usage(&self) -> Result<UsageSample> {
        let request = self
            .client
            .get(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json");

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| MonitorError::fetch(&self.service, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::fetch(
                &self.service,
                format!("API error ({}): {}", status, body),
            ));
        }

        let report: UsageReport = response.json().await.map_err(|e| MonitorError::InvalidSample {
            service: self.service.clone(),
            reason: format!("failed to parse usage report: {e}"),
        })?;

        UsageSample::new(
            self.service.clone(),
            report.timestamp.unwrap_or_else(Utc::now),
            report.requests_per_hour,
            report.estimated_cost,
        )
    }
}
