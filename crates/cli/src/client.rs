//! API client for communicating with the cost agent

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the cost agent's report endpoints
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        // Without a trailing slash, join() would replace the last path segment
        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_with_query(path, &[]).await
    }

    /// Make a GET request with URL-encoded query parameters
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn summary(&self) -> Result<SavingsSummary> {
        self.get("api/v1/summary").await
    }

    pub async fn remediations(&self, service: Option<&str>) -> Result<Vec<Remediation>> {
        match service {
            Some(service) => {
                self.get_with_query("api/v1/remediations", &[("service", service.to_string())])
                    .await
            }
            None => self.get("api/v1/remediations").await,
        }
    }

    pub async fn audit(&self) -> Result<Vec<AuditEntry>> {
        self.get("api/v1/audit").await
    }

    pub async fn observations(&self, limit: usize) -> Result<Vec<Observation>> {
        self.get_with_query("api/v1/observations", &[("limit", limit.to_string())])
            .await
    }

    /// Fetch agent health
    ///
    /// The agent answers 503 with a full report when a component is
    /// unhealthy, so that status is parsed rather than treated as an error.
    pub async fn health(&self) -> Result<HealthReport> {
        let url = self.base_url.join("healthz").context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSavings {
    pub provider: String,
    pub service: String,
    pub count: usize,
    pub savings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsSummary {
    pub count: usize,
    pub total_savings: f64,
    pub per_service: Vec<ServiceSavings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    pub provider: String,
    pub service: String,
    pub workflow: String,
    pub before_cost: f64,
    pub after_cost: f64,
    pub savings: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub provider: String,
    pub service: String,
    pub workflow: String,
    pub deviation_pct: f64,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: String,
    pub provider: String,
    pub service: String,
    pub cost: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub components: BTreeMap<String, ComponentReport>,
}
