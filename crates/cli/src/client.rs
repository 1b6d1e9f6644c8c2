//! Clients for the advisor's endpoints

use advisor_lib::grpc::connect_uds;
use advisor_lib::proto::{CpuAdvisorClient, CpuPluginClient};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tonic::transport::Channel;
use url::Url;

/// HTTP client for the advisor health API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request. Error statuses still carry a JSON body on the
    /// health endpoints, so the body is decoded regardless of status.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        serde_json::from_str(&body)
            .with_context(|| format!("API error ({}): {}", status, body))
    }
}

/// Health report returned by `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub components: HashMap<String, ComponentReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

/// Readiness returned by `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub ready: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn dial(socket: &str, timeout: Duration) -> Result<Channel> {
    connect_uds(socket, timeout)
        .await
        .with_context(|| format!("Failed to connect to {}", socket))
}

pub async fn advisor_client(socket: &str, timeout: Duration) -> Result<CpuAdvisorClient<Channel>> {
    Ok(CpuAdvisorClient::new(dial(socket, timeout).await?))
}

pub async fn plugin_client(socket: &str, timeout: Duration) -> Result<CpuPluginClient<Channel>> {
    Ok(CpuPluginClient::new(dial(socket, timeout).await?))
}
