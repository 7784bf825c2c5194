//! Shared JSON-over-HTTP plumbing for the data providers

use crate::error::SearchError;
use crate::Result;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

/// Pooled client plus base URL for one provider.
#[derive(Clone)]
pub struct ProviderHttp {
    client: Client,
    base_url: String,
    name: &'static str,
}

impl ProviderHttp {
    pub fn new(name: &'static str, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            name,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(format!("{}{}", self.base_url, path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(format!("{}{}", self.base_url, path))
    }

    /// Send and decode a JSON body; non-2xx becomes `UpstreamStatus`.
    pub async fn send_json(&self, request: RequestBuilder, path: &str) -> Result<Value> {
        let response = request.send().await.map_err(|e| {
            SearchError::ProviderError(format!("{} request failed for {}: {}", self.name, path, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::UpstreamStatus {
                status: status.as_u16(),
                body: format!("{} {}: {}", self.name, path, body),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            SearchError::ProviderError(format!("{} returned invalid JSON for {}: {}", self.name, path, e))
        })
    }
}

pub fn require_key(provider: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        Err(SearchError::ConfigError(format!("{} API key is not configured", provider)))
    } else {
        Ok(())
    }
}
