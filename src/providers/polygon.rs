//! Polygon.io market data

use super::http::{require_key, ProviderHttp};
use super::MarketDataProvider;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

pub struct PolygonClient {
    http: ProviderHttp,
    api_key: String,
}

impl PolygonClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new("polygon", base_url, Duration::from_secs(30))?,
            api_key: api_key.to_string(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        require_key("Polygon", &self.api_key)?;

        let request = self
            .http
            .get(path)
            .query(query)
            .query(&[("apiKey", self.api_key.as_str())]);

        self.http.send_json(request, path).await
    }

    /// Reference-ticker search, reshaped to look like a price payload.
    async fn crypto_reference_lookup(&self, ticker: &str) -> Result<Value> {
        let data = self
            .get(
                "/v3/reference/tickers",
                &[
                    ("market", "crypto".to_string()),
                    ("active", "true".to_string()),
                    ("search", ticker.to_string()),
                ],
            )
            .await?;

        let first = data
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first());

        match (data.get("status").and_then(Value::as_str), first) {
            (Some("OK"), Some(found)) => Ok(json!({
                "ticker": found.get("ticker").cloned().unwrap_or_else(|| json!(ticker)),
                "name": found.get("name").cloned().unwrap_or_else(|| json!("")),
                "market": found.get("market").cloned().unwrap_or_else(|| json!("crypto")),
                "currency": found.get("currency_name").cloned().unwrap_or_else(|| json!("USD")),
                "last_updated": found.get("last_updated_utc").cloned().unwrap_or_else(|| json!("")),
                "status": "OK",
                "is_cryptocurrency": true,
                "crypto_ticker": ticker,
                "request_id": data.get("request_id").cloned().unwrap_or_else(|| json!("")),
                "fallback_method": true,
            })),
            _ => Ok(data),
        }
    }
}

#[async_trait]
impl MarketDataProvider for PolygonClient {
    async fn equity_price(&self, ticker: &str) -> Result<Value> {
        self.get(&format!("/v2/aggs/ticker/{}/prev", ticker), &[]).await
    }

    async fn crypto_price(&self, ticker: &str) -> Result<Value> {
        let path = format!("/v2/aggs/ticker/X:{}USD/prev", ticker);

        match self.get(&path, &[]).await {
            Ok(mut data) => {
                if data.get("status").and_then(Value::as_str) == Some("OK") {
                    if let Some(obj) = data.as_object_mut() {
                        obj.insert("is_cryptocurrency".to_string(), json!(true));
                        obj.insert("crypto_ticker".to_string(), json!(ticker));
                    }
                }
                Ok(data)
            }
            Err(primary) => {
                warn!(ticker, "Crypto aggregate lookup failed ({}), trying reference search", primary);
                self.crypto_reference_lookup(ticker).await.map_err(|fallback| {
                    crate::error::SearchError::ProviderError(format!(
                        "{}; fallback also failed: {}",
                        primary, fallback
                    ))
                })
            }
        }
    }

    async fn company_news(&self, ticker: &str, limit: usize) -> Result<Value> {
        self.get(
            "/v2/reference/news",
            &[("ticker", ticker.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    async fn financials(&self, ticker: &str) -> Result<Value> {
        self.get(
            "/vX/reference/financials",
            &[("ticker", ticker.to_string()), ("limit", "4".to_string())],
        )
        .await
    }

    async fn insider_trades(&self, ticker: &str) -> Result<Value> {
        self.get(
            "/v2/reference/insiders",
            &[("ticker", ticker.to_string()), ("limit", "10".to_string())],
        )
        .await
    }
}
