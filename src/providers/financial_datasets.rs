//! Financial Datasets (statements, SEC filings, insider trades)

use super::http::{require_key, ProviderHttp};
use super::FilingsProvider;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub struct FinancialDatasetsClient {
    http: ProviderHttp,
    api_key: String,
}

impl FinancialDatasetsClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new("financial_datasets", base_url, Duration::from_secs(30))?,
            api_key: api_key.to_string(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        require_key("Financial Datasets", &self.api_key)?;

        let request = self
            .http
            .get(path)
            .header("X-API-KEY", &self.api_key)
            .query(query);

        self.http.send_json(request, path).await
    }
}

#[async_trait]
impl FilingsProvider for FinancialDatasetsClient {
    async fn financial_statements(&self, ticker: &str) -> Result<Value> {
        self.get(
            "/financials/",
            &[("ticker", ticker), ("period", "annual"), ("limit", "5")],
        )
        .await
    }

    async fn sec_filings(&self, ticker: &str) -> Result<Value> {
        self.get("/filings/", &[("ticker", ticker), ("limit", "10")]).await
    }

    async fn insider_trades(&self, ticker: &str) -> Result<Value> {
        self.get("/insider-trades/", &[("ticker", ticker), ("limit", "10")])
            .await
    }
}
