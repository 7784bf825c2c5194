//! External data providers
//!
//! Each provider returns the upstream JSON payload untouched; shaping for
//! the LLM happens in the formatter.

use crate::config::AppConfig;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub mod financial_datasets;
pub mod http;
pub mod perplexity;
pub mod polygon;

pub use financial_datasets::FinancialDatasetsClient;
pub use perplexity::PerplexityClient;
pub use polygon::PolygonClient;

/// Prices, news and fallback fundamentals (Polygon).
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn equity_price(&self, ticker: &str) -> Result<Value>;
    async fn crypto_price(&self, ticker: &str) -> Result<Value>;
    async fn company_news(&self, ticker: &str, limit: usize) -> Result<Value>;
    async fn financials(&self, ticker: &str) -> Result<Value>;
    async fn insider_trades(&self, ticker: &str) -> Result<Value>;
}

/// Statements, SEC filings and insider trades (Financial Datasets).
#[async_trait]
pub trait FilingsProvider: Send + Sync {
    async fn financial_statements(&self, ticker: &str) -> Result<Value>;
    async fn sec_filings(&self, ticker: &str) -> Result<Value>;
    async fn insider_trades(&self, ticker: &str) -> Result<Value>;
}

/// Web-grounded search answers (Perplexity).
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn sonar_search(&self, query: &str) -> Result<Value>;
    async fn deep_research(&self, query: &str) -> Result<Value>;
}

/// Cheap-to-clone handle on every provider, moved into fan-out tasks.
#[derive(Clone)]
pub struct Providers {
    pub market: Arc<dyn MarketDataProvider>,
    pub filings: Arc<dyn FilingsProvider>,
    pub search: Arc<dyn WebSearchProvider>,
}

impl Providers {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            market: Arc::new(PolygonClient::new(
                &config.polygon_base_url,
                &config.polygon_api_key,
            )?),
            filings: Arc::new(FinancialDatasetsClient::new(
                &config.financial_datasets_base_url,
                &config.financial_datasets_api_key,
            )?),
            search: Arc::new(PerplexityClient::new(
                &config.perplexity_base_url,
                &config.perplexity_api_key,
            )?),
        })
    }
}

#[cfg(test)]
pub(crate) mod stub {
    //! Canned providers for pipeline tests.

    use super::*;
    use crate::error::SearchError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed payloads and counts every call. Tickers listed in
    /// `failing` error out for every kind.
    #[derive(Default)]
    pub struct StubProvider {
        pub calls: AtomicUsize,
        pub failing: Vec<String>,
        pub panicking: Vec<String>,
        pub filings_down: bool,
    }

    impl StubProvider {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn providers(self: &Arc<Self>) -> Providers {
            Providers {
                market: self.clone(),
                filings: self.clone(),
                search: self.clone(),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn check(&self, ticker: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panicking.iter().any(|t| t == ticker) {
                panic!("stub provider panic for {}", ticker);
            }
            if self.failing.iter().any(|t| t == ticker) {
                return Err(SearchError::ProviderError(format!("{} unavailable", ticker)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MarketDataProvider for StubProvider {
        async fn equity_price(&self, ticker: &str) -> Result<Value> {
            self.check(ticker)?;
            Ok(json!({
                "status": "OK",
                "ticker": ticker,
                "results": [{ "T": ticker, "c": 110.0, "o": 100.0, "h": 112.5, "l": 99.0, "v": 1234567.0, "n": 4321, "t": 1700000000000i64 }]
            }))
        }

        async fn crypto_price(&self, ticker: &str) -> Result<Value> {
            self.check(ticker)?;
            Ok(json!({
                "status": "OK",
                "is_cryptocurrency": true,
                "crypto_ticker": ticker,
                "results": [{ "c": 65000.0, "o": 64000.0, "h": 66000.0, "l": 63000.0, "v": 1500.0 }]
            }))
        }

        async fn company_news(&self, ticker: &str, _limit: usize) -> Result<Value> {
            self.check(ticker)?;
            Ok(json!({
                "results": [
                    { "title": format!("{} beats estimates", ticker), "article_url": format!("https://news.example.com/{}/1", ticker), "published_utc": "2024-03-01T12:00:00Z", "description": "Quarterly results" },
                    { "title": format!("{} expands", ticker), "article_url": format!("https://news.example.com/{}/2", ticker) }
                ]
            }))
        }

        async fn financials(&self, ticker: &str) -> Result<Value> {
            self.check(ticker)?;
            Ok(json!({ "results": [{ "source": "polygon", "ticker": ticker }] }))
        }

        async fn insider_trades(&self, ticker: &str) -> Result<Value> {
            self.check(ticker)?;
            Ok(json!({ "results": [{ "source": "polygon", "ticker": ticker }] }))
        }
    }

    #[async_trait]
    impl FilingsProvider for StubProvider {
        async fn financial_statements(&self, ticker: &str) -> Result<Value> {
            self.check(ticker)?;
            if self.filings_down {
                return Err(SearchError::ProviderError("filings down".to_string()));
            }
            Ok(json!({ "financials": { "income_statements": [{ "ticker": ticker, "revenue": 1000 }] } }))
        }

        async fn sec_filings(&self, ticker: &str) -> Result<Value> {
            self.check(ticker)?;
            Ok(json!({ "filings": [{ "filing_type": "10-K", "report_date": "2024-02-01", "url": "https://sec.example.com/10k" }] }))
        }

        async fn insider_trades(&self, ticker: &str) -> Result<Value> {
            self.check(ticker)?;
            if self.filings_down {
                return Err(SearchError::ProviderError("filings down".to_string()));
            }
            Ok(json!({ "insider_trades": [{ "name": "Jane Doe", "title": "CFO", "transaction_shares": 1000, "transaction_value": 110000, "transaction_date": "2024-02-15" }] }))
        }
    }

    #[async_trait]
    impl WebSearchProvider for StubProvider {
        async fn sonar_search(&self, query: &str) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "choices": [{ "message": { "content": format!("Web summary for: {}", query) } }],
                "citations": ["https://www.example.com/markets", "https://www.example.com/markets"]
            }))
        }

        async fn deep_research(&self, query: &str) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "choices": [{ "message": { "content": format!("Deep research on: {}", query) } }],
                "citations": ["https://research.example.com/report"]
            }))
        }
    }
}
