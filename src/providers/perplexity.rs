//! Perplexity web search (sonar and sonar-deep-research)
//!
//! The raw chat-completion payload is returned as-is; content and citations
//! are pulled out later by the formatter and source extraction.

use super::http::{require_key, ProviderHttp};
use super::WebSearchProvider;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const SONAR_MODEL: &str = "sonar";
const DEEP_RESEARCH_MODEL: &str = "sonar-deep-research";

const SONAR_SYSTEM_PROMPT: &str = "You are a financial assistant with access to real-time web search. \
Provide accurate, up-to-date information about financial markets, stocks, companies, and economic news. \
Include relevant data points and cite your sources.";

const DEEP_RESEARCH_SYSTEM_PROMPT: &str = "You are a financial analyst specializing in deep research and \
comprehensive analysis. Provide detailed, well-structured information about companies, markets, and \
financial trends. Include quantitative data, qualitative analysis, and cite your sources.";

pub struct PerplexityClient {
    sonar: ProviderHttp,
    deep: ProviderHttp,
    api_key: String,
}

impl PerplexityClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            sonar: ProviderHttp::new("perplexity", base_url, Duration::from_secs(120))?,
            deep: ProviderHttp::new("perplexity", base_url, Duration::from_secs(300))?,
            api_key: api_key.to_string(),
        })
    }

    async fn chat(&self, http: &ProviderHttp, model: &str, system: &str, query: &str) -> Result<Value> {
        require_key("Perplexity", &self.api_key)?;

        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": query }
            ]
        });

        let path = "/chat/completions";
        let request = http.post(path).bearer_auth(&self.api_key).json(&body);
        http.send_json(request, path).await
    }
}

#[async_trait]
impl WebSearchProvider for PerplexityClient {
    async fn sonar_search(&self, query: &str) -> Result<Value> {
        self.chat(&self.sonar, SONAR_MODEL, SONAR_SYSTEM_PROMPT, query).await
    }

    async fn deep_research(&self, query: &str) -> Result<Value> {
        self.chat(&self.deep, DEEP_RESEARCH_MODEL, DEEP_RESEARCH_SYSTEM_PROMPT, query)
            .await
    }
}

/// First choice's message content, if present.
pub fn response_content(payload: &Value) -> Option<&str> {
    payload
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

/// Top-level citation URLs, if present.
pub fn response_citations(payload: &Value) -> Vec<&str> {
    payload
        .get("citations")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}
