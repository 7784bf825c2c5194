//! Core data models for the financial search engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single chat message. Session history only ever holds user/assistant
/// messages; system messages are built per LLM request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

//
// ================= Modes =================
//

/// Which synthesis strategy answers the query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// General-purpose assistant backend ("sonar").
    #[default]
    #[serde(alias = "sonar")]
    Default,
    /// Long-form research report backend ("deepseek").
    #[serde(alias = "deepseek")]
    Comprehensive,
    /// Eight-section narrative backend ("deep_research").
    #[serde(alias = "deep_research")]
    Narrative,
}

impl SearchMode {
    pub fn forces_sonar(self) -> bool {
        matches!(self, SearchMode::Default | SearchMode::Comprehensive)
    }

    pub fn forces_deep_research(self) -> bool {
        matches!(self, SearchMode::Comprehensive | SearchMode::Narrative)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchMode::Default => "default",
            SearchMode::Comprehensive => "comprehensive",
            SearchMode::Narrative => "narrative",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Plan =================
//

/// Structured decision of which external sources to query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FetchPlan {
    #[serde(default, alias = "call_perplexity_sonar")]
    pub call_sonar: bool,
    #[serde(default, alias = "call_perplexity_deep_research")]
    pub call_deep_research: bool,
    #[serde(default, alias = "need_stock_price")]
    pub need_price: bool,
    #[serde(default)]
    pub need_financials: bool,
    #[serde(default)]
    pub need_insider_trades: bool,
    #[serde(default)]
    pub need_sec_filings: bool,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default, alias = "is_crypto_query")]
    pub is_crypto: bool,
    #[serde(default)]
    pub is_trading_query: bool,
    #[serde(default)]
    pub trading_timeframe: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl FetchPlan {
    pub const FALLBACK_REASONING: &'static str = "Failed to parse API plan, using default.";

    /// Plan used whenever the planning backend cannot be understood.
    pub fn fallback() -> Self {
        Self {
            call_sonar: true,
            reasoning: Self::FALLBACK_REASONING.to_string(),
            ..Self::default()
        }
    }
}

//
// ================= Fetch Results =================
//

/// Task key → provider payload or `{"error": ...}` marker.
pub type FetchResults = BTreeMap<String, serde_json::Value>;

pub const SONAR_KEY: &str = "perplexity_sonar";
pub const DEEP_RESEARCH_KEY: &str = "perplexity_deep_research";

pub fn error_marker(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

pub fn is_error_marker(value: &serde_json::Value) -> bool {
    value.get("error").is_some()
}

//
// ================= Answers =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Source {
    pub title: Option<String>,
    pub url: Option<String>,
}

/// Final answer as stored in the response cache (unsanitized).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub data: FetchResults,
}

//
// ================= API I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub data: FetchResults,
    pub session_id: String,
}

impl SearchResponse {
    pub const APOLOGY: &'static str = "I apologize, but I encountered an error while processing your request. Please try again later.";

    pub fn from_cached(cached: CachedAnswer, session_id: impl Into<String>) -> Self {
        Self {
            answer: cached.answer,
            sources: cached.sources,
            data: cached.data,
            session_id: session_id.into(),
        }
    }

    pub fn apology(session_id: impl Into<String>) -> Self {
        Self {
            answer: Self::APOLOGY.to_string(),
            sources: Vec::new(),
            data: FetchResults::new(),
            session_id: session_id.into(),
        }
    }
}

/// Events emitted by the streaming search endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchEvent {
    Status { content: String, session_id: String },
    Result(SearchResponse),
    Error { content: String, session_id: String },
}

impl SearchEvent {
    pub fn status(content: impl Into<String>, session_id: impl Into<String>) -> Self {
        SearchEvent::Status {
            content: content.into(),
            session_id: session_id.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchEvent::Status { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_accepts_planner_wire_names() {
        let raw = r#"{
            "call_perplexity_sonar": true,
            "need_stock_price": true,
            "tickers": ["tsla"],
            "is_crypto_query": false,
            "trading_timeframe": null,
            "reasoning": "price lookup"
        }"#;

        let plan: FetchPlan = serde_json::from_str(raw).unwrap();
        assert!(plan.call_sonar);
        assert!(plan.need_price);
        assert!(!plan.call_deep_research);
        assert_eq!(plan.tickers, vec!["tsla".to_string()]);
        assert_eq!(plan.trading_timeframe, None);
    }

    #[test]
    fn test_mode_wire_names() {
        let cases = [
            ("\"default\"", SearchMode::Default),
            ("\"sonar\"", SearchMode::Default),
            ("\"comprehensive\"", SearchMode::Comprehensive),
            ("\"deepseek\"", SearchMode::Comprehensive),
            ("\"narrative\"", SearchMode::Narrative),
            ("\"deep_research\"", SearchMode::Narrative),
        ];

        for (raw, expected) in cases {
            let mode: SearchMode = serde_json::from_str(raw).unwrap();
            assert_eq!(mode, expected, "{raw}");
        }
    }

    #[test]
    fn test_request_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query": "AAPL?"}"#).unwrap();
        assert_eq!(req.mode, SearchMode::Default);
        assert!(req.session_id.is_none());
    }

    #[test]
    fn test_event_wire_shape() {
        let status = serde_json::to_value(SearchEvent::status("Analyzing your query...", "s1")).unwrap();
        assert_eq!(status["type"], "status");
        assert_eq!(status["session_id"], "s1");

        let result = serde_json::to_value(SearchEvent::Result(SearchResponse::apology("s1"))).unwrap();
        assert_eq!(result["type"], "result");
        assert_eq!(result["answer"], SearchResponse::APOLOGY);
        assert!(result["sources"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_fallback_plan() {
        let plan = FetchPlan::fallback();
        assert!(plan.call_sonar);
        assert!(!plan.call_deep_research && !plan.need_price && !plan.need_financials);
        assert!(!plan.need_insider_trades && !plan.need_sec_filings);
        assert!(plan.tickers.is_empty());
        assert_eq!(plan.reasoning, "Failed to parse API plan, using default.");
    }
}
