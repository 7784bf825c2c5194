//! LLM-backed planner
//!
//! Builds the source-selection prompt (with a conversation context block for
//! follow-up questions) and decodes the model's JSON reply.

use super::{parse_plan_response, PlanOutcome, QueryPlanner};
use crate::llm::{ChatModel, SamplingParams};
use crate::memory::{exchanges, EntityExtractor};
use crate::models::Message;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Assistant answers quoted in the context block are cut to this many chars.
const ANSWER_EXCERPT_CHARS: usize = 300;

/// History length (current query included) from which a query is treated
/// as a follow-up.
const FOLLOW_UP_MIN_MESSAGES: usize = 3;

const SYSTEM_PROMPT: &str = "You are a financial query analyzer that determines which APIs to call.";

pub struct OpenAiPlanner {
    model: Arc<dyn ChatModel>,
}

impl OpenAiPlanner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn sampling() -> SamplingParams {
        SamplingParams {
            temperature: Some(0.1),
            max_tokens: Some(500),
            json_response: true,
            ..SamplingParams::default()
        }
    }
}

#[async_trait]
impl QueryPlanner for OpenAiPlanner {
    async fn plan(&self, query: &str, history: &[Message]) -> PlanOutcome {
        let prompt = build_planning_prompt(query, history);
        let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)];

        let reply = match self.model.complete(&messages, &Self::sampling()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(model = self.model.model_name(), "Planner call failed, using fallback plan: {}", e);
                return PlanOutcome::Fallback {
                    reason: e.to_string(),
                };
            }
        };

        let outcome = parse_plan_response(&reply);
        match &outcome {
            PlanOutcome::Fallback { reason } => {
                warn!(reason = %reason, "Planner reply unusable, using fallback plan");
                debug!(reply = %reply, "Unparsed planner reply");
            }
            _ => info!(outcome = outcome.label(), "Fetch plan decoded"),
        }
        outcome
    }
}

/// Conversation context for follow-up queries, or `None` for a fresh one.
pub fn build_context_block(history: &[Message]) -> Option<String> {
    if history.len() < FOLLOW_UP_MIN_MESSAGES {
        return None;
    }

    let prior = &history[..history.len() - 1];
    let previous = exchanges(prior);
    if previous.is_empty() {
        return None;
    }

    let mut block = String::from(
        "IMPORTANT - CONVERSATION CONTEXT:\n\
         This is a follow-up question in an ongoing conversation. Previous exchanges:\n\n",
    );

    for (i, exchange) in previous.iter().enumerate() {
        block.push_str(&format!("Exchange {}:\n", i + 1));
        block.push_str(&format!("User: \"{}\"\n", exchange.question));
        block.push_str(&format!("Assistant: \"{}\"\n\n", excerpt(&exchange.answer)));
    }

    let entities = EntityExtractor::extract(history);
    if !entities.is_empty() {
        block.push_str("KEY ENTITIES DISCUSSED IN THIS CONVERSATION:\n");
        block.push_str(&entities.into_iter().collect::<Vec<_>>().join(", "));
        block.push_str("\n\n");
    }

    block.push_str(
        "IMPORTANT INSTRUCTIONS FOR HANDLING THIS FOLLOW-UP QUERY:\n\
         1. When the user refers to companies, stocks, or topics mentioned in previous exchanges, maintain that context\n\
         2. Pronouns like 'it', 'they', 'their', 'them', 'its' refer to entities from previous exchanges\n\
         3. If the query says 'current', 'latest', or similar without naming an entity, assume the previously discussed entity\n\
         4. If the reference is ambiguous, assume the most recently discussed entity\n\
         5. Name that entity explicitly by including its ticker symbol in the tickers list of your plan\n",
    );

    if let Some(ticker) = EntityExtractor::most_recent_ticker(prior) {
        block.push_str(&format!(
            "\nThe most recently discussed entity is {}. Unless the query names another company, include \"{}\" in the tickers list.\n",
            ticker, ticker
        ));
    }

    Some(block)
}

pub fn build_planning_prompt(query: &str, history: &[Message]) -> String {
    let today = Utc::now().format("%B %d, %Y");
    let context = build_context_block(history).unwrap_or_default();

    format!(
        r#"You are a financial search engine that needs to determine which APIs to call based on a user's query.

Today's date is {today}. Consider this when analyzing time-sensitive queries.

{context}
User Query: {query}

Analyze the query and determine:
1. Whether to call Perplexity Sonar for real-time news and market insights
2. Whether to call Perplexity Deep Research for in-depth financial analysis
3. Whether to fetch stock prices using Polygon.io
4. Whether to fetch financial statements
5. Whether to fetch insider trades
6. Whether to fetch SEC filings
7. Which ticker symbols are relevant to the query

If the query is about a cryptocurrency, set is_crypto_query to true and use the standard symbol (BTC for Bitcoin, ETH for Ethereum).
If the query asks for trading advice, entry/exit points, or market predictions, set is_trading_query to true and give the timeframe mentioned.

Return a JSON object with this structure:
{{
    "call_perplexity_sonar": boolean,
    "call_perplexity_deep_research": boolean,
    "need_stock_price": boolean,
    "need_financials": boolean,
    "need_insider_trades": boolean,
    "need_sec_filings": boolean,
    "tickers": [list of ticker symbols],
    "is_crypto_query": boolean,
    "is_trading_query": boolean,
    "trading_timeframe": string or null,
    "reasoning": "Brief explanation of your analysis"
}}

Only include the JSON object in your response, nothing else."#
    )
}

fn excerpt(answer: &str) -> String {
    if answer.chars().count() > ANSWER_EXCERPT_CHARS {
        let cut: String = answer.chars().take(ANSWER_EXCERPT_CHARS).collect();
        format!("{}...", cut)
    } else {
        answer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::models::FetchPlan;
    use crate::Result;
    use std::sync::Mutex;

    /// Replays one reply and records the prompts it was given.
    struct ScriptedModel {
        reply: Option<String>,
        seen: Mutex<Vec<Vec<Message>>>,
        seen_params: Mutex<Vec<SamplingParams>>,
    }

    impl ScriptedModel {
        fn new(reply: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                seen: Mutex::new(Vec::new()),
                seen_params: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, messages: &[Message], params: &SamplingParams) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.seen_params.lock().unwrap().push(params.clone());
            self.reply
                .clone()
                .ok_or_else(|| SearchError::LlmError("connection refused".to_string()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn nvda_history() -> Vec<Message> {
        vec![
            Message::user("What's NVDA's current price?"),
            Message::assistant("NVIDIA (NVDA) closed at $880.08, up 2.1% on the day."),
            Message::user("What's their P/E ratio?"),
        ]
    }

    #[test]
    fn test_no_context_for_first_query() {
        assert!(build_context_block(&[Message::user("What is TSLA at?")]).is_none());
        assert!(build_context_block(&[]).is_none());
    }

    #[test]
    fn test_follow_up_context_names_entity() {
        let block = build_context_block(&nvda_history()).unwrap();

        assert!(block.contains("Exchange 1:"));
        assert!(block.contains("User: \"What's NVDA's current price?\""));
        assert!(block.contains("KEY ENTITIES DISCUSSED IN THIS CONVERSATION:\nNVDA, Nvidia"));
        assert!(block.contains("most recently discussed entity is NVDA"));
        assert!(!block.contains("Exchange 2:"));
    }

    #[test]
    fn test_long_answers_are_truncated() {
        let long_answer = "x".repeat(500);
        let history = vec![
            Message::user("Tell me about AAPL"),
            Message::assistant(long_answer),
            Message::user("And its revenue?"),
        ];

        let block = build_context_block(&history).unwrap();
        let expected = format!("Assistant: \"{}...\"", "x".repeat(300));
        assert!(block.contains(&expected));
        assert!(!block.contains(&"x".repeat(301)));
    }

    #[tokio::test]
    async fn test_plan_uses_low_temperature_json_mode() {
        let model = ScriptedModel::new(Some(
            r#"{"call_perplexity_sonar": false, "need_financials": true, "tickers": ["NVDA"], "reasoning": "P/E follow-up"}"#,
        ));
        let planner = OpenAiPlanner::new(model.clone());

        let outcome = planner.plan("What's their P/E ratio?", &nvda_history()).await;
        let plan = outcome.into_plan();
        assert_eq!(plan.tickers, vec!["NVDA".to_string()]);
        assert!(plan.need_financials);

        let params = model.seen_params.lock().unwrap()[0].clone();
        assert_eq!(params.temperature, Some(0.1));
        assert!(params.json_response);

        let prompt = model.seen.lock().unwrap()[0][1].content.clone();
        assert!(prompt.contains("User Query: What's their P/E ratio?"));
        assert!(prompt.contains("CONVERSATION CONTEXT"));
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back() {
        let planner = OpenAiPlanner::new(ScriptedModel::new(None));
        let outcome = planner.plan("anything", &[Message::user("anything")]).await;

        assert_eq!(outcome.label(), "fallback");
        assert_eq!(outcome.into_plan(), FetchPlan::fallback());
    }
}
