//! Query planner
//!
//! Decides which external sources a query needs. The decision is delegated to
//! an LLM; its reply is decoded strictly into a `FetchPlan`, and anything
//! that cannot be understood degrades to the fallback plan. Planning never
//! fails.

use crate::models::{FetchPlan, Message, SearchMode};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

pub mod openai;
pub use openai::OpenAiPlanner;

/// Tickers that always mark a plan as crypto, whatever the planner said.
pub const CRYPTO_TICKERS: &[&str] = &["BTC", "ETH", "XRP", "DOGE", "SOL", "ADA"];

/// How a plan was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// The reply (minus markdown fences) decoded directly.
    Parsed(FetchPlan),
    /// A JSON object was recovered from surrounding prose.
    Recovered(FetchPlan),
    /// Nothing usable; the hardcoded fallback plan applies.
    Fallback { reason: String },
}

impl PlanOutcome {
    pub fn into_plan(self) -> FetchPlan {
        match self {
            PlanOutcome::Parsed(plan) | PlanOutcome::Recovered(plan) => plan,
            PlanOutcome::Fallback { .. } => FetchPlan::fallback(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanOutcome::Parsed(_) => "parsed",
            PlanOutcome::Recovered(_) => "recovered",
            PlanOutcome::Fallback { .. } => "fallback",
        }
    }
}

/// Trait for fetch-plan generation (LLM controlled)
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    /// `history` holds the session's messages with the current query last.
    async fn plan(&self, query: &str, history: &[Message]) -> PlanOutcome;
}

/// Planner that always answers with the same plan.
/// Keeps the pipeline usable without an LLM (tests, offline runs).
pub struct FixedPlanner {
    plan: FetchPlan,
}

impl FixedPlanner {
    pub fn new(plan: FetchPlan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl QueryPlanner for FixedPlanner {
    async fn plan(&self, _query: &str, _history: &[Message]) -> PlanOutcome {
        PlanOutcome::Parsed(self.plan.clone())
    }
}

lazy_static! {
    static ref GREEDY_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").expect("object regex");
}

/// Decode a planner reply.
pub fn parse_plan_response(response: &str) -> PlanOutcome {
    let trimmed = strip_code_fences(response);

    if let Some(plan) = decode_plan(trimmed) {
        return PlanOutcome::Parsed(plan);
    }

    let candidates = [
        first_balanced_object(trimmed),
        GREEDY_OBJECT.find(trimmed).map(|m| m.as_str()),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Some(plan) = decode_plan(candidate) {
            return PlanOutcome::Recovered(plan);
        }
    }

    PlanOutcome::Fallback {
        reason: "planner reply did not contain a valid plan object".to_string(),
    }
}

fn decode_plan(raw: &str) -> Option<FetchPlan> {
    let value: Value = serde_json::from_str(raw).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .trim()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// First top-level `{...}` with balanced braces, ignoring braces in strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Uppercase tickers and apply the crypto override.
pub fn normalize_plan(mut plan: FetchPlan) -> FetchPlan {
    plan.tickers = plan
        .tickers
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect();

    if plan
        .tickers
        .iter()
        .any(|t| CRYPTO_TICKERS.contains(&t.as_str()))
    {
        plan.is_crypto = true;
    }

    plan
}

/// Force the search calls each mode depends on.
pub fn apply_mode(mut plan: FetchPlan, mode: SearchMode) -> FetchPlan {
    if mode.forces_sonar() {
        plan.call_sonar = true;
    }
    if mode.forces_deep_research() {
        plan.call_deep_research = true;
    }
    plan
}
