//! Answer synthesis
//!
//! Three interchangeable backends, one per `SearchMode`. Each receives the
//! formatted context block and returns markdown. Backend failures never
//! escape: they are turned into explanatory answer text and flagged as
//! degraded so the caller knows not to cache them.

pub mod prompts;

use crate::config::{AppConfig, LlmEndpoint};
use crate::error::SearchError;
use crate::formatter::BudgetMode;
use crate::llm::{ChatCompletionsClient, ChatModel, SamplingParams};
use crate::models::{Message, SearchMode};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Minimum spacing between two requests to one rate-limited backend.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Serializes callers so consecutive requests are at least `min_interval`
/// apart. The lock is held across the sleep, so waiters queue in order.
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Synthesized answer plus whether it is a real model answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisOutcome {
    pub text: String,
    /// True when the text is a canned failure explanation.
    pub degraded: bool,
}

impl SynthesisOutcome {
    fn answer(text: String) -> Self {
        Self { text, degraded: false }
    }

    fn degraded(text: String) -> Self {
        Self { text, degraded: true }
    }
}

pub struct SynthesisBackend {
    label: &'static str,
    /// Environment variable users must set to enable this backend.
    key_var: &'static str,
    model: Arc<dyn ChatModel>,
    params: SamplingParams,
    limiter: Option<RateLimiter>,
}

impl SynthesisBackend {
    pub fn new(
        label: &'static str,
        key_var: &'static str,
        model: Arc<dyn ChatModel>,
        params: SamplingParams,
    ) -> Self {
        Self {
            label,
            key_var,
            model,
            params,
            limiter: None,
        }
    }

    pub fn rate_limited(mut self, min_interval: Duration) -> Self {
        self.limiter = Some(RateLimiter::new(min_interval));
        self
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.limiter.as_ref().map(|l| l.min_interval)
    }

    async fn run(&self, messages: Vec<Message>) -> SynthesisOutcome {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        match self.model.complete(&messages, &self.params).await {
            Ok(text) if text.trim().is_empty() => {
                warn!(backend = self.label, "Backend returned an empty answer");
                SynthesisOutcome::degraded(format!(
                    "Error: {} returned an empty response.",
                    self.label
                ))
            }
            Ok(text) => SynthesisOutcome::answer(text),
            Err(e) => {
                error!(backend = self.label, model = self.model.model_name(), "Synthesis failed: {}", e);
                SynthesisOutcome::degraded(self.explain(&e))
            }
        }
    }

    fn explain(&self, e: &SearchError) -> String {
        match e {
            SearchError::ConfigError(_) => prompts::not_configured(self.label, self.key_var),
            SearchError::Unauthorized(_) => prompts::authentication_failed(self.label, self.key_var),
            SearchError::RateLimited(_) => prompts::quota_exceeded(self.label),
            other => format!("Error: {}", other),
        }
    }
}

/// Routes a query to the backend for its mode.
pub struct Synthesizer {
    sonar: SynthesisBackend,
    comprehensive: SynthesisBackend,
    narrative: SynthesisBackend,
}

impl Synthesizer {
    pub fn new(
        sonar: SynthesisBackend,
        comprehensive: SynthesisBackend,
        narrative: SynthesisBackend,
    ) -> Self {
        Self {
            sonar,
            comprehensive,
            narrative,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = |endpoint: &LlmEndpoint, secs: u64| -> Result<Arc<dyn ChatModel>> {
            Ok(Arc::new(ChatCompletionsClient::new(endpoint, Duration::from_secs(secs))?))
        };

        Ok(Self::new(
            SynthesisBackend::new("OpenAI", "OPENAI_API_KEY", client(&config.openai, 60)?, sonar_params())
                .rate_limited(MIN_REQUEST_INTERVAL),
            SynthesisBackend::new(
                "DeepSeek R1",
                "TOGETHER_API_KEY",
                client(&config.deepseek_r1, 180)?,
                comprehensive_params(),
            )
            .rate_limited(MIN_REQUEST_INTERVAL),
            SynthesisBackend::new(
                "DeepSeek V3",
                "TOGETHER_API_KEY",
                client(&config.deepseek_v3, 60)?,
                narrative_params(),
            )
            .rate_limited(MIN_REQUEST_INTERVAL),
        ))
    }

    /// How much of the fetched data each mode's backend gets to see.
    pub fn budget(mode: SearchMode) -> BudgetMode {
        match mode {
            SearchMode::Default => BudgetMode::Comprehensive,
            SearchMode::Comprehensive => BudgetMode::Simplified,
            SearchMode::Narrative => BudgetMode::Comprehensive,
        }
    }

    /// `history` is the conversation before the current query; only the
    /// default backend replays it.
    pub async fn dispatch(
        &self,
        query: &str,
        context: &str,
        mode: SearchMode,
        history: &[Message],
    ) -> SynthesisOutcome {
        let (backend, messages) = match mode {
            SearchMode::Default => (&self.sonar, sonar_messages(query, context, history)),
            SearchMode::Comprehensive => (&self.comprehensive, comprehensive_messages(query, context)),
            SearchMode::Narrative => (&self.narrative, narrative_messages(query, context)),
        };

        info!(backend = backend.label, mode = %mode, messages = messages.len(), "Synthesizing answer");
        backend.run(messages).await
    }

    pub async fn synthesize(
        &self,
        query: &str,
        context: &str,
        mode: SearchMode,
        history: &[Message],
    ) -> String {
        self.dispatch(query, context, mode, history).await.text
    }
}

fn sonar_params() -> SamplingParams {
    SamplingParams {
        temperature: Some(0.5),
        max_tokens: Some(2000),
        ..SamplingParams::default()
    }
}

fn comprehensive_params() -> SamplingParams {
    SamplingParams {
        temperature: Some(0.7),
        max_tokens: Some(8000),
        top_p: Some(0.95),
        top_k: Some(50),
        repetition_penalty: Some(1.0),
        json_response: false,
    }
}

fn narrative_params() -> SamplingParams {
    SamplingParams {
        temperature: Some(0.7),
        max_tokens: Some(4000),
        top_p: Some(0.7),
        top_k: Some(50),
        repetition_penalty: Some(1.0),
        json_response: false,
    }
}

fn sonar_messages(query: &str, context: &str, history: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(Message::system(prompts::sonar_system_prompt(query, history)));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(query));
    messages.push(Message::system(prompts::data_message(query, context)));
    messages
}

fn comprehensive_messages(query: &str, context: &str) -> Vec<Message> {
    vec![
        Message::system(prompts::comprehensive_system_prompt()),
        Message::user(prompts::comprehensive_user_prompt(query)),
        Message::system(prompts::data_message(query, context)),
    ]
}

fn narrative_messages(query: &str, context: &str) -> Vec<Message> {
    vec![
        Message::system(prompts::narrative_system_prompt()),
        Message::user(prompts::narrative_user_prompt(query, context)),
    ]
}
