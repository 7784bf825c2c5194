//! Chat-completions client
//!
//! The planner and every synthesis backend talk to OpenAI-compatible
//! `/chat/completions` endpoints (OpenAI itself, Together for the DeepSeek
//! models). One long-lived reqwest::Client per backend for connection pooling.

use crate::config::LlmEndpoint;
use crate::error::SearchError;
use crate::models::Message;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Sampling parameters; unset fields are omitted from the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub repetition_penalty: Option<f32>,
    /// Ask for a JSON object response (`response_format: json_object`).
    pub json_response: bool,
}

/// Anything that turns a message list into completion text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[Message], params: &SamplingParams) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Reusable chat-completions client (connection-pooled)
pub struct ChatCompletionsClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(endpoint: &LlmEndpoint, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key: endpoint.api_key.clone(),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl ChatModel for ChatCompletionsClient {
    async fn complete(&self, messages: &[Message], params: &SamplingParams) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(SearchError::ConfigError(format!(
                "API key for {} is not configured",
                self.model
            )));
        }

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            top_k: params.top_k,
            repetition_penalty: params.repetition_penalty,
            response_format: params
                .json_response
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        debug!(model = %self.model, messages = messages.len(), "Calling chat completions");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, "Chat completion request failed: {}", e);
                SearchError::LlmError(format!("{} request failed: {}", self.model, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(model = %self.model, status = status.as_u16(), "Chat completion error response: {}", body);
            return Err(SearchError::from_llm_status(status.as_u16(), body));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            error!(model = %self.model, "Failed to parse chat completion: {}", e);
            SearchError::LlmError(format!("{} parse error: {}", self.model, e))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SearchError::LlmError(format!("Empty response from {}", self.model)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(base_url: String, api_key: &str) -> ChatCompletionsClient {
        let endpoint = LlmEndpoint {
            api_key: api_key.to_string(),
            base_url,
            model: "test-model".to_string(),
        };
        ChatCompletionsClient::new(&endpoint, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![Message::system("You are terse."), Message::user("What is RSI?")];
        let request = ChatRequest {
            model: "gpt-4-turbo",
            messages: &messages,
            temperature: Some(0.1),
            max_tokens: None,
            top_p: None,
            top_k: None,
            repetition_penalty: None,
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "What is RSI?");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert!(value.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let router = Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let echoed = body["messages"][0]["content"].as_str().unwrap_or("").to_string();
                Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": format!("echo: {}", echoed) } }]
                }))
            }),
        );
        let client = client_for(serve(router).await, "key");

        let answer = client
            .complete(&[Message::user("hello")], &SamplingParams::default())
            .await
            .unwrap();
        assert_eq!(answer, "echo: hello");
    }

    #[tokio::test]
    async fn test_status_codes_are_classified() {
        let router = Router::new()
            .route(
                "/unauthorized/chat/completions",
                post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
            )
            .route(
                "/limited/chat/completions",
                post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota") }),
            );
        let base = serve(router).await;

        let unauthorized = client_for(format!("{}/unauthorized", base), "key")
            .complete(&[Message::user("hi")], &SamplingParams::default())
            .await;
        assert!(matches!(unauthorized, Err(SearchError::Unauthorized(_))));

        let limited = client_for(format!("{}/limited", base), "key")
            .complete(&[Message::user("hi")], &SamplingParams::default())
            .await;
        assert!(matches!(limited, Err(SearchError::RateLimited(_))));
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let client = client_for("http://127.0.0.1:9".to_string(), "");
        let result = client
            .complete(&[Message::user("hi")], &SamplingParams::default())
            .await;
        assert!(matches!(result, Err(SearchError::ConfigError(_))));
    }
}
