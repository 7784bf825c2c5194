//! Main orchestrator - runs one query through the pipeline
//!
//! QUERY → SESSION → CACHE? → PLAN → FETCH → FORMAT → SYNTHESIZE → SANITIZE
//!
//! The session's lock is held for the whole request, so two requests for the
//! same session are answered one after the other and their history never
//! interleaves. Different sessions run fully in parallel.

pub mod sources;

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::execution::FanOutExecutor;
use crate::formatter::ContextFormatter;
use crate::llm::ChatCompletionsClient;
use crate::memory::{InMemorySessionStore, SessionStore};
use crate::models::{CachedAnswer, SearchEvent, SearchRequest, SearchResponse};
use crate::planner::{apply_mode, normalize_plan, OpenAiPlanner, QueryPlanner};
use crate::providers::Providers;
use crate::sanitizer::sanitize_response;
use crate::synthesis::Synthesizer;
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};
use uuid::Uuid;

pub use sources::extract_sources;

const PLANNER_TIMEOUT: Duration = Duration::from_secs(60);
const EVENT_BUFFER: usize = 16;

pub const STATUS_PROCESSING: &str = "Processing your query...";
pub const STATUS_PLANNING: &str = "Analyzing your query...";
pub const STATUS_FETCHING: &str = "Gathering financial data...";
pub const STATUS_SYNTHESIZING: &str = "Generating insights...";

type Progress = Option<mpsc::Sender<SearchEvent>>;

/// Coordinates planner, fetchers, synthesizer and cache for every request
pub struct Orchestrator {
    sessions: Arc<dyn SessionStore>,
    planner: Arc<dyn QueryPlanner>,
    executor: FanOutExecutor,
    synthesizer: Synthesizer,
    cache: ResponseCache,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        planner: Arc<dyn QueryPlanner>,
        executor: FanOutExecutor,
        synthesizer: Synthesizer,
        cache: ResponseCache,
    ) -> Self {
        Self {
            sessions,
            planner,
            executor,
            synthesizer,
            cache,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let planner_model = Arc::new(ChatCompletionsClient::new(&config.openai, PLANNER_TIMEOUT)?);

        Ok(Self::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(OpenAiPlanner::new(planner_model)),
            FanOutExecutor::new(Providers::from_config(config)?),
            Synthesizer::from_config(config)?,
            ResponseCache::from_config(config)?,
        ))
    }

    /// Answer a query. Never fails: any error or panic inside the pipeline
    /// becomes the apology answer.
    pub async fn ask(self: &Arc<Self>, request: SearchRequest) -> SearchResponse {
        let session_id = resolve_session_id(request.session_id.as_deref());
        let this = Arc::clone(self);
        let sid = session_id.clone();

        match tokio::spawn(async move { this.run(request, sid, None).await }).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(session_id = %session_id, "Search pipeline failed: {}", e);
                SearchResponse::apology(session_id)
            }
            Err(e) => {
                error!(session_id = %session_id, "Search pipeline aborted: {}", e);
                SearchResponse::apology(session_id)
            }
        }
    }

    /// Answer a query as a stream of status events followed by exactly one
    /// terminal `result` or `error` event.
    pub fn ask_stream(self: &Arc<Self>, request: SearchRequest) -> ReceiverStream<SearchEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let session_id = resolve_session_id(request.session_id.as_deref());
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let progress = Some(tx.clone());
            let sid = session_id.clone();
            let pipeline = tokio::spawn(async move { this.run(request, sid, progress).await });

            let terminal = match pipeline.await {
                Ok(Ok(response)) => SearchEvent::Result(response),
                Ok(Err(e)) => {
                    error!(session_id = %session_id, "Streaming pipeline failed: {}", e);
                    SearchEvent::Error {
                        content: format!("An error occurred: {}", e),
                        session_id,
                    }
                }
                Err(e) => {
                    error!(session_id = %session_id, "Streaming pipeline aborted: {}", e);
                    SearchEvent::Error {
                        content: SearchResponse::APOLOGY.to_string(),
                        session_id,
                    }
                }
            };

            if tx.send(terminal).await.is_err() {
                debug!("Stream consumer went away before the final event");
            }
        });

        ReceiverStream::new(rx)
    }

    async fn run(
        &self,
        request: SearchRequest,
        session_id: String,
        progress: Progress,
    ) -> Result<SearchResponse> {
        let start = Instant::now();
        let query = request.query;
        let mode = request.mode;

        info!(session_id = %session_id, mode = %mode, query = %query, "Search request received");
        notify(&progress, STATUS_PROCESSING, &session_id).await;

        let session = self.sessions.session(&session_id).await?;
        let mut history = session.lock().await;
        history.push_user(query.clone());

        if let Some(cached) = self.cache.get(&query).await {
            info!(session_id = %session_id, "Answering from cache");
            history.push_assistant(cached.answer.clone());
            return Ok(sanitize_response(SearchResponse::from_cached(cached, session_id)));
        }

        // === PLAN ===
        notify(&progress, STATUS_PLANNING, &session_id).await;
        let outcome = self.planner.plan(&query, &history.messages()).await;
        let plan = apply_mode(normalize_plan(outcome.into_plan()), mode);
        debug!(
            tickers = ?plan.tickers,
            sonar = plan.call_sonar,
            deep_research = plan.call_deep_research,
            crypto = plan.is_crypto,
            reasoning = %plan.reasoning,
            "Fetch plan ready"
        );

        // === FETCH ===
        notify(&progress, STATUS_FETCHING, &session_id).await;
        let data = self.executor.execute(&plan, &query).await;

        // === SYNTHESIZE ===
        notify(&progress, STATUS_SYNTHESIZING, &session_id).await;
        let context = ContextFormatter::format(&data, Synthesizer::budget(mode));
        let outcome = self
            .synthesizer
            .dispatch(&query, &context, mode, &history.prior_to_latest())
            .await;

        let answer = CachedAnswer {
            answer: outcome.text,
            sources: extract_sources(&data),
            data,
        };
        history.push_assistant(answer.answer.clone());
        drop(history);

        if outcome.degraded {
            debug!(session_id = %session_id, "Degraded answer, not caching");
        } else {
            self.cache.set(&query, answer.clone());
        }

        info!(
            session_id = %session_id,
            sources = answer.sources.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Search request completed"
        );

        Ok(sanitize_response(SearchResponse::from_cached(answer, session_id)))
    }
}

/// Use the caller's session id, or start a new session when none was given.
pub fn resolve_session_id(session_id: Option<&str>) -> String {
    match session_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

async fn notify(progress: &Progress, status: &str, session_id: &str) {
    if let Some(tx) = progress {
        let _ = tx.send(SearchEvent::status(status, session_id)).await;
    }
}
