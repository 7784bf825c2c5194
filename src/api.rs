//! REST API server for the financial search engine
//!
//! Exposes the orchestrator via HTTP endpoints, including a server-sent
//! events variant of the search endpoint for progressive UIs.

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::models::SearchRequest;

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// =============================
/// Info Endpoints
/// =============================

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Welcome to the Financial Search Engine API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/api/search", "/api/search/stream"],
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Search Endpoints
/// =============================

async fn search(State(state): State<ApiState>, Json(req): Json<SearchRequest>) -> Response {
    if req.query.trim().is_empty() {
        return bad_request("Query cannot be empty");
    }

    info!(mode = %req.mode, "Received search request");
    Json(state.orchestrator.ask(req).await).into_response()
}

async fn search_stream(State(state): State<ApiState>, Json(req): Json<SearchRequest>) -> Response {
    if req.query.trim().is_empty() {
        return bad_request("Query cannot be empty");
    }

    info!(mode = %req.mode, "Received streaming search request");
    let events = state
        .orchestrator
        .ask_stream(req)
        .map(|event| Event::default().json_data(&event));

    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

/// =============================
/// Router
/// =============================

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin: {}", e);
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_router(orchestrator: Arc<Orchestrator>, cors_origins: &[String]) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/search", post(search))
        .route("/api/search/stream", post(search_stream))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
    cors_origins: &[String],
) -> crate::Result<()> {
    let router = create_router(orchestrator, cors_origins);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::execution::FanOutExecutor;
    use crate::llm::stub::StubModel;
    use crate::memory::InMemorySessionStore;
    use crate::models::FetchPlan;
    use crate::planner::FixedPlanner;
    use crate::providers::stub::StubProvider;
    use crate::synthesis::stub::synthesizer;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(origins: &[String]) -> Router {
        let plan = FetchPlan {
            call_sonar: true,
            need_price: true,
            tickers: vec!["TSLA".to_string()],
            ..FetchPlan::default()
        };
        let orchestrator = Orchestrator::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(FixedPlanner::new(plan)),
            FanOutExecutor::new(StubProvider::new().providers()),
            synthesizer(StubModel::replying("stub", "TSLA closed at $110.00")),
            ResponseCache::in_memory(Duration::from_secs(60)),
        );
        create_router(Arc::new(orchestrator), origins)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let app = router(&[]);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "healthy");

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_search_returns_answer() {
        let response = router(&[])
            .oneshot(post_json(
                "/api/search",
                json!({ "query": "What is the current price of TSLA?", "session_id": "web-1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["answer"], "TSLA closed at $110.00");
        assert_eq!(body["session_id"], "web-1");
        assert_eq!(body["data"]["TSLA_price"]["results"][0]["c"], 110.0);
        assert!(!body["sources"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        for uri in ["/api/search", "/api/search/stream"] {
            let response = router(&[])
                .oneshot(post_json(uri, json!({ "query": "   " })))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
            assert_eq!(body["error"], "Query cannot be empty");
        }
    }

    #[tokio::test]
    async fn test_stream_emits_events() {
        let response = router(&[])
            .oneshot(post_json(
                "/api/search/stream",
                json!({ "query": "What is TSLA at?", "mode": "sonar", "session_id": "sse" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let text = body_text(response).await;
        let events: Vec<Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();

        assert_eq!(events[0]["type"], "status");
        assert_eq!(events[0]["content"], "Processing your query...");
        let last = events.last().unwrap();
        assert_eq!(last["type"], "result");
        assert_eq!(last["answer"], "TSLA closed at $110.00");
        assert_eq!(last["session_id"], "sse");
    }

    #[tokio::test]
    async fn test_cors_origin_list() {
        let app = router(&["http://localhost:3000".to_string()]);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
    }
}
