//! Error types for the financial search engine

use thiserror::Error;

/// Result type alias for search operations
pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("LLM authentication failed: {0}")]
    Unauthorized(String),

    #[error("LLM rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SearchError {
    /// Map a non-success HTTP status from an LLM backend onto the variants
    /// the synthesis layer distinguishes.
    pub fn from_llm_status(status: u16, body: String) -> Self {
        match status {
            401 => SearchError::Unauthorized(body),
            429 => SearchError::RateLimited(body),
            _ => SearchError::UpstreamStatus { status, body },
        }
    }
}
