//! Financial Search Engine
//!
//! Answers natural-language financial questions by:
//! - Planning which external sources a question needs (LLM planner)
//! - Fetching market data, filings and web search results concurrently
//! - Rendering the fetched data into a context block
//! - Synthesizing a markdown answer with one of three backends
//! - Caching answers and remembering per-session conversation history
//!
//! PIPELINE:
//! QUERY → SESSION → CACHE? → PLAN → FETCH → FORMAT → SYNTHESIZE → SANITIZE

pub mod agent;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod formatter;
pub mod llm;
pub mod memory;
pub mod models;
pub mod planner;
pub mod providers;
pub mod sanitizer;
pub mod synthesis;

pub use error::{Result, SearchError};

// Re-export common types
pub use agent::Orchestrator;
pub use config::AppConfig;
pub use models::*;
