//! Runtime configuration
//!
//! Everything is read from environment variables (the binaries load `.env`
//! through `dotenv` first). `from_lookup` takes any key → value function so
//! tests never have to touch the process environment.

use crate::error::SearchError;
use crate::Result;
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Connection details for one OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmEndpoint {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Postgres,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,

    /// Planner and default ("sonar") synthesis backend.
    pub openai: LlmEndpoint,
    /// Comprehensive-analysis backend (DeepSeek R1 on Together).
    pub deepseek_r1: LlmEndpoint,
    /// Narrative backend (DeepSeek V3 on Together).
    pub deepseek_v3: LlmEndpoint,

    pub perplexity_api_key: String,
    pub perplexity_base_url: String,
    pub polygon_api_key: String,
    pub polygon_base_url: String,
    pub financial_datasets_api_key: String,
    pub financial_datasets_base_url: String,

    pub cache_backend: CacheBackendKind,
    pub database_url: Option<String>,
    pub cache_ttl: Duration,

    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                SearchError::ConfigError(format!("PORT must be a port number, got '{}': {}", raw, e))
            })?,
            None => DEFAULT_PORT,
        };

        let together_key = get_or("TOGETHER_API_KEY", "");
        let together_url = get_or("TOGETHER_BASE_URL", "https://api.together.xyz/v1");

        let database_url = get("DATABASE_URL").or_else(|| get("POSTGRES_URL"));

        let cache_backend = match get("CACHE_BACKEND").map(|v| v.to_lowercase()) {
            Some(kind) => match kind.as_str() {
                "memory" | "in-memory" | "inmemory" => CacheBackendKind::Memory,
                "postgres" | "postgresql" => CacheBackendKind::Postgres,
                "disabled" | "off" | "none" => CacheBackendKind::Disabled,
                other => {
                    return Err(SearchError::ConfigError(format!(
                        "Unknown CACHE_BACKEND '{}' (expected memory, postgres or disabled)",
                        other
                    )))
                }
            },
            None if database_url.is_some() => CacheBackendKind::Postgres,
            None => CacheBackendKind::Memory,
        };

        if cache_backend == CacheBackendKind::Postgres && database_url.is_none() {
            return Err(SearchError::ConfigError(
                "CACHE_BACKEND=postgres requires DATABASE_URL (or POSTGRES_URL)".to_string(),
            ));
        }

        let cache_ttl_secs = match get("CACHE_TTL_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                SearchError::ConfigError(format!("CACHE_TTL_SECS must be an integer, got '{}': {}", raw, e))
            })?,
            None => DEFAULT_CACHE_TTL_SECS,
        };

        let mut cors_origins: Vec<String> = Vec::new();
        if let Some(frontend) = get("FRONTEND_URL") {
            cors_origins.push(frontend);
        }
        if let Some(extra) = get("CORS_ORIGINS") {
            cors_origins.extend(
                extra
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }
        let mut seen = HashSet::new();
        cors_origins.retain(|origin| seen.insert(origin.clone()));

        Ok(Self {
            port,
            openai: LlmEndpoint {
                api_key: get_or("OPENAI_API_KEY", ""),
                base_url: get_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                model: get_or("OPENAI_MODEL", "gpt-4-turbo"),
            },
            deepseek_r1: LlmEndpoint {
                api_key: together_key.clone(),
                base_url: together_url.clone(),
                model: get_or("DEEPSEEK_R1_MODEL", "deepseek-ai/DeepSeek-R1"),
            },
            deepseek_v3: LlmEndpoint {
                api_key: together_key,
                base_url: together_url,
                model: get_or("DEEPSEEK_V3_MODEL", "deepseek-ai/DeepSeek-V3"),
            },
            perplexity_api_key: get_or("PERPLEXITY_API_KEY", ""),
            perplexity_base_url: get_or("PERPLEXITY_BASE_URL", "https://api.perplexity.ai"),
            polygon_api_key: get_or("POLYGON_API_KEY", ""),
            polygon_base_url: get_or("POLYGON_API_URL", "https://api.polygon.io"),
            financial_datasets_api_key: get_or("FINANCIAL_DATASETS_API_KEY", ""),
            financial_datasets_base_url: get_or(
                "FINANCIAL_DATASETS_API_URL",
                "https://api.financialdatasets.ai",
            ),
            cache_backend,
            database_url,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cors_origins,
        })
    }

    /// Names of provider keys that are not configured, for startup warnings.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let checks = [
            ("OPENAI_API_KEY", &self.openai.api_key),
            ("TOGETHER_API_KEY", &self.deepseek_r1.api_key),
            ("PERPLEXITY_API_KEY", &self.perplexity_api_key),
            ("POLYGON_API_KEY", &self.polygon_api_key),
            ("FINANCIAL_DATASETS_API_KEY", &self.financial_datasets_api_key),
        ];

        checks
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| *name)
            .collect()
    }
}
